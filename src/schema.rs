//! Registry for the bundled METS wrapper schema.
//!
//! The wrapper XSD ships inside the binary and is parsed exactly once, on
//! first access, into the table of declared METS elements and their
//! required attributes. The METS parser consults this table while
//! streaming: an element missing from the table or an element missing one
//! of its required attributes is a schema violation.

use std::collections::HashMap;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// The XLink namespace used by METS locator attributes.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
/// The METS namespace.
pub const METS_NS: &str = "http://www.loc.gov/METS/";
/// The CSIP extension namespace.
pub const CSIP_NS: &str = "https://DILCIS.eu/XML/METS/CSIPExtensionMETS";

const WRAPPER_XSD: &str = include_str!("../resources/schemas/wrapper.xsd");

/// A namespaced attribute name; `ns` is `None` for unqualified attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrName {
    /// Attribute namespace URI, when qualified.
    pub ns: Option<String>,
    /// Local attribute name.
    pub local: String,
}

impl AttrName {
    fn unqualified(local: &str) -> Self {
        Self {
            ns: None,
            local: local.into(),
        }
    }

    /// Prefixed display form, collapsing the known namespaces.
    pub fn display(&self) -> String {
        match self.ns.as_deref() {
            Some(XLINK_NS) => format!("xlink:{}", self.local),
            Some(CSIP_NS) => format!("csip:{}", self.local),
            Some(ns) => format!("{{{ns}}}{}", self.local),
            None => self.local.clone(),
        }
    }
}

/// Schema declaration for one METS element.
#[derive(Debug, Default)]
pub struct ElementDecl {
    /// Attributes a conforming element must carry.
    pub required: Vec<AttrName>,
}

/// The parsed wrapper schema: every declared METS element by local name.
#[derive(Debug, Default)]
pub struct MetsSchema {
    elements: HashMap<String, ElementDecl>,
}

impl MetsSchema {
    /// Look up the declaration for a METS-namespace element.
    pub fn element(&self, local_name: &str) -> Option<&ElementDecl> {
        self.elements.get(local_name)
    }

    /// True when the element is part of the wrapper vocabulary.
    pub fn declares(&self, local_name: &str) -> bool {
        self.elements.contains_key(local_name)
    }
}

/// The process-wide wrapper schema, parsed from the embedded resource on
/// first access and read-only afterwards.
pub fn wrapper_schema() -> &'static MetsSchema {
    static SCHEMA: OnceLock<MetsSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        parse_wrapper(WRAPPER_XSD).expect("embedded wrapper.xsd is well-formed")
    })
}

fn parse_wrapper(xsd: &str) -> Result<MetsSchema, quick_xml::Error> {
    let mut reader = Reader::from_str(xsd);
    reader.config_mut().trim_text(true);

    let mut schema = MetsSchema::default();
    let mut current: Option<(String, ElementDecl)> = None;
    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e) {
                "element" => {
                    if let Some(name) = attribute(e, "name") {
                        current = Some((name, ElementDecl::default()));
                    }
                }
                "attribute" => {
                    if let Some((_, decl)) = current.as_mut() {
                        if attribute(e, "use").as_deref() == Some("required") {
                            if let Some(name) = attribute(e, "name") {
                                decl.required.push(AttrName::unqualified(&name));
                            } else if let Some(reference) = attribute(e, "ref") {
                                decl.required.push(resolve_ref(&reference));
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"element" {
                    if let Some((name, decl)) = current.take() {
                        schema.elements.insert(name, decl);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(schema)
}

/// Map a prefixed attribute reference to its namespace; the wrapper only
/// references xlink and csip attributes.
fn resolve_ref(reference: &str) -> AttrName {
    match reference.split_once(':') {
        Some(("xlink", local)) => AttrName {
            ns: Some(XLINK_NS.into()),
            local: local.into(),
        },
        Some(("csip", local)) => AttrName {
            ns: Some(CSIP_NS.into()),
            local: local.into(),
        },
        Some((_, local)) => AttrName::unqualified(local),
        None => AttrName::unqualified(reference),
    }
}

fn local_name<'a>(e: &'a BytesStart<'a>) -> &'a str {
    std::str::from_utf8(e.local_name().into_inner()).unwrap_or("")
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok())
        .map(|v| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_declares_core_mets_vocabulary() {
        let schema = wrapper_schema();
        for element in [
            "mets", "metsHdr", "agent", "dmdSec", "amdSec", "mdRef", "fileSec", "fileGrp",
            "file", "FLocat", "structMap", "div",
        ] {
            assert!(schema.declares(element), "missing declaration for {element}");
        }
        assert!(!schema.declares("bogusElement"));
    }

    #[test]
    fn file_requires_id() {
        let decl = wrapper_schema().element("file").unwrap();
        assert!(decl.required.contains(&AttrName::unqualified("ID")));
    }

    #[test]
    fn flocat_requires_xlink_href() {
        let decl = wrapper_schema().element("FLocat").unwrap();
        let href = AttrName {
            ns: Some(XLINK_NS.into()),
            local: "href".into(),
        };
        assert!(decl.required.contains(&href));
        assert_eq!(href.display(), "xlink:href");
    }

    #[test]
    fn mdref_requires_loctype_and_mdtype() {
        let decl = wrapper_schema().element("mdRef").unwrap();
        assert!(decl.required.contains(&AttrName::unqualified("LOCTYPE")));
        assert!(decl.required.contains(&AttrName::unqualified("MDTYPE")));
    }

    #[test]
    fn optional_attributes_are_not_required() {
        let decl = wrapper_schema().element("mets").unwrap();
        assert!(decl.required.is_empty());
    }
}
