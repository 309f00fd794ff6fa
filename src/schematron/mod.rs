//! Schematron rule evaluation for METS documents.
//!
//! Six rule sections ship as embedded ISO-Schematron resources, one per
//! METS region: `root`, `hdr`, `amd`, `dmd`, `file` and `structmap`. The
//! sections are compiled once, on first access, into context paths and
//! assert expressions; applying them to a METS document walks a read-only
//! DOM and turns every failed assert into a severity-tagged finding.
//!
//! A handful of rules only make sense for certain package shapes, so the
//! engine honours skip rules driven by the structure map: rules about
//! documentation, metadata or schema file groups are suppressed when the
//! package has no such folders, and package-level rules are suppressed
//! when checking a representation METS.

mod xpath;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::model::{MetadataChecks, Severity, TestResult};
use crate::structure::StructTests;

use xpath::{Expr, Path as XPath, PrefixResolver};

/// The six METS rule sections, in application order.
pub const SECTIONS: [&str; 6] = ["root", "hdr", "amd", "dmd", "file", "structmap"];

/// Rules that only apply to the package (root) METS document.
const REP_SKIPS: [&str; 9] = [
    "CSIP10", "CSIP11", "CSIP12", "CSIP13", "CSIP14", "CSIP15", "CSIP16", "CSIP101", "CSIP114",
];

/// Rule id reported for documents the Schematron stage cannot parse.
const PARSE_RULE_ID: &str = "SCHEMATRON";

const ROOT_RULES: &str = include_str!("../../resources/schematron/mets_root_rules.xml");
const HDR_RULES: &str = include_str!("../../resources/schematron/mets_hdr_rules.xml");
const AMD_RULES: &str = include_str!("../../resources/schematron/mets_amd_rules.xml");
const DMD_RULES: &str = include_str!("../../resources/schematron/mets_dmd_rules.xml");
const FILE_RULES: &str = include_str!("../../resources/schematron/mets_file_rules.xml");
const STRUCTMAP_RULES: &str = include_str!("../../resources/schematron/mets_structmap_rules.xml");

/// Errors raised while loading a Schematron rule set.
#[derive(Debug, Error)]
pub enum SchematronError {
    /// The rule file is not well-formed XML.
    #[error("rule set '{name}' is not parseable: {source}")]
    RuleXml {
        /// Section name.
        name: String,
        /// Underlying XML failure.
        #[source]
        source: quick_xml::Error,
    },

    /// A rule context or assert test uses an unsupported expression.
    #[error("rule set '{name}': {source}")]
    RuleExpr {
        /// Section name.
        name: String,
        /// Underlying expression failure.
        #[source]
        source: xpath::XPathParseError,
    },
}

/// One compiled `<sch:assert>`.
#[derive(Debug)]
struct CompiledAssert {
    id: String,
    severity: Severity,
    test_src: String,
    message: String,
    expr: Expr,
}

/// One compiled `<sch:rule>` with its asserts.
#[derive(Debug)]
struct CompiledRule {
    context_src: String,
    context: XPath,
    asserts: Vec<CompiledAssert>,
}

/// A failed assert before skip filtering.
#[derive(Debug)]
struct FailedAssert {
    id: String,
    severity: Severity,
    location: String,
    message: String,
}

/// A compiled Schematron section.
#[derive(Debug)]
pub struct Ruleset {
    name: String,
    rules: Vec<CompiledRule>,
}

impl Ruleset {
    /// Compile a rule set from its XML source.
    fn from_xml(name: &str, xml: &str) -> Result<Self, SchematronError> {
        let raw = RawRuleset::parse(xml).map_err(|source| SchematronError::RuleXml {
            name: name.to_string(),
            source,
        })?;
        let expr_err = |source| SchematronError::RuleExpr {
            name: name.to_string(),
            source,
        };
        let mut rules = Vec::new();
        for rule in raw.rules {
            let context = xpath::parse_path(&rule.context, &raw.prefixes).map_err(expr_err)?;
            let mut asserts = Vec::new();
            for assert in rule.asserts {
                let expr = xpath::parse(&assert.test, &raw.prefixes).map_err(expr_err)?;
                asserts.push(CompiledAssert {
                    id: assert.id,
                    severity: severity_from_role(assert.role.as_deref()),
                    test_src: assert.test,
                    message: assert.message,
                    expr,
                });
            }
            rules.push(CompiledRule {
                context_src: rule.context,
                context,
                asserts,
            });
        }
        Ok(Self {
            name: name.to_string(),
            rules,
        })
    }

    /// Run every rule over the document and collect failed asserts.
    fn apply(&self, document: &roxmltree::Document<'_>) -> Vec<FailedAssert> {
        let mut failed = Vec::new();
        for rule in &self.rules {
            for node in xpath::evaluate_context(&rule.context, document) {
                for assert in &rule.asserts {
                    if !xpath::evaluate(&assert.expr, node).boolean() {
                        failed.push(FailedAssert {
                            id: assert.id.clone(),
                            severity: assert.severity,
                            location: format!("{}/{}", rule.context_src, assert.test_src),
                            message: assert.message.clone(),
                        });
                    }
                }
            }
        }
        debug!("section {} fired {} asserts", self.name, failed.len());
        failed
    }
}

fn severity_from_role(role: Option<&str>) -> Severity {
    match role {
        Some("ERROR") => Severity::Error,
        Some("INFO") => Severity::Info,
        _ => Severity::Warn,
    }
}

/// The complete set of rule sections making up the CSIP validation profile.
#[derive(Debug)]
pub struct ValidationProfile {
    rulesets: BTreeMap<&'static str, Ruleset>,
}

/// The process-wide profile, compiled from the embedded resources on first
/// access and read-only afterwards.
pub fn profile() -> &'static ValidationProfile {
    static PROFILE: OnceLock<ValidationProfile> = OnceLock::new();
    PROFILE.get_or_init(|| {
        ValidationProfile::from_embedded().expect("embedded schematron rules compile")
    })
}

impl ValidationProfile {
    fn from_embedded() -> Result<Self, SchematronError> {
        let sources = [
            ("root", ROOT_RULES),
            ("hdr", HDR_RULES),
            ("amd", AMD_RULES),
            ("dmd", DMD_RULES),
            ("file", FILE_RULES),
            ("structmap", STRUCTMAP_RULES),
        ];
        let mut rulesets = BTreeMap::new();
        for (name, xml) in sources {
            rulesets.insert(name, Ruleset::from_xml(name, xml)?);
        }
        Ok(Self { rulesets })
    }

    /// Validate a METS document against every section.
    ///
    /// `structure` is the structure-map entry for the document's package or
    /// representation; `is_root` selects whether package-only rules apply.
    /// Returns whether every section was valid plus the collected findings.
    pub fn validate(
        &self,
        mets_path: &Path,
        structure: &StructTests,
        is_root: bool,
    ) -> (bool, MetadataChecks) {
        let text = match fs::read_to_string(mets_path) {
            Ok(text) => text,
            Err(err) => {
                return parse_failure(mets_path, &format!("cannot read document: {err}"));
            }
        };
        let document = match roxmltree::Document::parse(&text) {
            Ok(document) => document,
            Err(err) => {
                return parse_failure(mets_path, &err.to_string());
            }
        };

        let mut messages = Vec::new();
        for section in SECTIONS {
            let ruleset = &self.rulesets[section];
            for failed in ruleset.apply(&document) {
                if self.skip_assertion(&failed.id, structure, !is_root) {
                    continue;
                }
                messages.push(TestResult::new(
                    failed.id,
                    failed.location,
                    failed.message,
                    failed.severity,
                ));
            }
        }
        let checks = MetadataChecks::from_messages(messages);
        (checks.status == crate::model::MetadataStatus::Valid, checks)
    }

    /// Skip rules: representation METS documents are exempt from
    /// package-level rules, and folder-specific rules only apply when the
    /// folder exists.
    fn skip_assertion(&self, rule_id: &str, structure: &StructTests, rep_skips: bool) -> bool {
        if rep_skips && REP_SKIPS.contains(&rule_id) {
            return true;
        }
        if rule_id == "CSIP60" && !structure.has_documentation() {
            return true;
        }
        if rule_id == "CSIP88" && !structure.has_metadata() {
            return true;
        }
        if matches!(rule_id, "CSIP97" | "CSIP113") && !structure.has_schemas() {
            return true;
        }
        if rule_id == "CSIP114" && !structure.has_representations() {
            return true;
        }
        false
    }
}

/// A document the Schematron stage cannot parse is reported as a warning
/// and otherwise skipped.
fn parse_failure(mets_path: &Path, message: &str) -> (bool, MetadataChecks) {
    warn!("schematron skipped for {}: {message}", mets_path.display());
    let checks = MetadataChecks::from_messages(vec![TestResult::new(
        PARSE_RULE_ID,
        mets_path.display().to_string(),
        message,
        Severity::Warn,
    )]);
    (true, checks)
}

// ---------------------------------------------------------------------------
// Rule file parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RawAssert {
    id: String,
    role: Option<String>,
    test: String,
    message: String,
}

#[derive(Debug, Default)]
struct RawRule {
    context: String,
    asserts: Vec<RawAssert>,
}

#[derive(Debug, Default)]
struct RawRuleset {
    prefixes: HashMap<String, String>,
    rules: Vec<RawRule>,
}

impl PrefixResolver for RawRuleset {
    fn resolve(&self, prefix: &str) -> Option<&str> {
        self.prefixes.resolve(prefix)
    }
}

impl RawRuleset {
    fn parse(xml: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut ruleset = RawRuleset::default();
        let mut current_rule: Option<RawRule> = None;
        let mut current_assert: Option<RawAssert> = None;
        loop {
            match reader.read_event()? {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let local = e.local_name();
                    match local.as_ref() {
                        b"ns" => {
                            let prefix = attr(e, "prefix");
                            let uri = attr(e, "uri");
                            if let (Some(prefix), Some(uri)) = (prefix, uri) {
                                ruleset.prefixes.insert(prefix, uri);
                            }
                        }
                        b"rule" => {
                            current_rule = Some(RawRule {
                                context: attr(e, "context").unwrap_or_default(),
                                asserts: Vec::new(),
                            });
                        }
                        b"assert" => {
                            current_assert = Some(RawAssert {
                                id: attr(e, "id").unwrap_or_default(),
                                role: attr(e, "role"),
                                test: attr(e, "test").unwrap_or_default(),
                                message: String::new(),
                            });
                        }
                        _ => {}
                    }
                }
                Event::Text(ref t) => {
                    if let Some(assert) = current_assert.as_mut() {
                        let text = t.unescape()?;
                        if !assert.message.is_empty() {
                            assert.message.push(' ');
                        }
                        assert.message.push_str(text.trim());
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"assert" => {
                        if let (Some(rule), Some(assert)) =
                            (current_rule.as_mut(), current_assert.take())
                        {
                            rule.asserts.push(assert);
                        }
                    }
                    b"rule" => {
                        if let Some(rule) = current_rule.take() {
                            ruleset.rules.push(rule);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(ruleset)
    }
}

fn attr(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}
