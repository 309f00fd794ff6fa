//! Event-driven METS parsing and schema checking.
//!
//! Each METS document is streamed once with a pull parser. The walker
//! reacts to element events: `<mets:file>` and `<mets:mdRef>` yield file
//! references, and file groups named `Representations/<name>` surface the
//! METS documents of the package's representations. While streaming, every
//! METS-namespace element is checked against the bundled wrapper schema;
//! violations and XML syntax errors become `METS` findings rather than
//! parser failures.
//!
//! A validator is single shot: `validate_mets` consumes it and returns a
//! freshly built outcome, so no state leaks between documents.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::cancel::{CancelToken, Cancelled};
use crate::model::{
    Checksum, ChecksumAlgorithm, FileRef, MetadataChecks, Severity, TestResult,
};
use crate::schema::{wrapper_schema, MetsSchema, METS_NS, XLINK_NS};
use crate::structure::METS_NAME;

const REPRESENTATIONS_USE: &str = "Representations/";
const FILE_URI_PREFIX: &str = "file://./";

/// Everything one METS parse produces.
#[derive(Debug)]
pub struct MetsParseOutcome {
    /// True when no schema finding was recorded.
    pub schema_valid: bool,
    /// The schema findings as a metadata check section.
    pub checks: MetadataChecks,
    /// File references declared by `<file>` and `<mdRef>` elements.
    pub file_refs: Vec<FileRef>,
    /// Representation METS documents keyed by representation name.
    pub representation_mets: BTreeMap<String, FileRef>,
}

/// Resolve a METS location against the current package root.
///
/// Locations starting with `file://./` are relative package paths: the
/// prefix is stripped, the remainder resolved against `root`, and the
/// containing directory becomes the root for subsequent resolutions.
pub fn resolve_mets_location(root: &Path, location: &str) -> (PathBuf, PathBuf) {
    if let Some(relative) = location.strip_prefix(FILE_URI_PREFIX) {
        let mets = root.join(relative);
        let new_root = mets.parent().map(Path::to_path_buf).unwrap_or_default();
        (new_root, mets)
    } else {
        let mets = PathBuf::from(location);
        let new_root = mets.parent().map(Path::to_path_buf).unwrap_or_default();
        (new_root, mets)
    }
}

/// Single-shot METS document validator.
#[derive(Debug)]
pub struct MetsValidator {
    schema: &'static MetsSchema,
    errors: Vec<TestResult>,
    file_refs: Vec<FileRef>,
    representation_mets: BTreeMap<String, FileRef>,
}

impl MetsValidator {
    /// Create a validator backed by the bundled wrapper schema.
    pub fn new() -> Self {
        Self {
            schema: wrapper_schema(),
            errors: Vec::new(),
            file_refs: Vec::new(),
            representation_mets: BTreeMap::new(),
        }
    }

    /// Parse and schema-check the METS file at `mets_path`.
    ///
    /// Every defect is reported as a finding in the outcome; only
    /// cancellation escapes as an error.
    pub fn validate_mets(self, mets_path: &Path) -> Result<MetsParseOutcome, Cancelled> {
        self.validate_mets_cancellable(mets_path, &CancelToken::new())
    }

    /// [`validate_mets`](Self::validate_mets) with a cancellation
    /// checkpoint per XML event.
    pub fn validate_mets_cancellable(
        mut self,
        mets_path: &Path,
        cancel: &CancelToken,
    ) -> Result<MetsParseOutcome, Cancelled> {
        debug!("validating METS document {}", mets_path.display());
        match NsReader::from_file(mets_path) {
            Ok(reader) => self.walk(reader, mets_path, cancel)?,
            Err(err) => self.schema_error(mets_path, format!("cannot open METS file: {err}")),
        }
        let schema_valid = self.errors.is_empty();
        Ok(MetsParseOutcome {
            schema_valid,
            checks: MetadataChecks::from_messages(self.errors),
            file_refs: self.file_refs,
            representation_mets: self.representation_mets,
        })
    }

    fn walk(
        &mut self,
        mut reader: NsReader<BufReader<File>>,
        mets_path: &Path,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        // innermost-first stack of fileGrp USE attributes
        let mut group_use: Vec<Option<String>> = Vec::new();
        let mut current_file: Option<PendingFile> = None;
        let mut md_section_depth = 0usize;
        let mut seen_root = false;
        let mut open_elements = 0usize;

        loop {
            cancel.check()?;
            let (resolve, event) = match reader.read_resolved_event_into(&mut buf) {
                Ok(pair) => pair,
                Err(err) => {
                    self.schema_error(mets_path, collapse_ns(&err.to_string()));
                    return Ok(());
                }
            };
            match event {
                Event::Start(ref e) => {
                    open_elements += 1;
                    let is_mets_ns = matches!(
                        resolve,
                        ResolveResult::Bound(ref ns) if ns.as_ref() == METS_NS.as_bytes()
                    );
                    if is_mets_ns {
                        let local = local_of(e);
                        if !seen_root {
                            seen_root = true;
                            if local != "mets" {
                                self.schema_error(
                                    mets_path,
                                    format!("document root is mets:{local}, expected mets:mets"),
                                );
                            }
                        }
                        self.check_schema(&reader, e, &local, mets_path);
                        self.on_start(&reader, e, &local, &mut group_use, &mut current_file,
                                      &mut md_section_depth);
                    } else if !seen_root {
                        seen_root = true;
                        self.schema_error(
                            mets_path,
                            "document root element is not in the METS namespace".to_string(),
                        );
                    }
                }
                Event::Empty(ref e) => {
                    if matches!(
                        resolve,
                        ResolveResult::Bound(ref ns) if ns.as_ref() == METS_NS.as_bytes()
                    ) {
                        let local = local_of(e);
                        self.check_schema(&reader, e, &local, mets_path);
                        self.on_start(&reader, e, &local, &mut group_use, &mut current_file,
                                      &mut md_section_depth);
                        self.on_end(&local, &mut group_use, &mut current_file,
                                    &mut md_section_depth);
                    }
                }
                Event::End(ref e) => {
                    open_elements = open_elements.saturating_sub(1);
                    let (ns, local) = reader.resolve_element(e.name());
                    if matches!(ns, ResolveResult::Bound(ref b) if b.as_ref() == METS_NS.as_bytes())
                    {
                        let local =
                            String::from_utf8_lossy(local.as_ref()).into_owned();
                        self.on_end(&local, &mut group_use, &mut current_file,
                                    &mut md_section_depth);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if !seen_root {
            self.schema_error(mets_path, "document holds no METS root element".to_string());
        } else if open_elements > 0 {
            self.schema_error(
                mets_path,
                "document ends with unclosed elements".to_string(),
            );
        }
        Ok(())
    }

    /// Element-specific walker actions for start (and empty) events.
    fn on_start(
        &mut self,
        reader: &NsReader<BufReader<File>>,
        e: &BytesStart<'_>,
        local: &str,
        group_use: &mut Vec<Option<String>>,
        current_file: &mut Option<PendingFile>,
        md_section_depth: &mut usize,
    ) {
        match local {
            "fileGrp" => {
                group_use.push(attr_value(e, "USE"));
            }
            "file" => {
                *current_file = Some(PendingFile {
                    size: attr_value(e, "SIZE"),
                    checksum: checksum_from_attrs(e),
                    href: None,
                });
            }
            "FLocat" => {
                if let Some(pending) = current_file.as_mut() {
                    pending.href = xlink_href(reader, e);
                }
            }
            "dmdSec" | "amdSec" => {
                *md_section_depth += 1;
            }
            "mdRef" => {
                if *md_section_depth > 0 {
                    if let Some(href) = xlink_href(reader, e) {
                        self.file_refs.push(FileRef::new(
                            href,
                            attr_value(e, "SIZE"),
                            checksum_from_attrs(e),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    /// Element-specific walker actions for end events.
    fn on_end(
        &mut self,
        local: &str,
        group_use: &mut Vec<Option<String>>,
        current_file: &mut Option<PendingFile>,
        md_section_depth: &mut usize,
    ) {
        match local {
            "fileGrp" => {
                group_use.pop();
            }
            "file" => {
                if let Some(pending) = current_file.take() {
                    self.route_file(pending, group_use);
                }
            }
            "dmdSec" | "amdSec" => {
                *md_section_depth = md_section_depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    /// Place a completed `<file>` element: representation METS documents go
    /// to the representation map, everything else to the plain reference
    /// list.
    fn route_file(&mut self, pending: PendingFile, group_use: &[Option<String>]) {
        let Some(href) = pending.href else {
            // missing FLocat/@xlink:href already reported by the schema gate
            return;
        };
        let file_ref = FileRef::new(href, pending.size, pending.checksum);
        let rep_name = group_use
            .iter()
            .rev()
            .flatten()
            .find_map(|use_attr| use_attr.strip_prefix(REPRESENTATIONS_USE));
        match rep_name {
            Some(rep) => {
                let leaf = file_ref
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if leaf.eq_ignore_ascii_case(METS_NAME) {
                    self.representation_mets.insert(rep.to_string(), file_ref);
                } else {
                    self.file_refs.push(file_ref);
                }
            }
            None => self.file_refs.push(file_ref),
        }
    }

    /// Check one METS-namespace element against the wrapper schema.
    fn check_schema(
        &mut self,
        reader: &NsReader<BufReader<File>>,
        e: &BytesStart<'_>,
        local: &str,
        mets_path: &Path,
    ) {
        let Some(decl) = self.schema.element(local) else {
            self.schema_error(
                mets_path,
                format!("element mets:{local} is not declared by the wrapper schema"),
            );
            return;
        };
        for required in &decl.required {
            if !has_attribute(reader, e, required.ns.as_deref(), &required.local) {
                self.schema_error(
                    mets_path,
                    format!(
                        "element mets:{local} is missing required attribute @{}",
                        required.display()
                    ),
                );
            }
        }
    }

    fn schema_error(&mut self, mets_path: &Path, message: String) {
        self.errors.push(TestResult::new(
            "METS",
            mets_path.display().to_string(),
            message,
            Severity::Error,
        ));
    }
}

impl Default for MetsValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// A `<file>` element still waiting for its FLocat child.
#[derive(Debug)]
struct PendingFile {
    size: Option<String>,
    checksum: Option<Checksum>,
    href: Option<String>,
}

/// Collapse qualified METS names in parser messages to the `mets:` prefix.
fn collapse_ns(message: &str) -> String {
    message.replace(&format!("{{{METS_NS}}}"), "mets:")
}

fn local_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr_value(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Declared checksum from `@CHECKSUMTYPE`/`@CHECKSUM`; unknown algorithms
/// yield no checksum.
fn checksum_from_attrs(e: &BytesStart<'_>) -> Option<Checksum> {
    let algorithm = attr_value(e, "CHECKSUMTYPE")
        .as_deref()
        .and_then(ChecksumAlgorithm::from_mets_name)?;
    let value = attr_value(e, "CHECKSUM")?;
    Some(Checksum::new(algorithm, value))
}

fn xlink_href(reader: &NsReader<BufReader<File>>, e: &BytesStart<'_>) -> Option<String> {
    attr_in_ns(reader, e, Some(XLINK_NS), "href")
}

fn has_attribute(
    reader: &NsReader<BufReader<File>>,
    e: &BytesStart<'_>,
    ns: Option<&str>,
    local: &str,
) -> bool {
    attr_in_ns(reader, e, ns, local).is_some()
}

/// Namespace-aware attribute lookup.
fn attr_in_ns(
    reader: &NsReader<BufReader<File>>,
    e: &BytesStart<'_>,
    ns: Option<&str>,
    local: &str,
) -> Option<String> {
    for attr in e.attributes().with_checks(false).flatten() {
        if attr_matches(reader, &attr, ns, local) {
            return attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}

fn attr_matches(
    reader: &NsReader<BufReader<File>>,
    attr: &Attribute<'_>,
    ns: Option<&str>,
    local: &str,
) -> bool {
    let (resolved, attr_local) = reader.resolve_attribute(attr.key);
    if attr_local.as_ref() != local.as_bytes() {
        return false;
    }
    match (ns, resolved) {
        (None, ResolveResult::Unbound) => true,
        (Some(expected), ResolveResult::Bound(bound)) => bound.as_ref() == expected.as_bytes(),
        _ => false,
    }
}
