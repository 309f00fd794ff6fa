//! Domain model for package validation.
//!
//! The types here make up the wire format of a [`ValidationReport`]: severity
//! and status enumerations, individual test results, the file manifest and
//! the report envelope itself. Statuses stay stringly typed on the wire
//! (`"Info"`, `"wellformed"`, `"notvalid"`, ...) and are accepted
//! case-insensitively when deserializing.

use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a single validation finding, ordered `Info < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Informational finding, never affects a status.
    Info,
    /// The package deviates from a SHOULD requirement.
    Warn,
    /// The package violates a MUST requirement.
    Error,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            _ => Err(de::Error::unknown_variant(&raw, &["Info", "Warn", "Error"])),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warn => write!(f, "Warn"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// Outcome of the structural checks: a package is not well formed as soon as
/// any structural finding is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StructStatus {
    /// Folder layout satisfies every MUST requirement.
    #[serde(rename = "wellformed")]
    WellFormed,
    /// At least one MUST requirement failed.
    #[serde(rename = "notwellformed")]
    NotWellFormed,
}

impl<'de> Deserialize<'de> for StructStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "wellformed" => Ok(StructStatus::WellFormed),
            "notwellformed" => Ok(StructStatus::NotWellFormed),
            _ => Err(de::Error::unknown_variant(
                &raw,
                &["wellformed", "notwellformed"],
            )),
        }
    }
}

/// Outcome of a metadata check section (schema or Schematron).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetadataStatus {
    /// No error-severity finding in the section.
    #[serde(rename = "valid")]
    Valid,
    /// The section contains at least one error.
    #[serde(rename = "notvalid")]
    NotValid,
}

impl<'de> Deserialize<'de> for MetadataStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "valid" => Ok(MetadataStatus::Valid),
            "notvalid" => Ok(MetadataStatus::NotValid),
            _ => Err(de::Error::unknown_variant(&raw, &["valid", "notvalid"])),
        }
    }
}

/// Checksum algorithms accepted in METS `@CHECKSUMTYPE` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// MD5 message digest.
    MD5,
    /// SHA-1 secure hash.
    SHA1,
    /// SHA-256 secure hash.
    SHA256,
    /// SHA-512 secure hash.
    SHA512,
}

impl ChecksumAlgorithm {
    /// All supported algorithms, handy for iteration.
    pub const ALL: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::MD5,
        ChecksumAlgorithm::SHA1,
        ChecksumAlgorithm::SHA256,
        ChecksumAlgorithm::SHA512,
    ];

    /// Parse a METS `@CHECKSUMTYPE` value. The METS vocabulary hyphenates
    /// the SHA family (`SHA-256`); the bare spellings are accepted too.
    pub fn from_mets_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Some(ChecksumAlgorithm::MD5),
            "SHA1" | "SHA-1" => Some(ChecksumAlgorithm::SHA1),
            "SHA256" | "SHA-256" => Some(ChecksumAlgorithm::SHA256),
            "SHA512" | "SHA-512" => Some(ChecksumAlgorithm::SHA512),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::MD5 => write!(f, "MD5"),
            ChecksumAlgorithm::SHA1 => write!(f, "SHA1"),
            ChecksumAlgorithm::SHA256 => write!(f, "SHA256"),
            ChecksumAlgorithm::SHA512 => write!(f, "SHA512"),
        }
    }
}

/// A calculated or declared checksum: algorithm plus hex digest value.
///
/// Equality is strict on the algorithm and case-insensitive on the hex
/// value, matching how METS producers mix digest casings in the wild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm the value was produced with.
    pub algorithm: ChecksumAlgorithm,
    /// Hex digest value.
    pub value: String,
}

impl Checksum {
    /// Create a checksum from an algorithm and hex value.
    pub fn new(algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }
}

impl PartialEq for Checksum {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl Eq for Checksum {}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// One validation finding: a stable rule identifier, a human-readable
/// location (relative path or XPath-like expression), the message text and
/// a severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Stable rule identifier, e.g. `CSIPSTR4`, `CSIP69` or `METS`.
    pub rule_id: String,
    /// Where the finding was made.
    pub location: String,
    /// Free-text description of the finding.
    pub message: String,
    /// Finding severity.
    pub severity: Severity,
}

impl TestResult {
    /// Create a test result.
    pub fn new(
        rule_id: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            location: location.into(),
            message: message.into(),
            severity,
        }
    }
}

/// A file reference extracted from a METS `<file>` or `<mdRef>` element.
///
/// The size is kept as the raw `@SIZE` attribute string: reconciliation
/// compares declared and actual sizes textually, so a malformed attribute
/// surfaces as a mismatch instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Path relative to the METS document's root.
    pub path: PathBuf,
    /// Raw declared `@SIZE` value, if present.
    pub size: Option<String>,
    /// Declared checksum, when the algorithm is one we support.
    pub checksum: Option<Checksum>,
}

impl FileRef {
    /// Create a file reference.
    pub fn new(path: impl Into<PathBuf>, size: Option<String>, checksum: Option<Checksum>) -> Self {
        Self {
            path: path.into(),
            size,
            checksum,
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'path': '{}' 'size': '{}' 'checksum': '{}'",
            self.path.display(),
            self.size.as_deref().unwrap_or("None"),
            self.checksum
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "None".into()),
        )
    }
}

/// One file found on disk while building a package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the package root, with `/` separators.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Checksums over the requested algorithms.
    pub checksums: Vec<Checksum>,
}

impl ManifestEntry {
    /// Create a manifest entry.
    pub fn new(path: impl Into<String>, size: u64, checksums: Vec<Checksum>) -> Self {
        Self {
            path: path.into(),
            size,
            checksums,
        }
    }
}

/// Aggregate counts over a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    /// Number of regular files.
    pub file_count: u64,
    /// Total size of all files in bytes.
    pub total_size: u64,
}

/// The set of files below a package root, with sizes and checksums.
///
/// Entry order is unspecified; consumers key on [`ManifestEntry::path`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Where the manifest came from (currently always `"filesystem"`).
    pub source: String,
    /// Aggregate counts.
    pub summary: ManifestSummary,
    /// The individual file entries.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from entries, computing the summary.
    pub fn from_entries(source: impl Into<String>, entries: Vec<ManifestEntry>) -> Self {
        let summary = ManifestSummary {
            file_count: entries.len() as u64,
            total_size: entries.iter().map(|e| e.size).sum(),
        };
        Self {
            source: source.into(),
            summary,
            entries,
        }
    }

    /// Look an entry up by its relative path.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Results of the structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructResults {
    /// Derived overall status.
    pub status: StructStatus,
    /// The individual findings.
    pub messages: Vec<TestResult>,
}

impl StructResults {
    /// Derive the status from the findings: not well formed iff any error.
    pub fn from_messages(messages: Vec<TestResult>) -> Self {
        let status = if messages.iter().any(|m| m.severity == Severity::Error) {
            StructStatus::NotWellFormed
        } else {
            StructStatus::WellFormed
        };
        Self { status, messages }
    }
}

/// Results of one metadata check section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataChecks {
    /// Derived section status.
    pub status: MetadataStatus,
    /// The individual findings.
    pub messages: Vec<TestResult>,
}

impl MetadataChecks {
    /// Derive the status from the findings: not valid iff any error.
    pub fn from_messages(messages: Vec<TestResult>) -> Self {
        let status = if messages.iter().any(|m| m.severity == Severity::Error) {
            MetadataStatus::NotValid
        } else {
            MetadataStatus::Valid
        };
        Self { status, messages }
    }

    /// An empty, valid section.
    pub fn valid() -> Self {
        Self {
            status: MetadataStatus::Valid,
            messages: Vec::new(),
        }
    }
}

/// Schema and Schematron results for the whole package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResults {
    /// XML Schema findings over every METS document.
    pub schema_results: MetadataChecks,
    /// Schematron plus manifest-reconciliation findings.
    pub schematron_results: MetadataChecks,
}

/// Basic identity of the validated package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDetails {
    /// Package name, usually the root folder name.
    pub name: String,
}

/// The validation profile a package was checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDetails {
    /// Human-readable profile name.
    pub name: String,
    /// Package type, e.g. `SIP`.
    #[serde(rename = "type")]
    pub profile_type: String,
    /// Specification version.
    pub version: String,
}

impl ProfileDetails {
    /// The CSIP profile every metadata-checked package is validated against.
    pub fn csip() -> Self {
        Self {
            name: "E-ARK Specification for Information Packages".into(),
            profile_type: "SIP".into(),
            version: "2.0.4".into(),
        }
    }
}

/// A representation discovered under `representations/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representation {
    /// Representation folder name.
    pub name: String,
}

/// The validated package with its optional profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationPackage {
    /// Identity details.
    pub details: PackageDetails,
    /// Profile, attached only when metadata validation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileDetails>,
}

impl InformationPackage {
    /// Create a package record from its name and optional profile.
    pub fn new(name: impl Into<String>, profile: Option<ProfileDetails>) -> Self {
        Self {
            details: PackageDetails { name: name.into() },
            profile,
        }
    }
}

/// The complete result of validating one information package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Unique report identifier.
    pub uid: Uuid,
    /// The validated package.
    pub package: InformationPackage,
    /// Structural findings.
    pub structure: StructResults,
    /// Metadata findings; `None` when the structure was not well formed or
    /// metadata validation was switched off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataResults>,
}

impl ValidationReport {
    /// Create a report with a fresh UUID.
    pub fn new(
        package: InformationPackage,
        structure: StructResults,
        metadata: Option<MetadataResults>,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            package,
            structure,
            metadata,
        }
    }

    /// True when the structure is well formed and every metadata section
    /// that ran is valid.
    pub fn is_valid(&self) -> bool {
        self.structure.status == StructStatus::WellFormed
            && self.metadata.as_ref().map_or(true, |md| {
                md.schema_results.status == MetadataStatus::Valid
                    && md.schematron_results.status == MetadataStatus::Valid
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn severity_roundtrip_case_insensitive() {
        let json = serde_json::to_string(&Severity::Warn).unwrap();
        assert_eq!(json, "\"Warn\"");
        let lower: Severity = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(lower, Severity::Warn);
        let upper: Severity = serde_json::from_str("\"ERROR\"").unwrap();
        assert_eq!(upper, Severity::Error);
    }

    #[test]
    fn struct_status_wire_format() {
        let json = serde_json::to_string(&StructStatus::NotWellFormed).unwrap();
        assert_eq!(json, "\"notwellformed\"");
        let parsed: StructStatus = serde_json::from_str("\"WellFormed\"").unwrap();
        assert_eq!(parsed, StructStatus::WellFormed);
    }

    #[test]
    fn checksum_equality_ignores_hex_case() {
        let lower = Checksum::new(ChecksumAlgorithm::MD5, "d41d8cd98f00b204e9800998ecf8427e");
        let upper = Checksum::new(ChecksumAlgorithm::MD5, "D41D8CD98F00B204E9800998ECF8427E");
        assert_eq!(lower, upper);
    }

    #[test]
    fn checksum_equality_strict_on_algorithm() {
        let md5 = Checksum::new(ChecksumAlgorithm::MD5, "abc123");
        let sha1 = Checksum::new(ChecksumAlgorithm::SHA1, "abc123");
        assert_ne!(md5, sha1);
    }

    #[test]
    fn algorithm_parses_mets_spellings() {
        assert_eq!(
            ChecksumAlgorithm::from_mets_name("SHA-256"),
            Some(ChecksumAlgorithm::SHA256)
        );
        assert_eq!(
            ChecksumAlgorithm::from_mets_name("sha512"),
            Some(ChecksumAlgorithm::SHA512)
        );
        assert_eq!(ChecksumAlgorithm::from_mets_name("CRC32"), None);
    }

    #[test]
    fn struct_results_status_derived_from_messages() {
        let warn_only = StructResults::from_messages(vec![TestResult::new(
            "CSIPSTR9",
            "pkg",
            "missing representations",
            Severity::Warn,
        )]);
        assert_eq!(warn_only.status, StructStatus::WellFormed);

        let with_error = StructResults::from_messages(vec![TestResult::new(
            "CSIPSTR4",
            "pkg",
            "missing METS.xml",
            Severity::Error,
        )]);
        assert_eq!(with_error.status, StructStatus::NotWellFormed);
    }

    #[test]
    fn metadata_checks_status_derived_from_messages() {
        let info_only = MetadataChecks::from_messages(vec![TestResult::new(
            "CSIP17",
            "mets",
            "no dmdSec",
            Severity::Info,
        )]);
        assert_eq!(info_only.status, MetadataStatus::Valid);

        let with_error = MetadataChecks::from_messages(vec![TestResult::new(
            "METS",
            "mets",
            "schema failure",
            Severity::Error,
        )]);
        assert_eq!(with_error.status, MetadataStatus::NotValid);
    }

    #[test]
    fn manifest_summary_totals() {
        let manifest = Manifest::from_entries(
            "filesystem",
            vec![
                ManifestEntry::new("METS.xml", 120, vec![]),
                ManifestEntry::new("representations/rep1/data/a.txt", 30, vec![]),
            ],
        );
        assert_eq!(manifest.summary.file_count, 2);
        assert_eq!(manifest.summary.total_size, 150);
        assert!(manifest.entry("METS.xml").is_some());
        assert!(manifest.entry("./METS.xml").is_none());
    }

    #[test]
    fn report_serializes_expected_fields() {
        let report = ValidationReport::new(
            InformationPackage::new("minimal", Some(ProfileDetails::csip())),
            StructResults::from_messages(vec![]),
            None,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["package"]["details"]["name"], "minimal");
        assert_eq!(json["package"]["profile"]["type"], "SIP");
        assert_eq!(json["package"]["profile"]["version"], "2.0.4");
        assert_eq!(json["structure"]["status"], "wellformed");
        assert!(json.get("metadata").is_none());
        assert!(uuid::Uuid::parse_str(json["uid"].as_str().unwrap()).is_ok());
    }
}
