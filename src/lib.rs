//! # ipcheck - E-ARK Information Package validation
//!
//! `ipcheck` validates E-ARK information packages (archived or unpacked
//! directory trees conforming to the Common Specification for Information
//! Packages) and produces a structured validation report.
//!
//! ## What gets checked
//!
//! - **Structure**: the CSIP physical folder rules CSIPSTR1 to CSIPSTR16 -
//!   single root folder, `METS.xml`, `metadata/`, `representations/` and
//!   friends.
//! - **METS schema**: every METS document is streamed against the bundled
//!   wrapper schema; syntax errors and undeclared elements or missing
//!   required attributes become `METS` findings.
//! - **Schematron**: six rule sections (`root`, `hdr`, `amd`, `dmd`,
//!   `file`, `structmap`) cover the CSIP semantic rules CSIP1 to CSIP117.
//! - **Manifest**: file references declared in METS are reconciled with the
//!   files on disk by path, size and checksum (CSIP69 / CSIP71).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use ipcheck::validator::PackageValidator;
//!
//! let validator = PackageValidator::default();
//! let report = validator.validate(Path::new("minimal_IP_with_schemas.zip"))?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Archives are unpacked below a content-addressed temp directory (the
//! SHA-1 of the archive), so re-validating the same archive reuses the
//! extraction. Validation findings never surface as `Err`: every defect
//! lands in the report, and only unreadable inputs and cancellation
//! propagate.
//!
//! ## Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`model`]: severities, statuses, test results and the report envelope
//! - [`digest`]: streaming MD5/SHA-1/SHA-256/SHA-512 checksums
//! - [`archive`]: ZIP/tar/tar.gz detection and content-addressed unpacking
//! - [`manifest`]: filesystem manifests (path, size, checksums)
//! - [`structure`]: CSIPSTR folder checks and the structure map
//! - [`schema`]: the embedded METS wrapper schema registry
//! - [`mets`]: event-driven METS parsing and schema gating
//! - [`schematron`]: compiled CSIP rule sections and skip rules
//! - [`reconcile`]: METS-versus-filesystem cross-checks
//! - [`validator`]: the orchestrator tying the pipeline together
//!
//! Bundled resources (the wrapper XSD and the six Schematron rule files)
//! are embedded at build time and parsed once into process-wide read-only
//! registries; nothing is fetched at runtime.

// Documentation lints - enforce complete documentation for publication
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod archive;
pub mod cancel;
pub mod digest;
pub mod manifest;
pub mod mets;
pub mod model;
pub mod reconcile;
pub mod schema;
pub mod schematron;
pub mod structure;
pub mod validator;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::archive::{ArchiveError, ArchivePackageHandler};
    pub use crate::cancel::{CancelToken, Cancelled};
    pub use crate::digest::{Checksums, DigestError};
    pub use crate::manifest::{manifest_from_dir, ManifestError};
    pub use crate::mets::{MetsParseOutcome, MetsValidator};
    pub use crate::model::{
        Checksum, ChecksumAlgorithm, FileRef, InformationPackage, Manifest, ManifestEntry,
        ManifestSummary, MetadataChecks, MetadataResults, MetadataStatus, PackageDetails,
        ProfileDetails, Representation, Severity, StructResults, StructStatus, TestResult,
        ValidationReport,
    };
    pub use crate::reconcile::check_manifest;
    pub use crate::schematron::{profile, ValidationProfile};
    pub use crate::structure::{PackageStructTests, StructMap, StructTests};
    pub use crate::validator::{
        classify_input, InputKind, PackageValidator, ValidationOptions, ValidatorError,
    };
}
