//! Package validation orchestration.
//!
//! `PackageValidator` ties the pipeline together: unpack archived input,
//! check the folder structure, parse and schema-check every METS document,
//! run the Schematron profile over the schema-valid ones and reconcile the
//! declared file references with the filesystem. Validation defects never
//! surface as errors here; they all land in the returned report. Only
//! failures on the caller's input (unreadable archive) and cancellation
//! propagate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::archive::{ArchiveError, ArchivePackageHandler};
use crate::cancel::{CancelToken, Cancelled};
use crate::manifest::ManifestError;
use crate::mets::{MetsParseOutcome, MetsValidator};
use crate::model::{
    InformationPackage, MetadataChecks, MetadataResults, MetadataStatus, ProfileDetails,
    Severity, TestResult, ValidationReport,
};
use crate::reconcile::check_manifest;
use crate::schematron::profile;
use crate::structure::{self, StructTests, METS_NAME};

const FILE_URI_PREFIX: &str = "file://./";

/// Errors that escape a validation call.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// The caller-supplied input could not be read or unpacked.
    #[error("cannot process input {path}: {reason}")]
    Input {
        /// The input path.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// The validation was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Knobs for a validation run.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Run metadata (schema, Schematron, manifest) validation after the
    /// structural checks.
    pub check_metadata: bool,
    /// Compute and compare file checksums during manifest reconciliation;
    /// sizes are always compared.
    pub verify_checksums: bool,
    /// Follow representation METS documents declared by the package METS.
    pub recurse: bool,
    /// Cooperative cancellation token.
    pub cancel: CancelToken,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_metadata: true,
            verify_checksums: true,
            recurse: true,
            cancel: CancelToken::new(),
        }
    }
}

/// What kind of input a validation call received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// An unpacked package directory.
    Directory,
    /// A ZIP or (gzipped) tar archive.
    Archive,
    /// A METS file; its parent directory is validated.
    MetsFile,
    /// Nothing we can validate.
    Unsupported,
}

/// Classify an input path the way the validator will treat it.
pub fn classify_input(path: &Path) -> InputKind {
    if path.is_dir() {
        InputKind::Directory
    } else if ArchivePackageHandler::is_archive(path) {
        InputKind::Archive
    } else if path
        .file_name()
        .map(|n| n.to_string_lossy().eq_ignore_ascii_case(METS_NAME))
        .unwrap_or(false)
    {
        InputKind::MetsFile
    } else {
        InputKind::Unsupported
    }
}

/// Full package validation against the CSIP profile.
pub struct PackageValidator {
    archive_handler: ArchivePackageHandler,
}

impl Default for PackageValidator {
    fn default() -> Self {
        Self::new(ArchivePackageHandler::default())
    }
}

impl PackageValidator {
    /// Create a validator with a specific archive handler (test hooks use
    /// this to redirect the unpack root).
    pub fn new(archive_handler: ArchivePackageHandler) -> Self {
        Self { archive_handler }
    }

    /// Validate with default options.
    pub fn validate(&self, package_path: &Path) -> Result<ValidationReport, ValidatorError> {
        self.validate_with_options(package_path, &ValidationOptions::default())
    }

    /// Validate the package at `package_path`.
    ///
    /// Accepts an unpacked directory, an archive or a path to a `METS.xml`
    /// (in which case the containing directory is validated). Anything else
    /// and every structural defect short of an unreadable input produces a
    /// report rather than an error.
    pub fn validate_with_options(
        &self,
        package_path: &Path,
        options: &ValidationOptions,
    ) -> Result<ValidationReport, ValidatorError> {
        let name = package_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !package_path.exists() {
            return Ok(bad_path_report(&name, package_path));
        }
        let (to_proc, name, is_archive) = match classify_input(package_path) {
            InputKind::Directory => (package_path.to_path_buf(), name, false),
            InputKind::Archive => match self.archive_handler.unpack_package(package_path) {
                Ok(root) => (root, name, true),
                Err(ArchiveError::MultiRoot { .. }) => {
                    return Ok(multi_root_report(&name));
                }
                Err(ArchiveError::NotArchive { .. }) => {
                    return Ok(bad_path_report(&name, package_path));
                }
                Err(ArchiveError::Digest(crate::digest::DigestError::Cancelled(c))) => {
                    return Err(c.into());
                }
                Err(err) => {
                    return Err(ValidatorError::Input {
                        path: package_path.display().to_string(),
                        reason: err.to_string(),
                    });
                }
            },
            InputKind::MetsFile => {
                let parent = package_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                let parent_name = parent
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (parent, parent_name, false)
            }
            InputKind::Unsupported => {
                return Ok(bad_path_report(&name, package_path));
            }
        };
        info!("validating package {name} at {}", to_proc.display());
        validate(&to_proc, &name, is_archive, options)
    }
}

/// Validate an unpacked package root.
pub fn validate(
    root: &Path,
    name: &str,
    is_archive: bool,
    options: &ValidationOptions,
) -> Result<ValidationReport, ValidatorError> {
    options.cancel.check()?;
    let (struct_valid, struct_checker) = structure::validate(root, is_archive);
    let struct_results = struct_checker.get_test_results();
    if !struct_valid || !options.check_metadata {
        return Ok(ValidationReport::new(
            InformationPackage::new(name, None),
            struct_results,
            None,
        ));
    }

    let metadata = validate_metadata(root, &struct_checker.get_struct_map(), options)?;
    Ok(ValidationReport::new(
        InformationPackage::new(name, Some(ProfileDetails::csip())),
        struct_results,
        Some(metadata),
    ))
}

/// Schema, Schematron and manifest validation over every METS document.
fn validate_metadata(
    root: &Path,
    struct_map: &BTreeMap<String, StructTests>,
    options: &ValidationOptions,
) -> Result<MetadataResults, ValidatorError> {
    let cancel = &options.cancel;
    let mets_path = root.join(METS_NAME);

    // schema pass: the package METS first, then each representation METS it
    // declares (one level deep only)
    let mut outcomes: BTreeMap<String, (PathBuf, MetsParseOutcome)> = BTreeMap::new();
    let root_outcome = MetsValidator::new().validate_mets_cancellable(&mets_path, cancel)?;
    let representation_mets = root_outcome.representation_mets.clone();
    outcomes.insert("root".into(), (mets_path, root_outcome));
    if options.recurse {
        for (rep, mets_ref) in &representation_mets {
            let rep_mets = resolve_in_package(root, &mets_ref.path.to_string_lossy());
            debug!("following representation METS {rep}: {}", rep_mets.display());
            let outcome = MetsValidator::new().validate_mets_cancellable(&rep_mets, cancel)?;
            outcomes.insert(rep.clone(), (rep_mets, outcome));
        }
    }

    let mut schema_status = MetadataStatus::Valid;
    let mut schema_messages = Vec::new();
    let mut schematron_status = MetadataStatus::Valid;
    let mut schematron_messages = Vec::new();
    let mut mets_files: BTreeMap<String, Vec<crate::model::FileRef>> = BTreeMap::new();

    let fallback_structure = StructTests::default();
    for (key, (path, outcome)) in &outcomes {
        schema_messages.extend(outcome.checks.messages.iter().cloned());
        if outcome.schema_valid {
            let structure = struct_map.get(key).unwrap_or(&fallback_structure);
            let (valid, checks) = profile().validate(path, structure, key == "root");
            if !valid {
                schematron_status = MetadataStatus::NotValid;
            }
            schematron_messages.extend(checks.messages);
        } else {
            // schema failure gates Schematron for this document
            schema_status = MetadataStatus::NotValid;
            schematron_status = MetadataStatus::NotValid;
        }
        mets_files.insert(key.clone(), outcome.file_refs.clone());
    }

    match check_manifest(root, &mets_files, options.verify_checksums, cancel) {
        Ok(manifest_errors) => {
            if !manifest_errors.is_empty() {
                schematron_status = MetadataStatus::NotValid;
                schematron_messages.extend(manifest_errors);
            }
        }
        Err(ManifestError::Cancelled(c)) => return Err(c.into()),
        Err(err) => {
            // an unreadable tree below the root is reported, not raised
            schematron_status = MetadataStatus::NotValid;
            schematron_messages.push(TestResult::new(
                "METS",
                root.display().to_string(),
                err.to_string(),
                Severity::Error,
            ));
        }
    }

    Ok(MetadataResults {
        schema_results: MetadataChecks {
            status: schema_status,
            messages: schema_messages,
        },
        schematron_results: MetadataChecks {
            status: schematron_status,
            messages: schematron_messages,
        },
    })
}

/// Resolve a METS-declared location below the package root, stripping the
/// `file://./` relative-package prefix when present.
fn resolve_in_package(root: &Path, location: &str) -> PathBuf {
    match location.strip_prefix(FILE_URI_PREFIX) {
        Some(relative) => root.join(relative),
        None => root.join(location),
    }
}

fn bad_path_report(name: &str, package_path: &Path) -> ValidationReport {
    ValidationReport::new(
        InformationPackage::new(name, None),
        structure::bad_path_results(&package_path.display().to_string()),
        None,
    )
}

fn multi_root_report(name: &str) -> ValidationReport {
    ValidationReport::new(
        InformationPackage::new(name, None),
        structure::multi_root_results(name),
        None,
    )
}
