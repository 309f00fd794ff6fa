//! Cross-check of METS-declared file references against the filesystem.
//!
//! Every METS document declares the files it covers with a path, a size and
//! usually a checksum. The reconciler rebuilds a manifest over the unpacked
//! package and compares the declarations entry by entry: a size mismatch is
//! a CSIP69 error, a checksum mismatch a CSIP71 error. Files present on
//! disk but undeclared are allowed (CSIPSTR14 permits extras), and a
//! declared file missing from disk is the file-section validator's finding,
//! not ours.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::debug;

use crate::cancel::CancelToken;
use crate::manifest::{manifest_from_dir_cancellable, ManifestError};
use crate::model::{FileRef, Manifest, ManifestEntry, Severity, TestResult};
use crate::structure::METS_NAME;

const SIZE_LOCATION: &str = "mets/fileSec/fileGrp/file/@SIZE";
const CHECKSUM_LOCATION: &str = "mets/fileSec/fileGrp/file/@CHECKSUM";

/// Reconcile the per-METS file references with the package on disk.
///
/// `mets_refs` maps `"root"` and each representation name to the file
/// references its METS declared. When `verify_checksums` is off the
/// manifest is built without digests and only sizes are compared.
pub fn check_manifest(
    root: &Path,
    mets_refs: &BTreeMap<String, Vec<FileRef>>,
    verify_checksums: bool,
    cancel: &CancelToken,
) -> Result<Vec<TestResult>, ManifestError> {
    let mut algorithms = BTreeSet::new();
    if verify_checksums {
        for refs in mets_refs.values() {
            for file_ref in refs {
                if let Some(checksum) = &file_ref.checksum {
                    algorithms.insert(checksum.algorithm);
                }
            }
        }
    }
    let manifest = manifest_from_dir_cancellable(root, &algorithms, cancel)?;
    debug!(
        "reconciling {} declared refs against {} files on disk",
        mets_refs.values().map(Vec::len).sum::<usize>(),
        manifest.summary.file_count
    );
    Ok(manifest_errors(mets_refs, &manifest, verify_checksums))
}

fn manifest_errors(
    mets_refs: &BTreeMap<String, Vec<FileRef>>,
    manifest: &Manifest,
    verify_checksums: bool,
) -> Vec<TestResult> {
    let mut errors = Vec::new();
    for (key, refs) in mets_refs {
        for file_ref in refs {
            let ref_path = expected_path(key, file_ref);
            if let Some(entry) = manifest.entry(&ref_path) {
                errors.extend(check_entry(entry, file_ref, key, verify_checksums));
            }
        }
    }
    errors
}

/// The path a reference resolves to below the package root: representation
/// references live under `representations/<rep>/`.
fn expected_path(key: &str, file_ref: &FileRef) -> String {
    let rel: Vec<String> = file_ref
        .path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let rel = rel.join("/");
    if key == "root" {
        rel
    } else {
        format!("representations/{key}/{rel}")
    }
}

fn check_entry(
    entry: &ManifestEntry,
    file_ref: &FileRef,
    key: &str,
    verify_checksums: bool,
) -> Vec<TestResult> {
    let mut errors = Vec::new();
    // string comparison sidesteps integer parsing of damaged attributes
    let declared_size = file_ref.size.clone().unwrap_or_else(|| "None".into());
    if declared_size != entry.size.to_string() {
        errors.push(TestResult::new(
            "CSIP69",
            SIZE_LOCATION,
            format!(
                "{SIZE_LOCATION}: {declared_size} declared in {key} {METS_NAME} \
                 and size of file {}: {} aren't equal.",
                entry.path, entry.size
            ),
            Severity::Error,
        ));
    }
    if verify_checksums {
        if let Some(declared) = &file_ref.checksum {
            let matched = entry.checksums.iter().any(|checksum| checksum == declared);
            if !matched {
                errors.push(TestResult::new(
                    "CSIP71",
                    CHECKSUM_LOCATION,
                    format!(
                        "{CHECKSUM_LOCATION}: {} declared in {key} {METS_NAME} \
                         and checksum of file {} aren't equal.",
                        declared.value, entry.path
                    ),
                    Severity::Error,
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Checksums;
    use crate::model::{Checksum, ChecksumAlgorithm};
    use std::fs;

    fn refs(key: &str, list: Vec<FileRef>) -> BTreeMap<String, Vec<FileRef>> {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), list);
        map
    }

    fn write_payload(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn no_declared_files_no_findings() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "data/extra.txt", b"undeclared");
        let errors =
            check_manifest(dir.path(), &refs("root", vec![]), true, &CancelToken::new())
                .unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn correct_declaration_yields_no_findings() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "data/payload.txt", b"12345");
        let checksum = Checksums::from_data(b"12345", ChecksumAlgorithm::SHA256);
        let file_ref = FileRef::new("data/payload.txt", Some("5".into()), Some(checksum));
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(errors.is_empty(), "unexpected: {errors:?}");
    }

    #[test]
    fn size_mismatch_fires_csip69() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "data/payload.txt", b"12345");
        let file_ref = FileRef::new("data/payload.txt", Some("9999".into()), None);
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule_id, "CSIP69");
        assert_eq!(errors[0].severity, Severity::Error);
    }

    #[test]
    fn corrupted_payload_fires_csip71() {
        let dir = tempfile::tempdir().unwrap();
        let checksum = Checksums::from_data(b"12345", ChecksumAlgorithm::MD5);
        // one byte flipped on disk relative to the declaration
        write_payload(dir.path(), "data/payload.txt", b"12045");
        let file_ref = FileRef::new("data/payload.txt", Some("5".into()), Some(checksum));
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule_id, "CSIP71");
    }

    #[test]
    fn checksum_comparison_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "data/payload.txt", b"12345");
        let mut checksum = Checksums::from_data(b"12345", ChecksumAlgorithm::SHA1);
        checksum.value = checksum.value.to_ascii_uppercase();
        let file_ref = FileRef::new("data/payload.txt", Some("5".into()), Some(checksum));
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn representation_refs_resolve_below_representations() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "representations/rep1/data/a.txt", b"abc");
        let file_ref = FileRef::new("data/a.txt", Some("99".into()), None);
        let errors = check_manifest(
            dir.path(),
            &refs("rep1", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        // found below representations/rep1/, so the size mismatch fires
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule_id, "CSIP69");
    }

    #[test]
    fn missing_filesystem_entry_yields_no_finding() {
        let dir = tempfile::tempdir().unwrap();
        let file_ref = FileRef::new("data/ghost.txt", Some("5".into()), None);
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn checksum_check_disabled_compares_sizes_only() {
        let dir = tempfile::tempdir().unwrap();
        write_payload(dir.path(), "data/payload.txt", b"12345");
        let wrong = Checksum::new(ChecksumAlgorithm::MD5, "definitely-wrong");
        let file_ref = FileRef::new("data/payload.txt", Some("5".into()), Some(wrong));
        let errors = check_manifest(
            dir.path(),
            &refs("root", vec![file_ref]),
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(errors.is_empty());
    }
}
