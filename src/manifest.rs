//! Filesystem manifest construction.
//!
//! A manifest is the list of every regular file below a package root with
//! its size and checksums over a requested set of algorithms. Entries are
//! keyed by clean, `/`-separated paths relative to the root; consumers must
//! not rely on entry order.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::trace;
use thiserror::Error;
use walkdir::WalkDir;

use crate::cancel::{CancelToken, Cancelled};
use crate::digest::{Checksums, DigestError};
use crate::model::{ChecksumAlgorithm, Manifest, ManifestEntry};

/// Errors raised while walking a package tree.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The walk itself failed (unreadable directory, broken entry).
    #[error("cannot walk {root}: {source}")]
    Walk {
        /// Root the walk started from.
        root: String,
        /// Underlying walkdir failure.
        #[source]
        source: walkdir::Error,
    },

    /// File metadata could not be read.
    #[error("cannot stat {path}: {source}")]
    Metadata {
        /// The offending file.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Checksumming a file failed.
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// The validation was cancelled mid-walk.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Build a manifest over every regular file below `root`.
///
/// `algorithms` selects which checksums each entry carries; an empty set
/// produces a size-only manifest. Symlinks are resolved through their
/// target and contribute an entry at the link's own relative path when the
/// target is a file.
pub fn manifest_from_dir(
    root: &Path,
    algorithms: &BTreeSet<ChecksumAlgorithm>,
) -> Result<Manifest, ManifestError> {
    manifest_from_dir_cancellable(root, algorithms, &CancelToken::new())
}

/// [`manifest_from_dir`] with a cancellation checkpoint per directory entry.
pub fn manifest_from_dir_cancellable(
    root: &Path,
    algorithms: &BTreeSet<ChecksumAlgorithm>,
    cancel: &CancelToken,
) -> Result<Manifest, ManifestError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root) {
        cancel.check()?;
        let entry = entry.map_err(|source| ManifestError::Walk {
            root: root.display().to_string(),
            source,
        })?;
        let path = entry.path();
        // symlinks count as files when their target is one
        let is_file = if entry.file_type().is_symlink() {
            fs::metadata(path).map(|md| md.is_file()).unwrap_or(false)
        } else {
            entry.file_type().is_file()
        };
        if !is_file {
            continue;
        }
        let metadata = fs::metadata(path).map_err(|source| ManifestError::Metadata {
            path: path.display().to_string(),
            source,
        })?;
        let mut checksums = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            let checksum = Checksums::from_file_cancellable(path, *algorithm, cancel)
                .map_err(|err| match err {
                    DigestError::Cancelled(cancelled) => ManifestError::Cancelled(cancelled),
                    other => ManifestError::Digest(other),
                })?;
            checksums.push(checksum);
        }
        let rel = relative_key(root, path);
        trace!("manifest entry {} ({} bytes)", rel, metadata.len());
        entries.push(ManifestEntry::new(rel, metadata.len(), checksums));
    }
    Ok(Manifest::from_entries("filesystem", entries))
}

/// Clean `/`-separated path of `path` relative to `root`.
fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn algs(list: &[ChecksumAlgorithm]) -> BTreeSet<ChecksumAlgorithm> {
        list.iter().copied().collect()
    }

    fn make_tree(dir: &Path) {
        fs::create_dir_all(dir.join("representations/rep1/data")).unwrap();
        fs::write(dir.join("METS.xml"), b"<mets/>").unwrap();
        fs::write(dir.join("representations/rep1/data/payload.txt"), b"12345").unwrap();
    }

    #[test]
    fn walks_recursively_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path());
        let manifest = manifest_from_dir(dir.path(), &algs(&[])).unwrap();
        assert_eq!(manifest.summary.file_count, 2);
        assert_eq!(manifest.summary.total_size, 7 + 5);
        assert!(manifest.entry("METS.xml").is_some());
        let payload = manifest
            .entry("representations/rep1/data/payload.txt")
            .expect("payload entry");
        assert_eq!(payload.size, 5);
        assert!(payload.checksums.is_empty());
    }

    #[test]
    fn carries_requested_checksums() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path());
        let manifest = manifest_from_dir(
            dir.path(),
            &algs(&[ChecksumAlgorithm::MD5, ChecksumAlgorithm::SHA256]),
        )
        .unwrap();
        let entry = manifest.entry("METS.xml").unwrap();
        assert_eq!(entry.checksums.len(), 2);
        let expected = Checksums::from_data(b"<mets/>", ChecksumAlgorithm::MD5);
        assert!(entry.checksums.contains(&expected));
    }

    #[test]
    fn empty_directory_yields_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_from_dir(dir.path(), &algs(&[])).unwrap();
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.summary.file_count, 0);
        assert_eq!(manifest.summary.total_size, 0);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_to_file_counts_as_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(dir.path().join("target.txt")).unwrap();
        f.write_all(b"abc").unwrap();
        std::os::unix::fs::symlink(dir.path().join("target.txt"), dir.path().join("link.txt"))
            .unwrap();
        let manifest = manifest_from_dir(dir.path(), &algs(&[])).unwrap();
        assert!(manifest.entry("link.txt").is_some());
        assert_eq!(manifest.entry("link.txt").unwrap().size, 3);
    }

    #[test]
    fn cancelled_token_stops_walk() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path());
        let token = CancelToken::new();
        token.cancel();
        let err = manifest_from_dir_cancellable(dir.path(), &algs(&[]), &token).unwrap_err();
        assert!(matches!(err, ManifestError::Cancelled(_)));
    }
}
