//! Archived package handling.
//!
//! Information packages arrive as ZIP archives, plain tarballs or gzipped
//! tarballs. Archives are unpacked below a content-addressed directory named
//! after the SHA-1 of the archive file, which makes re-validation of the
//! same archive reuse the previous extraction. The CSIP requires an archive
//! to unpack to exactly one root folder; anything else is rejected and the
//! extraction directory is removed again.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::debug;
use tar::Archive;
use thiserror::Error;
use zip::ZipArchive;

use crate::digest::{Checksums, DigestError};
use crate::model::ChecksumAlgorithm;

/// Errors raised while unpacking an archived package.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The path is not a file of a recognised archive format.
    #[error("{path} does not reference a file of known archive format (zip or tar)")]
    NotArchive {
        /// The offending path.
        path: String,
    },

    /// The archive did not unpack to exactly one root directory.
    #[error("unpacking archive yields {children} children, expected a single root directory")]
    MultiRoot {
        /// Number of entries found below the extraction directory.
        children: usize,
    },

    /// Filesystem failure during extraction.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive payload itself is corrupt.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Digest of the archive file failed.
    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// Archive container formats we can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

/// Unpacks archived information packages below a configurable root.
#[derive(Debug, Clone)]
pub struct ArchivePackageHandler {
    unpack_root: PathBuf,
}

impl Default for ArchivePackageHandler {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ArchivePackageHandler {
    /// Create a handler unpacking below the given root directory.
    pub fn new(unpack_root: impl Into<PathBuf>) -> Self {
        Self {
            unpack_root: unpack_root.into(),
        }
    }

    /// The directory extractions are placed under.
    pub fn unpack_root(&self) -> &Path {
        &self.unpack_root
    }

    /// True when the path is a regular file in a recognised archive format.
    pub fn is_archive(path: &Path) -> bool {
        path.is_file() && detect_kind(path).is_some()
    }

    /// Unpack an archive to `{unpack_root}/{sha1-of-archive}` and return the
    /// single directory the package unpacked to.
    ///
    /// An existing extraction for the same archive content is reused.
    pub fn unpack_package(&self, to_unpack: &Path) -> Result<PathBuf, ArchiveError> {
        let kind = if to_unpack.is_file() {
            detect_kind(to_unpack)
        } else {
            None
        };
        let kind = kind.ok_or_else(|| ArchiveError::NotArchive {
            path: to_unpack.display().to_string(),
        })?;

        let sha1 = Checksums::from_file(to_unpack, ChecksumAlgorithm::SHA1)?;
        let destination = self.unpack_root.join(&sha1.value);
        if !destination.is_dir() {
            debug!(
                "unpacking {} to {}",
                to_unpack.display(),
                destination.display()
            );
            fs::create_dir_all(&destination)?;
            if let Err(err) = extract(to_unpack, kind, &destination) {
                let _ = fs::remove_dir_all(&destination);
                return Err(err);
            }
        } else {
            debug!("reusing existing extraction at {}", destination.display());
        }

        single_root(&destination).map_err(|err| {
            let _ = fs::remove_dir_all(&destination);
            err
        })
    }
}

fn extract(archive: &Path, kind: ArchiveKind, destination: &Path) -> Result<(), ArchiveError> {
    match kind {
        ArchiveKind::Zip => {
            let mut zip = ZipArchive::new(File::open(archive)?)?;
            zip.extract(destination)?;
        }
        ArchiveKind::Tar => {
            Archive::new(File::open(archive)?).unpack(destination)?;
        }
        ArchiveKind::TarGz => {
            Archive::new(GzDecoder::new(File::open(archive)?)).unpack(destination)?;
        }
    }
    Ok(())
}

/// Verify the single-root invariant and return the root directory.
fn single_root(destination: &Path) -> Result<PathBuf, ArchiveError> {
    let children: Vec<PathBuf> = fs::read_dir(destination)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    match children.as_slice() {
        [child] if child.is_dir() => Ok(child.clone()),
        _ => Err(ArchiveError::MultiRoot {
            children: children.len(),
        }),
    }
}

/// Sniff the archive format from magic bytes: `PK` for ZIP, `1f 8b` for
/// gzip (assumed to wrap a tarball) and the `ustar` tag at offset 257 for
/// POSIX/GNU tar.
fn detect_kind(path: &Path) -> Option<ArchiveKind> {
    let mut file = File::open(path).ok()?;
    let mut head = [0u8; 265];
    let read = read_up_to(&mut file, &mut head).ok()?;
    let head = &head[..read];

    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Some(ArchiveKind::Zip);
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return Some(ArchiveKind::TarGz);
    }
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return Some(ArchiveKind::Tar);
    }
    None
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let read = file.read(&mut buf[total..])?;
        if read == 0 {
            break;
        }
        total += read;
    }
    Ok(total)
}
