//! Checksum calculation for package files.
//!
//! Files are streamed through the requested algorithm in 64 KiB blocks, so
//! arbitrarily large payload files never have to fit in memory. Digest
//! values are always lowercase hex.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::model::{Checksum, ChecksumAlgorithm};

const BLOCK_SIZE: usize = 1024 * 64;

/// Errors raised while digesting a file.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The file could not be opened or read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The validation was cancelled mid-stream.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Factory methods for [`Checksum`] values.
pub struct Checksums;

impl Checksums {
    /// Digest a file with the given algorithm.
    pub fn from_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Checksum, DigestError> {
        Self::from_file_cancellable(path, algorithm, &CancelToken::new())
    }

    /// Digest a file, checking the token between blocks.
    pub fn from_file_cancellable(
        path: &Path,
        algorithm: ChecksumAlgorithm,
        cancel: &CancelToken,
    ) -> Result<Checksum, DigestError> {
        let io_err = |source| DigestError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut hasher = AnyHasher::new(algorithm);
        loop {
            cancel.check()?;
            let read = file.read(&mut buf).map_err(io_err)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hasher.finish())
    }

    /// Digest an in-memory buffer.
    pub fn from_data(data: &[u8], algorithm: ChecksumAlgorithm) -> Checksum {
        let mut hasher = AnyHasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }
}

/// Dispatches updates to whichever hasher the algorithm selects.
enum AnyHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl AnyHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::MD5 => AnyHasher::Md5(Md5::new()),
            ChecksumAlgorithm::SHA1 => AnyHasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::SHA256 => AnyHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::SHA512 => AnyHasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            AnyHasher::Md5(h) => h.update(data),
            AnyHasher::Sha1(h) => h.update(data),
            AnyHasher::Sha256(h) => h.update(data),
            AnyHasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Checksum {
        match self {
            AnyHasher::Md5(h) => {
                Checksum::new(ChecksumAlgorithm::MD5, hex::encode(h.finalize()))
            }
            AnyHasher::Sha1(h) => {
                Checksum::new(ChecksumAlgorithm::SHA1, hex::encode(h.finalize()))
            }
            AnyHasher::Sha256(h) => {
                Checksum::new(ChecksumAlgorithm::SHA256, hex::encode(h.finalize()))
            }
            AnyHasher::Sha512(h) => {
                Checksum::new(ChecksumAlgorithm::SHA512, hex::encode(h.finalize()))
            }
        }
    }
}
