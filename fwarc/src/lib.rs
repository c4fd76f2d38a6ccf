//! Deduplicating firmware package writer
//!
//! Collected firmware is written twice from the same stream of
//! `(logical name, ContentFile)` pairs:
//!
//! | Output  | Dedup        | Consumer |
//! | ------- | ------------ | -------- |
//! | tar     | symlinks     | installer, anything with a tar reader |
//! | cpio    | hard links   | early boot firmware loader (newc only, no symlinks) |
//!
//! plus a plain text [`manifest::Manifest`] recording, in first seen order,
//! which names carry content and which ones link to an earlier name.
//!
//! The cpio side needs a seekable sink, see [`cpio::CpioWriter`].

use thiserror::Error;

pub mod cpio;
pub mod manifest;
pub mod package;
pub mod tarball;

pub use manifest::{Manifest, ManifestEntry};
pub use package::{Finished, Package};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("logical name added twice: {0}")]
    DuplicateLogicalName(String),
    #[error("invalid archive path: {0:?}")]
    InvalidName(String),
    #[error("link target was never added: {0}")]
    UnknownTarget(String),
    #[error("file too large for the archive format: {0}")]
    TooLarge(String),
}

// Paths land verbatim in both archives, so keep them relative, ascii and
// free of `..` and empty components.
pub(crate) fn check_name(name: &str) -> Result<(), ArchiveError> {
    let valid = !name.is_empty()
        && name.is_ascii()
        && !name.contains('\0')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");

    if valid {
        Ok(())
    } else {
        Err(ArchiveError::InvalidName(name.to_string()))
    }
}
