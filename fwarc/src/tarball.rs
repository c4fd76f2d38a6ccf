use std::io::Write;

use tar::{Builder, EntryType, Header};

use crate::ArchiveError;

// Portable side of the package, duplicates become relative symlinks
pub struct TarWriter<W: Write> {
    inner: Builder<W>,
}

fn new_header(entry_type: EntryType, size: u64) -> Header {
    // Fixed metadata so the same input always yields the same archive
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

impl<W: Write> TarWriter<W> {
    pub fn new(writer: W) -> Self {
        TarWriter {
            inner: Builder::new(writer),
        }
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let mut header = new_header(EntryType::Regular, data.len() as u64);
        self.inner.append_data(&mut header, name, data)?;
        Ok(())
    }

    /// Add `name` as a symlink to `target`, both archive paths.
    pub fn add_symlink(&mut self, name: &str, target: &str) -> Result<(), ArchiveError> {
        let mut header = new_header(EntryType::Symlink, 0);
        self.inner
            .append_link(&mut header, name, relative_target(name, target))?;
        Ok(())
    }

    pub fn finish(self) -> Result<W, ArchiveError> {
        Ok(self.inner.into_inner()?)
    }
}

/// Path of `target` as seen from the directory holding `name`.
pub fn relative_target(name: &str, target: &str) -> String {
    let name: Vec<&str> = name.split('/').collect();
    let target: Vec<&str> = target.split('/').collect();
    let name_dir = &name[..name.len() - 1];
    let target_dir = &target[..target.len() - 1];

    let common = name_dir
        .iter()
        .zip(target_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; name_dir.len() - common];
    parts.extend_from_slice(&target[common..]);
    parts.join("/")
}
