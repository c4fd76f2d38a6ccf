use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fwcore::hash::Digest;

/// One line of the manifest.
///
/// `Link::target` is always the path of an earlier `File` entry with the
/// same digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    File { path: String, digest: Digest },
    Link { path: String, target: String },
}

impl ManifestEntry {
    pub fn path(&self) -> &str {
        match self {
            ManifestEntry::File { path, .. } => path,
            ManifestEntry::Link { path, .. } => path,
        }
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestEntry::File { path, digest } => write!(f, "FILE {} SHA256 {}", path, digest),
            ManifestEntry::Link { path, target } => write!(f, "LINK {} {}", path, target),
        }
    }
}

// Append only, kept in first seen order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest::default()
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ManifestEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for entry in &self.entries {
            writeln!(writer, "{}", entry)?;
        }
        writer.flush()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.to_string().as_bytes());
            out.push(b'\n');
        }
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }
}
