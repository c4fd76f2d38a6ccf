use std::collections::{HashMap, HashSet};
use std::io::{Seek, Write};

use log::info;

use fwcore::hash::Digest;
use fwcore::ContentFile;

use crate::check_name;
use crate::cpio::CpioWriter;
use crate::manifest::{Manifest, ManifestEntry};
use crate::tarball::TarWriter;
use crate::ArchiveError;

pub const MANIFEST_NAME: &str = "manifest.txt";

pub struct Finished<T, C> {
    pub tar: T,
    pub cpio: C,
    pub manifest: Manifest,
}

/// Builds the tar and cpio packages side by side.
///
/// The first name seen for a digest carries the bytes, later names become a
/// symlink in the tar and a hard link in the cpio. Not meant to be shared
/// between threads, one collector run feeds one package.
pub struct Package<T: Write, C: Write + Seek> {
    tar: TarWriter<T>,
    cpio: CpioWriter<C>,
    hashes: HashMap<Digest, String>,
    names: HashSet<String>,
    manifest: Manifest,
}

impl<T: Write, C: Write + Seek> Package<T, C> {
    pub fn new(tar: T, cpio: C, cpio_prefix: Option<&str>) -> Self {
        Package {
            tar: TarWriter::new(tar),
            cpio: CpioWriter::new(cpio, cpio_prefix),
            hashes: HashMap::new(),
            names: HashSet::new(),
            manifest: Manifest::new(),
        }
    }

    pub fn add_file(&mut self, name: &str, file: &ContentFile) -> Result<(), ArchiveError> {
        check_name(name)?;
        if name == MANIFEST_NAME || !self.names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateLogicalName(name.to_string()));
        }

        let entry = match self.hashes.get(file.digest()) {
            Some(target) => {
                self.tar.add_symlink(name, target)?;
                self.cpio.add_link(name, target)?;
                ManifestEntry::Link {
                    path: name.to_string(),
                    target: target.clone(),
                }
            }
            None => {
                self.tar.add_file(name, file.data())?;
                self.cpio.add_file(name, file.data())?;
                self.hashes.insert(*file.digest(), name.to_string());
                ManifestEntry::File {
                    path: name.to_string(),
                    digest: *file.digest(),
                }
            }
        };

        info!("+ {}", entry);
        self.manifest.push(entry);
        Ok(())
    }

    pub fn add_files<'a, I>(&mut self, files: I) -> Result<(), ArchiveError>
    where
        I: IntoIterator<Item = &'a (String, ContentFile)>,
    {
        for (name, file) in files {
            self.add_file(name, file)?;
        }
        Ok(())
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Seal both archives; the tar also gets the manifest as its last entry.
    pub fn close(mut self) -> Result<Finished<T, C>, ArchiveError> {
        self.tar.add_file(MANIFEST_NAME, &self.manifest.to_bytes())?;

        Ok(Finished {
            tar: self.tar.finish()?,
            cpio: self.cpio.finish()?,
            manifest: self.manifest,
        })
    }
}
