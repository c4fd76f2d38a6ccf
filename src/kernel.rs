//! Firmware embedded in the kernelcache
//!
//! The only blob pulled out of the kernel today is the ASMedia ASM2214A
//! USB/PCIe bridge firmware, found by its `2214A_RCFG` marker.

use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};
use thiserror::Error;

use fwcore::ContentFile;

use crate::collect::{list_dir, Collected, Collector};
use crate::img4::{self, ContainerError, Decompress};
use crate::Error;

pub const ASMEDIA_MAGIC: &[u8] = b"2214A_RCFG";
pub const ASMEDIA_SIZE: u32 = 0x18000;
pub const ASMEDIA_NAME: &str = "asmedia/asm2214a-apple.bin";

const SIZE_OFFSET: usize = 0x2f;
const DATA_OFFSET: usize = 0x33;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("could not find ASMedia firmware")]
    MissingMarker,
    #[error("unexpected ASMedia firmware size {0:#x}")]
    UnexpectedSize(u32),
    #[error("ASMedia firmware truncated")]
    Truncated,
    #[error("kernelcache: {0}")]
    Container(#[from] ContainerError),
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The ASM2214A firmware inside a decoded kernel image.
pub fn extract_asmedia(kernel: &[u8]) -> Result<ContentFile, KernelError> {
    let off = find(kernel, ASMEDIA_MAGIC).ok_or(KernelError::MissingMarker)?;

    let size_at = off + SIZE_OFFSET;
    let size = kernel
        .get(size_at..size_at + 4)
        .map(LittleEndian::read_u32)
        .ok_or(KernelError::Truncated)?;
    if size != ASMEDIA_SIZE {
        return Err(KernelError::UnexpectedSize(size));
    }

    let start = off + DATA_OFFSET;
    let data = kernel
        .get(start..start + size as usize)
        .ok_or(KernelError::Truncated)?;
    Ok(ContentFile::new(ASMEDIA_NAME, data.to_vec()))
}

/// Kernelcache container bytes to firmware files.
pub fn kernel_firmware(image: &[u8], codec: &dyn Decompress) -> Result<Collected, KernelError> {
    let (_, kernel) = img4::extract(image, codec)?;
    let fw = extract_asmedia(&kernel)?;
    Ok(vec![(ASMEDIA_NAME.to_string(), fw)])
}

pub struct KernelCollector<'a> {
    codec: &'a dyn Decompress,
}

impl<'a> KernelCollector<'a> {
    pub fn new(codec: &'a dyn Decompress) -> Self {
        KernelCollector { codec }
    }

    fn kernelcache(source: &Path) -> Result<Option<PathBuf>, Error> {
        if !source.is_dir() {
            return Ok(source.is_file().then(|| source.to_path_buf()));
        }
        Ok(list_dir(source)?
            .into_iter()
            .find(|(name, path)| name.starts_with("kernelcache") && path.is_file())
            .map(|(_, path)| path))
    }
}

impl Collector for KernelCollector<'_> {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        let Some(kern_path) = Self::kernelcache(source)? else {
            warn!("could not find kernelcache in {}", source.display());
            return Ok(vec![]);
        };

        info!("Extracting firmware from kernel at {}", kern_path.display());
        let image = std::fs::read(&kern_path)?;
        match kernel_firmware(&image, self.codec) {
            Ok(files) => Ok(files),
            Err(e) => {
                warn!("{}: {}", kern_path.display(), e);
                Ok(vec![])
            }
        }
    }
}

#[cfg(test)]
mod test_kernel {
    use super::*;
    use crate::img4::test_util::im4p;
    use crate::img4::NoCodec;

    fn kernel_with(size: u32, fill: usize) -> (Vec<u8>, Vec<u8>) {
        let mut kernel = vec![0x55u8; 100];
        let off = kernel.len();
        kernel.extend_from_slice(ASMEDIA_MAGIC);
        kernel.resize(off + SIZE_OFFSET, 0);
        kernel.extend_from_slice(&size.to_le_bytes());

        let fw: Vec<u8> = (0..fill).map(|i| (i % 251) as u8).collect();
        kernel.extend_from_slice(&fw);
        kernel.extend_from_slice(b"trailer");
        (kernel, fw)
    }

    #[test]
    fn finds_firmware() {
        let (kernel, fw) = kernel_with(ASMEDIA_SIZE, ASMEDIA_SIZE as usize);
        let file = extract_asmedia(&kernel).unwrap();
        assert_eq!(file.len(), 0x18000);
        assert_eq!(file.data(), &fw[..]);
    }

    #[test]
    fn wrong_size() {
        let (kernel, _) = kernel_with(0x1000, 0x1000);
        assert!(matches!(
            extract_asmedia(&kernel),
            Err(KernelError::UnexpectedSize(0x1000))
        ));
    }

    #[test]
    fn truncated() {
        let (kernel, _) = kernel_with(ASMEDIA_SIZE, 16);
        assert!(matches!(
            extract_asmedia(&kernel),
            Err(KernelError::Truncated)
        ));
        assert!(matches!(
            extract_asmedia(b"xx2214A_RCFG"),
            Err(KernelError::Truncated)
        ));
    }

    #[test]
    fn no_marker() {
        assert!(matches!(
            extract_asmedia(&[0u8; 256]),
            Err(KernelError::MissingMarker)
        ));
    }

    #[test]
    fn collects_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, fw) = kernel_with(ASMEDIA_SIZE, ASMEDIA_SIZE as usize);
        std::fs::write(dir.path().join("kernelcache.release.t8103"), im4p("krnl", &kernel, None))
            .unwrap();
        std::fs::write(dir.path().join("boot.efi"), b"nope").unwrap();

        let files = KernelCollector::new(&NoCodec).collect(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, ASMEDIA_NAME);
        assert_eq!(files[0].1.data(), &fw[..]);
    }

    #[test]
    fn missing_kernel_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let collector = KernelCollector::new(&NoCodec);
        assert!(collector.collect(dir.path()).unwrap().is_empty());

        std::fs::write(dir.path().join("kernelcache"), b"not a container").unwrap();
        assert!(collector.collect(dir.path()).unwrap().is_empty());
    }
}
