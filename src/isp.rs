//! Camera (ISP) sensor calibration "setfiles"
//!
//! The camera daemon embeds one calibration region per supported sensor,
//! each starting on a 4K boundary with a 32 byte big endian header whose
//! first word is a per-sensor magic.

use std::collections::HashSet;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use log::{info, warn};

use fwcore::buf::round_up;
use fwcore::ContentFile;

use crate::collect::{Collected, Collector};
use crate::Error;

pub const SETFILE_ALIGNMENT: usize = 0x1000;
const HEADER_WORDS: usize = 8;
const HEADER_LEN: usize = HEADER_WORDS * 4;

pub const CAMERA_DAEMON: &str = "appleh13camerad";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetFile {
    pub sensor: u32,
    pub magic: u32,
    pub label: &'static str,
    pub size: usize,
}

const fn setfile(sensor: u32, magic: u32, label: &'static str, size: usize) -> SetFile {
    SetFile {
        sensor,
        magic,
        label,
        size,
    }
}

pub static SETFILES: [SetFile; 6] = [
    setfile(0x248, 0x18200103, "1820_01XX", 0x442c),
    setfile(0x248, 0x18220201, "1822_02XX", 0x442c),
    setfile(0x364, 0x87200103, "8720_01XX", 0x36ac),
    setfile(0x364, 0x87230101, "8723_01XX", 0x361c),
    setfile(0x558, 0x19210106, "1921_01XX", 0xad40),
    setfile(0x558, 0x19220201, "1922_02XX", 0xad40),
];

pub fn lookup(magic: u32) -> Option<&'static SetFile> {
    SETFILES.iter().find(|s| s.magic == magic)
}

fn header_check(hdr: &[u32; HEADER_WORDS]) -> bool {
    hdr[2] == 0
        && hdr[3] == 0
        && hdr[4] & 0xff000000 == hdr[4]
        && hdr[4] != 0
        && hdr[5] & 0xffff0000 == hdr[5]
        && hdr[5] != 0
        && hdr[6] == 0
        && hdr[7] == 0x03c00000
}

/// Single forward pass over a blob, yielding `(setfile, region)` for every
/// aligned offset holding a valid header with a known magic.
///
/// Every aligned offset is checked, including those inside a region that
/// was just emitted. Once exhausted it logs how much of the catalog was
/// found.
pub struct SetfileScanner<'a> {
    data: &'a [u8],
    offset: usize,
    found: HashSet<u32>,
    done: bool,
}

impl<'a> SetfileScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SetfileScanner {
            data,
            offset: 0,
            found: HashSet::new(),
            done: false,
        }
    }

    /// Distinct catalog entries seen so far.
    pub fn found(&self) -> usize {
        self.found.len()
    }

    fn report(&self) {
        let found = self.found.len();
        let total = SETFILES.len();
        if found == total {
            info!("isp-extract: Found all {}/{} sensor calibration files", found, total);
        } else {
            warn!("isp-extract: Found {} of {} calibration files", found, total);
        }
    }
}

impl<'a> Iterator for SetfileScanner<'a> {
    type Item = (&'static SetFile, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.offset + HEADER_LEN <= self.data.len() {
            let offset = self.offset;
            self.offset += SETFILE_ALIGNMENT;

            let mut hdr = [0u32; HEADER_WORDS];
            BigEndian::read_u32_into(&self.data[offset..offset + HEADER_LEN], &mut hdr);
            if !header_check(&hdr) {
                continue;
            }
            let Some(setfile) = lookup(hdr[0]) else {
                continue;
            };

            let end = (offset + round_up(setfile.size, 64)).min(self.data.len());
            self.found.insert(setfile.magic);
            info!(
                "isp-extract: {}/{}: Found sensor {:x}_{} data at offset {:#x}",
                self.found.len(),
                SETFILES.len(),
                setfile.sensor,
                setfile.label,
                offset
            );
            return Some((setfile, &self.data[offset..end]));
        }

        self.done = true;
        self.report();
        None
    }
}

pub fn scan(data: &[u8]) -> SetfileScanner<'_> {
    SetfileScanner::new(data)
}

pub fn setfile_name(setfile: &SetFile) -> String {
    format!("apple/isp_{}.dat", setfile.label)
}

/// Sensor calibration from the camera daemon binary.
pub struct IspCollector;

impl Collector for IspCollector {
    fn name(&self) -> &'static str {
        "isp"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        let bin_path = if source.is_dir() {
            source.join(CAMERA_DAEMON)
        } else {
            source.to_path_buf()
        };

        if !bin_path.exists() {
            warn!(
                "{} not found, cannot extract ISP camera calibration; webcam output will be low quality",
                bin_path.display()
            );
            return Ok(Vec::new());
        }

        info!("Extracting firmware from camera daemon at {}", bin_path.display());
        let data = std::fs::read(&bin_path)?;

        let mut seen = HashSet::new();
        let mut out = vec![];
        for (setfile, region) in scan(&data) {
            let name = setfile_name(setfile);
            if !seen.insert(setfile.magic) {
                warn!("isp-extract: skipping repeated {} calibration data", name);
                continue;
            }
            out.push((name.clone(), ContentFile::new(name, region.to_vec())));
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use byteorder::{BigEndian, ByteOrder};

    pub fn put_header(blob: &mut [u8], offset: usize, magic: u32) {
        let hdr: [u32; 8] = [magic, 0x1234, 0, 0, 0x01000000, 0x00020000, 0, 0x03c00000];
        BigEndian::write_u32_into(&hdr, &mut blob[offset..offset + 32]);
    }
}


#[cfg(test)]
mod test_isp_collector {
    use super::test_util::put_header;
    use super::*;

    #[test]
    fn from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0u8; 0x20000];
        put_header(&mut blob, 0x2000, 0x87230101);
        std::fs::write(dir.path().join(CAMERA_DAEMON), &blob).unwrap();

        let files = IspCollector.collect(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "apple/isp_8723_01XX.dat");
        assert_eq!(files[0].1.len(), 0x3640);
    }

    #[test]
    fn repeated_magic_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0u8; 0x20000];
        put_header(&mut blob, 0, 0x18200103);
        put_header(&mut blob, 0x10000, 0x18200103);
        blob[0x10100] = 0xaa;
        put_header(&mut blob, 0x8000, 0x87200103);
        std::fs::write(dir.path().join(CAMERA_DAEMON), &blob).unwrap();

        let files = IspCollector.collect(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["apple/isp_1820_01XX.dat", "apple/isp_8720_01XX.dat"]);
        assert_eq!(files[0].1.data(), &blob[..0x4440]);
    }

    #[test]
    fn missing_daemon_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IspCollector.collect(dir.path()).unwrap().is_empty());
    }
}
