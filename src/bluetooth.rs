//! Bluetooth firmware for the PCIe attached Broadcom chips
//!
//! Vendor file names look like `BCM4388B0_PCIE_macOS_Tokara_MUR.bin`: chip
//! and stepping, the board the module sits on, and the module vendor. Each
//! chip identity has a firmware binary (`.bin`) and a patch table (`.ptb`).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

use fwcore::ContentFile;

use crate::collect::{list_dir, Collected, Collector};
use crate::Error;

pub const PLATFORM_NAMESPACE: &str = "apple,";

/// Module vendor markers and the tag each implies; `None` is generic.
pub static VENDOR_MARKERS: [(&str, Option<&str>); 3] =
    [("MUR", Some("m")), ("USI", Some("u")), ("GEN", None)];

// Tokens between PCIE and the board name
const PLATFORM_SKIP: [&str; 2] = ["macOS", "Willamette"];
const PLATFORM_SUFFIXES: [&str; 1] = ["ES2"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("unexpected firmware file name {0:?}")]
    UnexpectedName(String),
    #[error("cannot find board type in {0:?}")]
    NoPlatform(String),
    #[error("unable to determine vendor ({found} candidates) in {name:?}")]
    Vendor { name: String, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChipIdentity {
    pub chip: String,
    pub stepping: String,
    pub platform: String,
    pub vendor: Option<String>,
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "brcmbt{}{}-{}", self.chip, self.stepping, self.platform)?;
        if let Some(vendor) = &self.vendor {
            write!(f, "-{}", vendor)?;
        }
        Ok(())
    }
}

impl ChipIdentity {
    pub fn base_name(&self) -> String {
        format!("brcm/{}", self)
    }
}

// bcm<4 digits><letter><digit>
fn parse_chip_token(token: &str) -> Option<(String, String)> {
    let token = token.to_ascii_lowercase();
    let rest = token.strip_prefix("bcm")?;
    let bytes = rest.as_bytes();

    if bytes.len() != 6
        || !bytes[..4].iter().all(u8::is_ascii_digit)
        || !bytes[4].is_ascii_lowercase()
        || !bytes[5].is_ascii_digit()
    {
        return None;
    }
    Some((rest[..4].to_string(), rest[4..].to_string()))
}

/// Parse a firmware file stem (no extension) into its chip identity.
pub fn parse(stem: &str) -> Result<ChipIdentity, ParseFailure> {
    let tokens: Vec<&str> = stem.split('_').collect();

    let (chip, stepping) = parse_chip_token(tokens[0])
        .ok_or_else(|| ParseFailure::UnexpectedName(stem.to_string()))?;

    let pcie = tokens
        .iter()
        .position(|t| *t == "PCIE")
        .ok_or_else(|| ParseFailure::NoPlatform(stem.to_string()))?;

    let mut idx = pcie + 1;
    for skip in PLATFORM_SKIP {
        if tokens.get(idx) == Some(&skip) {
            idx += 1;
        }
    }
    let mut platform = *tokens
        .get(idx)
        .ok_or_else(|| ParseFailure::NoPlatform(stem.to_string()))?;
    for suffix in PLATFORM_SUFFIXES {
        platform = platform.strip_suffix(suffix).unwrap_or(platform);
    }
    if platform.is_empty() {
        return Err(ParseFailure::NoPlatform(stem.to_string()));
    }

    let mut vendors: Vec<Option<&str>> = VENDOR_MARKERS
        .iter()
        .filter(|(marker, _)| tokens.contains(marker))
        .map(|(_, tag)| *tag)
        .collect();
    vendors.dedup();
    if vendors.len() != 1 {
        return Err(ParseFailure::Vendor {
            name: stem.to_string(),
            found: vendors.len(),
        });
    }

    Ok(ChipIdentity {
        chip,
        stepping,
        platform: format!("{}{}", PLATFORM_NAMESPACE, platform.to_lowercase()),
        vendor: vendors[0].map(str::to_string),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Binary,
    PatchTable,
}

#[derive(Debug, Default)]
pub struct ChipFirmware {
    pub binary: Option<ContentFile>,
    pub patch_table: Option<ContentFile>,
}

impl ChipFirmware {
    fn slot(&mut self, slot: Slot) -> &mut Option<ContentFile> {
        match slot {
            Slot::Binary => &mut self.binary,
            Slot::PatchTable => &mut self.patch_table,
        }
    }
}

/// Per identity firmware records, keyed in identity order.
#[derive(Debug, Default)]
pub struct BluetoothFirmware {
    chips: BTreeMap<ChipIdentity, ChipFirmware>,
}

impl BluetoothFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn get(&self, chip: &ChipIdentity) -> Option<&ChipFirmware> {
        self.chips.get(chip)
    }

    /// Register one vendor file; returns false if it was skipped.
    pub fn insert(&mut self, file_name: &str, data: Vec<u8>) -> bool {
        let (stem, slot) = if let Some(stem) = file_name.strip_suffix(".bin") {
            (stem, Slot::Binary)
        } else if let Some(stem) = file_name.strip_suffix(".ptb") {
            (stem, Slot::PatchTable)
        } else {
            // older UART chips
            return false;
        };

        if stem.contains("_DEV") {
            debug!("skipping development firmware {}", file_name);
            return false;
        }

        let chip = match parse(stem) {
            Ok(chip) => chip,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };

        let record = self.chips.entry(chip.clone()).or_default();
        let slot = record.slot(slot);
        if let Some(existing) = slot {
            warn!(
                "duplicate entry for {}: {} and now {}",
                chip,
                existing.name(),
                file_name
            );
            return false;
        }

        *slot = Some(ContentFile::new(file_name, data));
        true
    }

    pub fn files(&self) -> Collected {
        let mut out = vec![];
        for (chip, record) in &self.chips {
            let base = chip.base_name();

            let Some(binary) = &record.binary else {
                warn!("no bin for {}", chip);
                continue;
            };
            out.push((format!("{}.bin", base), binary.clone()));

            match &record.patch_table {
                Some(ptb) => out.push((format!("{}.ptb", base), ptb.clone())),
                None => warn!("no ptb for {}", chip),
            }
        }
        out
    }
}

/// Flat directory of Broadcom Bluetooth firmware.
pub struct BluetoothCollector;

impl Collector for BluetoothCollector {
    fn name(&self) -> &'static str {
        "bluetooth"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        let mut firmware = BluetoothFirmware::new();
        for (name, path) in list_dir(source)? {
            if !(name.ends_with(".bin") || name.ends_with(".ptb")) || !path.is_file() {
                continue;
            }
            firmware.insert(&name, std::fs::read(&path)?);
        }
        Ok(firmware.files())
    }
}


#[cfg(test)]
mod test_bluetooth_collector {
    use super::*;
    use std::fs;

    #[test]
    fn pairs_bin_and_ptb() {
        let mut fw = BluetoothFirmware::new();
        assert!(fw.insert("BCM4388B0_PCIE_macOS_Tokara_MUR.bin", b"bin".to_vec()));
        assert!(fw.insert("BCM4388B0_PCIE_macOS_Tokara_MUR.ptb", b"ptb".to_vec()));
        assert_eq!(fw.len(), 1);

        let files = fw.files();
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "brcm/brcmbt4388b0-apple,tokara-m.bin",
                "brcm/brcmbt4388b0-apple,tokara-m.ptb"
            ]
        );
        assert_eq!(files[0].1.data(), b"bin");
        assert_eq!(files[0].1.name(), "BCM4388B0_PCIE_macOS_Tokara_MUR.bin");
    }

    #[test]
    fn duplicate_slot_keeps_first() {
        let mut fw = BluetoothFirmware::new();
        assert!(fw.insert("BCM4388B0_PCIE_macOS_Tokara_MUR.bin", b"one".to_vec()));
        // Same identity through a different spelling
        assert!(!fw.insert("bcm4388b0_PCIE_Tokara_MUR.bin", b"two".to_vec()));

        let files = fw.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1.data(), b"one");
    }

    #[test]
    fn missing_halves() {
        let mut fw = BluetoothFirmware::new();
        fw.insert("BCM4388B0_PCIE_macOS_Tokara_MUR.ptb", b"ptb".to_vec());
        fw.insert("BCM4378B1_PCIE_Formosa_USI.bin", b"bin".to_vec());

        let names: Vec<_> = fw.files().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["brcm/brcmbt4378b1-apple,formosa-u.bin"]);
    }

    #[test]
    fn skips_dev_and_other_files() {
        let mut fw = BluetoothFirmware::new();
        assert!(!fw.insert("BCM4377B3_PCIE_macOS_Kauai_GEN_DEV.bin", vec![]));
        assert!(!fw.insert("BCM4350C0_UART_MUR.hcd", vec![]));
        assert!(!fw.insert("BCM4388B0_PCIE_macOS_Tokara_MUR_USI.bin", vec![]));
        assert!(fw.is_empty());
    }

    #[test]
    fn from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("BCM4388B0_PCIE_macOS_Tokara_MUR.bin"), b"b").unwrap();
        fs::write(dir.path().join("BCM4388B0_PCIE_macOS_Tokara_MUR.ptb"), b"p").unwrap();
        fs::write(dir.path().join("README"), b"r").unwrap();

        let files = BluetoothCollector.collect(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].0, "brcm/brcmbt4388b0-apple,tokara-m.ptb");
    }
}
