//! Touch bar and trackpad firmware
//!
//! Each machine directory (`j314s`, `j413`, ...) of the multitouch firmware
//! tree has a `Multitouch.im4p` container holding an XML property list. Its
//! top level dictionary has one entry per device, each a list of config
//! entries that the device specific encoder turns into the binary image the
//! kernel driver uploads.
//!
//! | Key prefix | Device   | Output                      | Encoder      |
//! | ---------- | -------- | --------------------------- | ------------ |
//! | `C1FB`     | touchbar | `apple/dfrmtfw-<machine>.bin` | [`touchbar`] |
//! | `C1FD`     | trackpad | `apple/tpmtfw-<machine>.bin`  | [`trackpad`] |

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use log::{info, warn};
use thiserror::Error;

use fwcore::ContentFile;

use crate::collect::{list_dir, Collected, Collector};
use crate::img4::{self, ContainerError, Decompress};
use crate::Error;

pub mod plist;
pub mod touchbar;
pub mod trackpad;

use plist::{Dict, Value};

pub const MULTITOUCH_IMAGE: &str = "Multitouch.im4p";
pub const CONTAINER_NAME: &str = "mtfw";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    MalformedConfig(String),
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),
    #[error("reference to unknown id {0:?}")]
    UnknownReference(String),
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("container: {0}")]
    Container(#[from] ContainerError),
}

pub(crate) fn as_dict<'a>(value: &'a Value, what: &str) -> Result<&'a Dict, ConfigError> {
    value
        .as_dict()
        .ok_or_else(|| ConfigError::MalformedConfig(format!("{} is a {}", what, value.kind())))
}

pub(crate) fn field<'a>(dict: &'a Dict, key: &str) -> Result<&'a Rc<Value>, ConfigError> {
    dict.get(key)
        .ok_or_else(|| ConfigError::MalformedConfig(format!("missing {:?}", key)))
}

pub(crate) fn u32_field(dict: &Dict, key: &str) -> Result<u32, ConfigError> {
    let value = field(dict, key)?;
    value
        .as_integer()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| {
            ConfigError::MalformedConfig(format!("{:?} is not a 32-bit value", key))
        })
}

pub(crate) fn data_field<'a>(dict: &'a Dict, key: &str) -> Result<&'a [u8], ConfigError> {
    field(dict, key)?
        .as_data()
        .ok_or_else(|| ConfigError::MalformedConfig(format!("{:?} is not data", key)))
}

/// The `Type` of a config list entry.
pub(crate) fn entry_type(entry: &Dict) -> Result<&str, ConfigError> {
    field(entry, "Type")?
        .as_str()
        .ok_or_else(|| ConfigError::MalformedConfig("\"Type\" is not a string".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Trackpad,
    Touchbar,
}

impl DeviceKind {
    pub fn from_key(key: &str) -> Option<Self> {
        if key.starts_with("C1FD") {
            Some(DeviceKind::Trackpad)
        } else if key.starts_with("C1FB") {
            Some(DeviceKind::Touchbar)
        } else {
            None
        }
    }

    pub fn firmware_name(&self, machine: &str) -> String {
        match self {
            DeviceKind::Trackpad => format!("apple/tpmtfw-{}.bin", machine),
            DeviceKind::Touchbar => format!("apple/dfrmtfw-{}.bin", machine),
        }
    }

    pub fn encode(&self, config: &[Rc<Value>]) -> Result<Vec<u8>, ConfigError> {
        match self {
            DeviceKind::Trackpad => trackpad::encode(config),
            DeviceKind::Touchbar => touchbar::encode(config),
        }
    }
}

/// Firmware files for one machine's multitouch container.
///
/// A device whose config fails to encode is skipped with a warning; a
/// broken container or plist fails the whole machine.
pub fn machine_firmware(
    machine: &str,
    image: &[u8],
    codec: &dyn Decompress,
) -> Result<Collected, ConfigError> {
    let (name, payload) = img4::extract(image, codec)?;
    if name != CONTAINER_NAME {
        return Err(ConfigError::MalformedConfig(format!(
            "container is {:?}, expected {:?}",
            name, CONTAINER_NAME
        )));
    }

    let end = payload.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    let text = std::str::from_utf8(&payload[..end])
        .map_err(|e| ConfigError::MalformedConfig(format!("plist is not text: {}", e)))?;

    let root = plist::from_xml(text)?;
    let devices = as_dict(&root, "top level")?;

    let mut collected = HashSet::new();
    let mut out = vec![];
    for (key, config) in devices.iter() {
        let Some(kind) = DeviceKind::from_key(key) else {
            info!("  Skipping {}", key);
            continue;
        };

        info!("  Collecting {}", key);
        let filename = kind.firmware_name(machine);
        if !collected.insert(filename.clone()) {
            return Err(ConfigError::MalformedConfig(format!(
                "tried to collect {} twice",
                filename
            )));
        }

        let Some(config) = config.as_array() else {
            warn!("  {}: config is a {}, skipping", key, config.kind());
            continue;
        };

        match kind.encode(config) {
            Ok(data) => {
                info!("  Collected {} as {}", key, filename);
                out.push((filename.clone(), ContentFile::new(filename, data)));
            }
            Err(e) => warn!("  {}: {}, skipping", key, e),
        }
    }
    Ok(out)
}

/// Machine directories of the multitouch firmware tree.
pub struct MultitouchCollector<'a> {
    codec: &'a dyn Decompress,
}

impl<'a> MultitouchCollector<'a> {
    pub fn new(codec: &'a dyn Decompress) -> Self {
        MultitouchCollector { codec }
    }
}

impl Collector for MultitouchCollector<'_> {
    fn name(&self) -> &'static str {
        "multitouch"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        if !source.exists() {
            warn!(
                "{} is missing, no touch bar or trackpad firmware",
                source.display()
            );
            return Ok(vec![]);
        }

        let mut out = vec![];
        for (machine, path) in list_dir(source)? {
            if !machine.starts_with('j') {
                continue;
            }
            let image = path.join(MULTITOUCH_IMAGE);
            if !image.is_file() {
                continue;
            }

            info!("Processing {}", machine);
            let data = std::fs::read(&image)?;
            match machine_firmware(&machine, &data, self.codec) {
                Ok(files) => out.extend(files),
                Err(e) => warn!("{}: {}", machine, e),
            }
        }
        Ok(out)
    }
}
