//! Ambient light sensor calibration
//!
//! Raw per-unit calibration files (`HmCA*`) from the factory data cache,
//! plus the processed calibration blob when the host could dump it.

use std::path::{Path, PathBuf};

use log::{info, warn};

use fwcore::ContentFile;

use crate::collect::{list_dir, Collected, Collector};
use crate::Error;

pub const RAW_PREFIX: &str = "HmCA";
pub const CALIBRATION_NAME: &str = "apple/aop-als-cal.bin";

/// `source` is the factory data directory.
#[derive(Debug, Default)]
pub struct AlsCollector {
    calibration: Option<PathBuf>,
}

impl AlsCollector {
    pub fn new(calibration: Option<PathBuf>) -> Self {
        AlsCollector { calibration }
    }
}

impl Collector for AlsCollector {
    fn name(&self) -> &'static str {
        "als"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        let mut out = vec![];

        match &self.calibration {
            Some(path) if path.is_file() => {
                let data = std::fs::read(path)?;
                out.push((
                    CALIBRATION_NAME.to_string(),
                    ContentFile::new(CALIBRATION_NAME, data),
                ));
                info!("  Collected {}", CALIBRATION_NAME);
            }
            Some(path) => warn!(
                "{} not found, ambient light sensor calibration will not be saved",
                path.display()
            ),
            None => {}
        }

        if !source.is_dir() {
            warn!("Unable to find raw ambient light sensor calibration data");
            return Ok(out);
        }

        for (name, path) in list_dir(source)? {
            if !name.starts_with(RAW_PREFIX) || !path.is_file() {
                continue;
            }
            let data = std::fs::read(&path)?;
            out.push((format!("apple/{}", name), ContentFile::new(name, data)));
        }
        Ok(out)
    }
}
