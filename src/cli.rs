use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::Error;

#[derive(Parser)]
#[command(name = "fwharvest")]
#[command(about = "Collect vendor peripheral firmware into a deduplicated tar + cpio package")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect everything and write the package
    Update {
        /// Extracted vendor firmware tree
        source: PathBuf,

        /// Output directory for the tarball, cpio and manifest
        dest: PathBuf,
    },

    /// Print what would be collected
    List {
        /// Extracted vendor firmware tree
        source: PathBuf,
    },
}

// Configuration
// Source paths are relative to the SOURCE argument, output names to DEST.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub sources: Sources,
    pub output: Output,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Sources {
    pub wifi: PathBuf,
    pub bluetooth: PathBuf,
    pub multitouch: PathBuf,
    pub isp: PathBuf,
    pub kernel: PathBuf,

    /// Factory data directory, ALS is skipped when unset
    pub als: Option<PathBuf>,
    pub als_calibration: Option<PathBuf>,
}

impl Default for Sources {
    fn default() -> Self {
        Sources {
            wifi: "firmware/wifi".into(),
            bluetooth: "firmware/bluetooth".into(),
            multitouch: "fud_firmware".into(),
            isp: ".".into(),
            kernel: ".".into(),
            als: None,
            als_calibration: None,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Output {
    pub tarball: PathBuf,
    pub cpio: PathBuf,
    pub manifest: PathBuf,

    /// Directory every cpio entry lives under, empty for none
    pub cpio_prefix: String,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            tarball: "firmware.tar".into(),
            cpio: "firmware.cpio".into(),
            manifest: "manifest.txt".into(),
            cpio_prefix: "vendorfw".to_string(),
        }
    }
}

impl Config {
    /// Defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Config, Error> {
        match path {
            None => Ok(Config::default()),
            Some(path) => Ok(toml::from_str(&std::fs::read_to_string(path)?)?),
        }
    }

    pub fn cpio_prefix(&self) -> Option<&str> {
        Some(self.output.cpio_prefix.trim_matches('/')).filter(|p| !p.is_empty())
    }
}
