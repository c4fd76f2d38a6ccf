//! Peripheral firmware harvester
//!
//! Pulls vendor firmware for WiFi, Bluetooth, multitouch, the camera ISP,
//! the ASMedia bridge and the ambient light sensor out of an extracted
//! vendor tree, renames it to what the Linux drivers expect and writes a
//! deduplicated tar + cpio package with a manifest.
//!
//! Every source has a [`collect::Collector`]; [`update`] runs them all and
//! hands the union to [`fwarc::Package`].

pub mod als;
pub mod bluetooth;
pub mod cli;
pub mod collect;
pub mod der;
pub mod img4;
pub mod isp;
pub mod kernel;
pub mod multitouch;
pub mod update;
pub mod wifi;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("walking source tree: {0}")]
    Walk(#[from] ignore::Error),
    #[error(transparent)]
    Archive(#[from] fwarc::ArchiveError),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}
