use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use fwarc::{Finished, Manifest, Package};

use crate::als::AlsCollector;
use crate::bluetooth::BluetoothCollector;
use crate::cli::Config;
use crate::collect::{Collected, Collector};
use crate::img4::Decompress;
use crate::isp::IspCollector;
use crate::kernel::KernelCollector;
use crate::multitouch::MultitouchCollector;
use crate::wifi::WifiCollector;
use crate::Error;

/// Every collector with the source path it reads, in run order.
pub fn collectors<'a>(
    source: &Path,
    config: &Config,
    codec: &'a dyn Decompress,
) -> Vec<(Box<dyn Collector + 'a>, PathBuf)> {
    let sources = &config.sources;
    let mut out: Vec<(Box<dyn Collector + 'a>, PathBuf)> = vec![
        (Box::new(WifiCollector), source.join(&sources.wifi)),
        (Box::new(BluetoothCollector), source.join(&sources.bluetooth)),
        (
            Box::new(MultitouchCollector::new(codec)),
            source.join(&sources.multitouch),
        ),
        (Box::new(IspCollector), source.join(&sources.isp)),
        (Box::new(KernelCollector::new(codec)), source.join(&sources.kernel)),
    ];

    if let Some(als) = &sources.als {
        let calibration = sources.als_calibration.as_ref().map(|p| source.join(p));
        out.push((Box::new(AlsCollector::new(calibration)), source.join(als)));
    }
    out
}

/// Run every collector, the union sorted by logical name.
pub fn collect_all(
    source: &Path,
    config: &Config,
    codec: &dyn Decompress,
) -> Result<Collected, Error> {
    let mut files = vec![];
    for (collector, path) in collectors(source, config, codec) {
        debug!("{}: collecting from {}", collector.name(), path.display());
        let collected = collector.collect(&path)?;
        info!("{}: {} files", collector.name(), collected.len());
        files.extend(collected);
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Build the package for `files` into `dest`.
pub fn package(dest: &Path, config: &Config, files: &Collected) -> Result<Manifest, Error> {
    std::fs::create_dir_all(dest)?;
    let output = &config.output;

    let tar = BufWriter::new(File::create(dest.join(&output.tarball))?);
    let cpio = BufWriter::new(File::create(dest.join(&output.cpio))?);

    let mut pkg = Package::new(tar, cpio, config.cpio_prefix());
    pkg.add_files(files)?;

    let Finished {
        mut tar,
        mut cpio,
        manifest,
    } = pkg.close()?;
    tar.flush()?;
    cpio.flush()?;

    manifest.save(dest.join(&output.manifest))?;
    info!("Wrote {} manifest entries to {}", manifest.len(), dest.display());
    Ok(manifest)
}

/// Collect everything under `source` and write the package into `dest`.
pub fn update_firmware(
    source: &Path,
    dest: &Path,
    config: &Config,
    codec: &dyn Decompress,
) -> Result<Manifest, Error> {
    let files = collect_all(source, config, codec)?;
    package(dest, config, &files)
}
