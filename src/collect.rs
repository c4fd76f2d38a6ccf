use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use fwcore::ContentFile;

use crate::Error;

/// Output of one collector run: logical name and content.
pub type Collected = Vec<(String, ContentFile)>;

/// One vendor firmware class.
///
/// Each implementation knows the shape of its own source (flat directory,
/// directory tree, single binary) and turns it into named files. Per-file
/// problems are logged and skipped, only I/O errors are returned.
pub trait Collector {
    fn name(&self) -> &'static str;

    fn collect(&self, source: &Path) -> Result<Collected, Error>;
}

fn walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .follow_links(true)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    builder
}

/// Immediate children of `dir`, sorted by file name.
pub fn list_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut out = vec![];
    for entry in walker(dir).max_depth(Some(1)).build() {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        out.push((name, entry.into_path()));
    }
    Ok(out)
}

/// Regular files below `root`, sorted, not descending into directories
/// named in `skip`. Paths are returned relative to `root`.
pub fn walk_files(root: &Path, skip: &'static [&'static str]) -> Result<Vec<PathBuf>, Error> {
    let mut out = vec![];
    let walk = walker(root)
        .filter_entry(move |e| {
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir && e.depth() > 0 && skip.iter().any(|s| e.file_name() == *s))
        })
        .build();

    for entry in walk {
        let entry = entry?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(out)
}
