//! WiFi firmware, NVRAM, CLM and txcap blobs for the Broadcom PCIe chips
//!
//! The vendor tree has one file per (chip, revision, platform, module,
//! vendor, ...) combination, most of them byte identical. Files are sorted
//! into a [`FirmwareTree`] keyed by those dimensions, which is then pruned
//! down to the smallest set of name prefixes that still resolves every
//! vendor combination to the right content.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

use fwcore::ContentFile;

use crate::collect::{walk_files, Collected, Collector};
use crate::Error;

/// Vendor extension to output extension.
pub static EXTENSIONS: [(&str, &str); 5] = [
    ("trx", "bin"),
    ("txt", "txt"),
    ("clmb", "clm_blob"),
    ("txcb", "txcap_blob"),
    ("sig", "sig"),
];

/// Dimension order below the extension: chip, revision, platform, module,
/// module vendor, module revision, antenna.
pub static DIMENSIONS: [&str; 7] = ["C", "s", "P", "M", "V", "m", "A"];

pub const SKIP_DIRS: &[&str] = &["perf", "assert"];

// Keeps extension, chip and revision in every output name
pub const WIFI_PROMOTE_DEPTH: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NameError {
    #[error("no extension in {0:?}")]
    NoExtension(String),
    #[error("malformed dimension token {0:?}")]
    MalformedToken(String),
    #[error("unknown dimensions {0:?}")]
    UnknownDimension(Vec<String>),
    #[error("missing chip or revision")]
    MissingDimension,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NvramError {
    #[error("nvram is not ASCII text")]
    NotAscii,
    #[error("nvram line without value: {0:?}")]
    MissingValue(String),
}

pub fn map_extension(ext: &str) -> Option<&'static str> {
    EXTENSIONS
        .iter()
        .find(|(vendor, _)| *vendor == ext)
        .map(|(_, out)| *out)
}

#[derive(Debug, Default, Clone)]
pub struct FirmwareNode {
    pub content: Option<ContentFile>,
    pub children: BTreeMap<String, FirmwareNode>,
}

impl FirmwareNode {
    // Content of a node with nothing below it
    fn leaf_content(&self) -> Option<&ContentFile> {
        if self.children.is_empty() {
            self.content.as_ref()
        } else {
            None
        }
    }

    fn shared_leaf_content(&self) -> Option<&ContentFile> {
        let first = self.children.values().next()?.leaf_content()?;
        self.children
            .values()
            .all(|c| c.leaf_content() == Some(first))
            .then_some(first)
    }

    fn prune(&mut self, depth: usize, min_promote_depth: usize) {
        for child in self.children.values_mut() {
            child.prune(depth + 1, min_promote_depth);
        }

        if self.content.is_none() && depth >= min_promote_depth {
            if let Some(shared) = self.shared_leaf_content().cloned() {
                self.content = Some(shared);
                self.children.clear();
                return;
            }
        }

        if let Some(own) = &self.content {
            if self
                .children
                .values()
                .all(|c| c.leaf_content() == Some(own))
            {
                self.children.clear();
            }
        }
    }

    fn walk(&self, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, ContentFile)>) {
        if let Some(content) = &self.content {
            out.push((path.clone(), content.clone()));
        }
        for (token, child) in &self.children {
            path.push(token.clone());
            child.walk(path, out);
            path.pop();
        }
    }
}

/// Content keyed by a path of dimension tokens.
///
/// Promotion of shared content to a parent only happens on nodes at least
/// `min_promote_depth` below the root (root is depth 0).
#[derive(Debug, Default)]
pub struct FirmwareTree {
    root: FirmwareNode,
    min_promote_depth: usize,
}

impl FirmwareTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_promote_depth(min_promote_depth: usize) -> Self {
        FirmwareTree {
            root: FirmwareNode::default(),
            min_promote_depth,
        }
    }

    pub fn root(&self) -> &FirmwareNode {
        &self.root
    }

    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], content: ContentFile) {
        let mut node = &mut self.root;
        for token in path {
            node = node.children.entry(token.as_ref().to_string()).or_default();
        }
        node.content = Some(content);
    }

    pub fn prune(&mut self) {
        self.root.prune(0, self.min_promote_depth);
    }

    /// Content bearing nodes, pre-order.
    pub fn enumerate(&self) -> Vec<(Vec<String>, ContentFile)> {
        let mut out = vec![];
        self.root.walk(&mut vec![], &mut out);
        out
    }
}

/// Dimension path for a file, from its path relative to the WiFi root.
pub fn identity(relpath: &str) -> Result<Vec<String>, NameError> {
    let (dir, file) = relpath.rsplit_once('/').unwrap_or(("", relpath));
    let (stem, ext) = file
        .rsplit_once('.')
        .ok_or_else(|| NameError::NoExtension(relpath.to_string()))?;

    // Only NVRAM files carry their own P- token
    let stem = if ext == "txt" {
        stem.to_string()
    } else {
        format!("P-{}", stem)
    };

    let mut props: HashMap<&str, &str> = HashMap::new();
    for token in dir.split(['/', '_']).chain(stem.split('_')) {
        if token.is_empty() {
            continue;
        }
        let (key, value) = token
            .split_once('-')
            .ok_or_else(|| NameError::MalformedToken(token.to_string()))?;

        match (key, value.split_once('-')) {
            ("P", Some((platform, antenna))) => {
                props.insert("P", platform);
                props.insert("A", antenna);
            }
            _ => {
                props.insert(key, value);
            }
        }
    }

    if !props.contains_key("C") || !props.contains_key("s") {
        return Err(NameError::MissingDimension);
    }

    let mut ident = vec![ext.to_string()];
    for dim in DIMENSIONS {
        if let Some(value) = props.remove(dim) {
            ident.push(value.to_string());
        }
    }

    if !props.is_empty() {
        let mut unknown: Vec<String> = props.keys().map(|k| k.to_string()).collect();
        unknown.sort();
        return Err(NameError::UnknownDimension(unknown));
    }
    Ok(ident)
}

/// Output name for a dimension path, `None` above the revision level.
pub fn firmware_name(ident: &[String]) -> Option<String> {
    let [ext, chip, rev, rest @ ..] = ident else {
        return None;
    };
    let ext = map_extension(ext)?;

    let rest = if rest.is_empty() {
        String::new()
    } else {
        format!(",{}", rest.join("-"))
    };
    Some(format!(
        "brcm/brcmfmac{}{}-pcie.apple{}.{}",
        chip,
        rev.to_lowercase(),
        rest,
        ext
    ))
}

/// Normalise an NVRAM text file to plain `key=value` lines.
pub fn process_nvram(data: &[u8]) -> Result<Vec<u8>, NvramError> {
    let text = std::str::from_utf8(data)
        .ok()
        .filter(|t| t.is_ascii())
        .ok_or(NvramError::NotAscii)?;

    let mut out = String::with_capacity(text.len());
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| NvramError::MissingValue(line.to_string()))?;

        out.push_str(key.trim());
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Recursive vendor WiFi tree.
pub struct WifiCollector;

impl WifiCollector {
    pub fn tree(&self, source: &Path) -> Result<FirmwareTree, Error> {
        let mut tree = FirmwareTree::with_promote_depth(WIFI_PROMOTE_DEPTH);

        for rel in walk_files(source, SKIP_DIRS)? {
            let relpath = rel
                .iter()
                .map(|c| c.to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let ext = relpath.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            if map_extension(ext).is_none() {
                debug!("ignoring {}", relpath);
                continue;
            }

            let ident = match identity(&relpath) {
                Ok(ident) => ident,
                Err(e) => {
                    warn!("skipping {}: {}", relpath, e);
                    continue;
                }
            };

            let mut data = std::fs::read(source.join(&rel))?;
            if ext == "txt" {
                data = match process_nvram(&data) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("skipping {}: {}", relpath, e);
                        continue;
                    }
                };
            }

            tree.insert(&ident, ContentFile::new(relpath, data));
        }

        tree.prune();
        Ok(tree)
    }
}

impl Collector for WifiCollector {
    fn name(&self) -> &'static str {
        "wifi"
    }

    fn collect(&self, source: &Path) -> Result<Collected, Error> {
        let mut out = vec![];
        for (ident, file) in self.tree(source)?.enumerate() {
            match firmware_name(&ident) {
                Some(name) => out.push((name, file)),
                None => warn!("no output name for {:?} ({})", ident, file.name()),
            }
        }
        Ok(out)
    }
}
