//! Resource locations, archive overlays and the resolver that merges them.

pub mod overlay;
pub mod resolver;

use std::fmt;
use std::path::PathBuf;

pub use overlay::ArchiveOverlay;
pub use resolver::{FixtureSet, ResourceResolver};

/// Where a resolved resource lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceLocation {
    /// A file on disk.
    Disk(PathBuf),
    /// An entry inside an archive overlay.
    Archive { archive: String, path: String },
}

impl ResourceLocation {
    /// Final path component, used for ordering and duplicate detection.
    pub fn basename(&self) -> &str {
        match self {
            ResourceLocation::Disk(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default(),
            ResourceLocation::Archive { path, .. } => basename(path),
        }
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLocation::Disk(path) => write!(f, "{}", path.display()),
            ResourceLocation::Archive { archive, path } => write!(f, "zip:{}:{}", archive, path),
        }
    }
}

/// Strip bracket, quote and space decoration from an object name.
pub fn clean_object_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '[' | ']' | '"' | '\'' | ' '))
        .collect()
}

fn basename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(slash) => &path[slash + 1..],
        None => path,
    }
}
