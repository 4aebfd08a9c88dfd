//! Archive overlays: zip files whose `data/` entries are merged into resolution.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{FlowError, Result};

/// Entry prefix under which overlay content lives inside the archive.
pub const CONTENT_PREFIX: &str = "data/";

/// A read-only archive of logical files, loaded fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOverlay {
    id: String,
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveOverlay {
    /// Load every file entry under [`CONTENT_PREFIX`] from a zip archive.
    pub fn open(id: impl Into<String>, path: &Path) -> Result<Self> {
        let id = id.into();
        let file = File::open(path).map_err(|e| FlowError::io_at("Failed to open archive", path, e))?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut entries = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.name().strip_prefix(CONTENT_PREFIX).map(str::to_string) else {
                continue;
            };
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut content)
                .map_err(|e| FlowError::io_at("Failed reading archive", path, e))?;
            entries.insert(relative, content);
        }

        debug!("Loaded archive {} with {} entries", id, entries.len());
        Ok(Self { id, entries })
    }

    /// Build an overlay from in-memory entries (paths relative to the content prefix).
    pub fn from_entries<I, P, C>(id: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        Self {
            id: id.into(),
            entries: entries
                .into_iter()
                .map(|(path, content)| (path.into(), content.into()))
                .collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Logical paths of every entry, in lexical order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Read an entry as UTF-8 text.
    pub fn read_text(&self, path: &str) -> Result<String> {
        let content = self.entries.get(path).ok_or_else(|| {
            FlowError::file_collection(format!(
                "Missing archive path '{}' in archive '{}'.",
                path, self.id
            ))
        })?;
        String::from_utf8(content.clone()).map_err(|e| {
            FlowError::runtime(format!(
                "Archive path '{}' in archive '{}' is not valid UTF-8: {}",
                path, self.id, e
            ))
        })
    }
}
