//! Byte-reproducible zip output.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{FlowError, Result};

/// Permissions stamped on every archive entry.
const ENTRY_PERMISSIONS: u32 = 0o644;

/// Writes directory trees as zips whose bytes depend only on file content and names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicPackager;

impl DeterministicPackager {
    /// Zip every regular file under `source_dir` into `zip_path`.
    ///
    /// Entries are stored uncompressed in lexical order of their
    /// slash-separated relative paths, with the zip epoch as timestamp.
    pub fn write(&self, source_dir: &Path, zip_path: &Path) -> Result<()> {
        let mut files = Vec::new();
        if source_dir.is_dir() {
            collect_regular_files(source_dir, source_dir, &mut files)?;
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(parent) = zip_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| FlowError::io_at("Failed to create directory", parent, e))?;
        }
        let file = File::create(zip_path)
            .map_err(|e| FlowError::io_at("Failed to create archive", zip_path, e))?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::default())
            .unix_permissions(ENTRY_PERMISSIONS);

        let mut writer = ZipWriter::new(file);
        for (name, path) in &files {
            let content =
                fs::read(path).map_err(|e| FlowError::io_at("Failed to read", path, e))?;
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(&content)
                .map_err(|e| FlowError::io_at("Failed to write archive", zip_path, e))?;
        }
        writer.finish()?;

        info!("Wrote {} entries to {}", files.len(), zip_path.display());
        Ok(())
    }
}

fn collect_regular_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| FlowError::io_at("Failed to list", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FlowError::io_at("Failed to list", dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| FlowError::io_at("Failed to inspect", &entry.path(), e))?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_regular_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((name, path));
        }
    }
    Ok(())
}
