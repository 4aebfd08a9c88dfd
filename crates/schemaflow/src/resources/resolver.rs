//! Merges disk search roots and archive overlays into ordered resource lists.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{clean_object_name, ArchiveOverlay, ResourceLocation};
use crate::error::{FlowError, Result};

/// Insertion-ordered mapping of element name to its fixture file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
    entries: Vec<(String, ResourceLocation)>,
}

impl FixtureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the fixture for `element`.
    pub fn insert(&mut self, element: impl Into<String>, location: ResourceLocation) {
        let element = element.into();
        match self.entries.iter_mut().find(|(name, _)| *name == element) {
            Some(entry) => entry.1 = location,
            None => self.entries.push((element, location)),
        }
    }

    pub fn get(&self, element: &str) -> Option<&ResourceLocation> {
        self.entries
            .iter()
            .find(|(name, _)| name == element)
            .map(|(_, location)| location)
    }

    pub fn contains(&self, element: &str) -> bool {
        self.get(element).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceLocation)> {
        self.entries.iter().map(|(name, location)| (name.as_str(), location))
    }

    /// Merge another set into this one; later entries replace earlier ones.
    pub fn extend(&mut self, other: FixtureSet) {
        for (element, location) in other.entries {
            self.insert(element, location);
        }
    }
}

/// Resolves logical directories against disk roots and archive overlays.
///
/// Precedence is disk roots (in order), then post overlays, then pre overlays.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    roots: Vec<PathBuf>,
    post_overlays: Vec<Arc<ArchiveOverlay>>,
    pre_overlays: Vec<Arc<ArchiveOverlay>>,
    index_file_name: String,
}

impl ResourceResolver {
    pub fn new(
        roots: Vec<PathBuf>,
        post_overlays: Vec<Arc<ArchiveOverlay>>,
        pre_overlays: Vec<Arc<ArchiveOverlay>>,
        index_file_name: impl Into<String>,
    ) -> Self {
        Self {
            roots,
            post_overlays,
            pre_overlays,
            index_file_name: index_file_name.into(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn index_file_name(&self) -> &str {
        &self.index_file_name
    }

    fn overlays(&self) -> impl Iterator<Item = &Arc<ArchiveOverlay>> {
        self.post_overlays.iter().chain(self.pre_overlays.iter())
    }

    /// Collect every `*.{extension}` file for a logical directory.
    ///
    /// Files listed in an index file come first in index order; the rest
    /// follow alphabetically. A basename may occur only once across all
    /// sources, except that overlay candidates are shadowed by any
    /// candidate already found.
    pub fn collect_files(&self, relative_dir: &str, extension: &str) -> Result<Vec<ResourceLocation>> {
        let directories: Vec<PathBuf> = self.roots.iter().map(|root| root.join(relative_dir)).collect();
        let suffix = format!(".{}", extension);

        let mut index: Vec<String> = Vec::new();
        let mut candidates: Vec<ResourceLocation> = Vec::new();

        for directory in &directories {
            let index_file = directory.join(&self.index_file_name);
            if index_file.is_file() {
                let content = fs::read_to_string(&index_file)
                    .map_err(|e| FlowError::io_at("Failed to read", &index_file, e))?;
                for entry in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
                    if !directories.iter().any(|dir| dir.join(entry).exists()) {
                        return Err(FlowError::file_collection(format!(
                            "A specified index entry does not exist on the disk {}",
                            entry
                        )));
                    }
                    index.push(entry.to_string());
                }
            }
            for path in read_files(directory, &suffix)? {
                candidates.push(ResourceLocation::Disk(path));
            }
        }

        let prefix = normalize_relative_dir(relative_dir);
        let index_path = join_logical(&prefix, &self.index_file_name);
        for overlay in self.overlays() {
            if overlay.contains(&index_path) {
                let content = overlay.read_text(&index_path)?;
                index.extend(content.split_whitespace().map(str::to_string));
            }
            for path in overlay.files() {
                let Some(name) = direct_child(path, &prefix) else {
                    continue;
                };
                if !name.ends_with(&suffix) {
                    continue;
                }
                if candidates.iter().any(|c| c.basename() == name) {
                    continue;
                }
                candidates.push(ResourceLocation::Archive {
                    archive: overlay.id().to_string(),
                    path: path.to_string(),
                });
            }
        }

        check_duplicate_basenames(&candidates)?;

        let positions: HashMap<&str, usize> = index
            .iter()
            .enumerate()
            .rev()
            .map(|(position, name)| (name.as_str(), position))
            .collect();
        candidates.sort_by(|a, b| {
            let key_a = (positions.get(a.basename()).copied().unwrap_or(usize::MAX), a.basename());
            let key_b = (positions.get(b.basename()).copied().unwrap_or(usize::MAX), b.basename());
            key_a.cmp(&key_b)
        });

        debug!("Collected {} .{} files for {}", candidates.len(), extension, relative_dir);
        Ok(candidates)
    }

    /// Resolve one fixture file per element under `module/subdir`.
    ///
    /// Stray `.yml` files that match no element, and any `.sql` file, in a
    /// disk fixture directory are rejected.
    pub fn collect_fixtures(
        &self,
        module: &str,
        subdir: &str,
        elements: &[String],
    ) -> Result<FixtureSet> {
        let relative_dir = format!("{}/{}", module, subdir);
        let directories: Vec<PathBuf> = self.roots.iter().map(|root| root.join(&relative_dir)).collect();

        let mut unclaimed: Vec<PathBuf> = Vec::new();
        let mut sql_files: Vec<PathBuf> = Vec::new();
        for directory in &directories {
            unclaimed.extend(read_files(directory, ".yml")?);
            sql_files.extend(read_files(directory, ".sql")?);
        }

        let mut fixtures = FixtureSet::new();
        for element in elements {
            let basename = format!("{}.yml", clean_object_name(element));
            for directory in &directories {
                let candidate = directory.join(&basename);
                unclaimed.retain(|path| *path != candidate);
                if candidate.is_file() {
                    if fixtures.contains(element) {
                        return Err(FlowError::file_collection(format!(
                            "Duplicate fixture for {} found in database search paths",
                            element
                        )));
                    }
                    fixtures.insert(element.clone(), ResourceLocation::Disk(candidate));
                }
            }

            if !fixtures.contains(element) {
                let artifact_path = join_logical(&relative_dir, &basename);
                if let Some(location) = self.find_in_overlays(&artifact_path) {
                    fixtures.insert(element.clone(), location);
                }
            }
        }

        if !unclaimed.is_empty() {
            return Err(FlowError::file_collection(format!(
                "Unexpected fixtures found in database search paths. Fixtures do not match existing tables. Files: {}",
                display_paths(&unclaimed)
            )));
        }
        if !sql_files.is_empty() {
            return Err(FlowError::file_collection(format!(
                "Unexpected sql files found in fixture directories. SQL files are not processed. Files: {}",
                display_paths(&sql_files)
            )));
        }

        Ok(fixtures)
    }

    /// Find `module/subdir/<clean element>.<extension>` using the usual precedence.
    pub fn find_file_in_module(
        &self,
        module: &str,
        subdir: &str,
        element: &str,
        extension: &str,
    ) -> Option<ResourceLocation> {
        let filename = format!("{}/{}/{}.{}", module, subdir, clean_object_name(element), extension);
        self.roots
            .iter()
            .map(|root| root.join(&filename))
            .find(|path| path.exists())
            .map(ResourceLocation::Disk)
            .or_else(|| self.find_in_overlays(&normalize_relative_dir(&filename)))
    }

    /// Read the text behind a resolved location.
    pub fn read_text(&self, location: &ResourceLocation) -> Result<String> {
        match location {
            ResourceLocation::Disk(path) => {
                fs::read_to_string(path).map_err(|e| FlowError::io_at("Failed to read", path, e))
            }
            ResourceLocation::Archive { archive, path } => {
                let overlay = self
                    .overlays()
                    .find(|overlay| overlay.id() == archive)
                    .ok_or_else(|| FlowError::runtime(format!("Unknown archive '{}'", archive)))?;
                overlay.read_text(path)
            }
        }
    }

    fn find_in_overlays(&self, path: &str) -> Option<ResourceLocation> {
        self.overlays()
            .find(|overlay| overlay.contains(path))
            .map(|overlay| ResourceLocation::Archive {
                archive: overlay.id().to_string(),
                path: path.to_string(),
            })
    }
}

/// Regular files directly inside `directory` whose name ends with `suffix`.
fn read_files(directory: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }
    let entries =
        fs::read_dir(directory).map_err(|e| FlowError::io_at("Failed to list", directory, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| FlowError::io_at("Failed to list", directory, e))?
            .path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Normalize a logical directory for overlay lookup.
pub(crate) fn normalize_relative_dir(relative_dir: &str) -> String {
    let mut normalized = relative_dir.replace('\\', "/");
    while normalized.contains("/./") {
        normalized = normalized.replace("/./", "/");
    }
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    if let Some(stripped) = normalized.strip_suffix("/.") {
        normalized = stripped.to_string();
    }
    if normalized == "." {
        normalized.clear();
    }
    normalized.trim_end_matches('/').to_string()
}

fn join_logical(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// The entry name when `path` sits directly inside `dir`.
fn direct_child<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let rest = if dir.is_empty() {
        path
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    (!rest.contains('/')).then_some(rest)
}

fn check_duplicate_basenames(candidates: &[ResourceLocation]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    let duplicated: HashSet<&str> = candidates
        .iter()
        .map(ResourceLocation::basename)
        .filter(|name| !seen.insert(name))
        .collect();
    if duplicated.is_empty() {
        return Ok(());
    }
    let offending: Vec<String> = candidates
        .iter()
        .filter(|c| duplicated.contains(c.basename()))
        .map(|c| c.to_string())
        .collect();
    Err(FlowError::file_collection(format!(
        "Files with duplicate basename not allowed.\n\t{}",
        offending.join("\n\t")
    )))
}

fn display_paths(paths: &[PathBuf]) -> String {
    let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    format!("[{}]", shown.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn resolver(roots: &[&TempDir], post: Vec<ArchiveOverlay>, pre: Vec<ArchiveOverlay>) -> ResourceResolver {
        ResourceResolver::new(
            roots.iter().map(|r| r.path().to_path_buf()).collect(),
            post.into_iter().map(Arc::new).collect(),
            pre.into_iter().map(Arc::new).collect(),
            "index.txt",
        )
    }

    fn names(files: &[ResourceLocation]) -> Vec<&str> {
        files.iter().map(ResourceLocation::basename).collect()
    }

    #[test]
    fn test_index_orders_listed_files_first() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/a.sql", "");
        write(root.path(), "Core/b.sql", "");
        write(root.path(), "Core/c.sql", "");
        write(root.path(), "Core/index.txt", "b.sql\n  a.sql \n\n");

        let files = resolver(&[&root], vec![], vec![]).collect_files("Core/.", "sql").unwrap();
        assert_eq!(names(&files), vec!["b.sql", "a.sql", "c.sql"]);
    }

    #[test]
    fn test_unindexed_files_sorted_alphabetically() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/views/z.sql", "");
        write(root.path(), "Core/views/m.sql", "");
        write(root.path(), "Core/views/notes.txt", "");

        let files = resolver(&[&root], vec![], vec![]).collect_files("Core/views", "sql").unwrap();
        assert_eq!(names(&files), vec!["m.sql", "z.sql"]);
    }

    #[test]
    fn test_missing_index_entry_fails() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/a.sql", "");
        write(root.path(), "Core/index.txt", "missing.sql\n");

        let err = resolver(&[&root], vec![], vec![]).collect_files("Core", "sql").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileCollection);
        assert!(err.to_string().contains("does not exist on the disk missing.sql"));
    }

    #[test]
    fn test_index_entry_may_live_in_other_root() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(first.path(), "Core/index.txt", "b.sql\n");
        write(first.path(), "Core/a.sql", "");
        write(second.path(), "Core/b.sql", "");

        let files = resolver(&[&first, &second], vec![], vec![]).collect_files("Core", "sql").unwrap();
        assert_eq!(names(&files), vec!["b.sql", "a.sql"]);
    }

    #[test]
    fn test_duplicate_basename_across_roots_fails() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(first.path(), "Core/a.sql", "");
        write(second.path(), "Core/a.sql", "");

        let err = resolver(&[&first, &second], vec![], vec![]).collect_files("Core", "sql").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileCollection);
        assert!(err.to_string().contains("Files with duplicate basename not allowed."));
    }

    #[test]
    fn test_disk_beats_post_and_post_beats_pre() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/a.sql", "disk");
        let post = ArchiveOverlay::from_entries(
            "post.zip",
            [("Core/a.sql", "post"), ("Core/b.sql", "post"), ("Core/nested/x.sql", "post")],
        );
        let pre = ArchiveOverlay::from_entries(
            "pre.zip",
            [("Core/b.sql", "pre"), ("Core/c.sql", "pre"), ("Core/index.txt", "c.sql b.sql")],
        );
        let resolver = resolver(&[&root], vec![post], vec![pre]);

        let files = resolver.collect_files("Core/.", "sql").unwrap();
        assert_eq!(names(&files), vec!["c.sql", "b.sql", "a.sql"]);
        let texts: Vec<String> = files.iter().map(|f| resolver.read_text(f).unwrap()).collect();
        assert_eq!(texts, vec!["pre", "post", "disk"]);
        assert_eq!(files[1].to_string(), "zip:post.zip:Core/b.sql");
    }

    #[test]
    fn test_collect_fixtures_resolves_disk_then_overlays() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/fixtures/Core.tblA.yml", "");
        let post = ArchiveOverlay::from_entries("post.zip", [("Core/fixtures/Core.tblB.yml", "")]);
        let resolver = resolver(&[&root], vec![post], vec![]);

        let elements = vec!["[Core].[tblA]".to_string(), "Core.tblB".to_string(), "Core.tblC".to_string()];
        let fixtures = resolver.collect_fixtures("Core", "fixtures", &elements).unwrap();
        assert_eq!(fixtures.len(), 2);
        assert!(matches!(fixtures.get("[Core].[tblA]"), Some(ResourceLocation::Disk(_))));
        assert_eq!(
            fixtures.get("Core.tblB").unwrap().to_string(),
            "zip:post.zip:Core/fixtures/Core.tblB.yml"
        );
        assert!(!fixtures.contains("Core.tblC"));
    }

    #[test]
    fn test_collect_fixtures_rejects_unexpected_yml() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/fixtures/Core.tblA.yml", "");
        write(root.path(), "Core/fixtures/Core.stray.yml", "");

        let err = resolver(&[&root], vec![], vec![])
            .collect_fixtures("Core", "fixtures", &["Core.tblA".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileCollection);
        assert!(err.to_string().contains("Unexpected fixtures found"));
        assert!(err.to_string().contains("Core.stray.yml"));
    }

    #[test]
    fn test_collect_fixtures_rejects_sql() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/fixtures/setup.sql", "");

        let err = resolver(&[&root], vec![], vec![])
            .collect_fixtures("Core", "fixtures", &[])
            .unwrap_err();
        assert!(err.to_string().contains("Unexpected sql files found in fixture directories"));
    }

    #[test]
    fn test_collect_fixtures_ambiguous_across_roots() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(first.path(), "Core/fixtures/Core.tblA.yml", "");
        write(second.path(), "Core/fixtures/Core.tblA.yml", "");

        let err = resolver(&[&first, &second], vec![], vec![])
            .collect_fixtures("Core", "fixtures", &["Core.tblA".to_string()])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "File collection error: Duplicate fixture for Core.tblA found in database search paths"
        );
    }

    #[test]
    fn test_find_file_in_module() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/import/Core.tblA.sql", "");
        let pre = ArchiveOverlay::from_entries("pre.zip", [("Core/import/Core.tblB.sql", "")]);
        let resolver = resolver(&[&root], vec![], vec![pre]);

        assert!(matches!(
            resolver.find_file_in_module("Core", "import", "[Core].[tblA]", "sql"),
            Some(ResourceLocation::Disk(_))
        ));
        assert_eq!(
            resolver
                .find_file_in_module("Core", "import", "Core.tblB", "sql")
                .unwrap()
                .to_string(),
            "zip:pre.zip:Core/import/Core.tblB.sql"
        );
        assert!(resolver.find_file_in_module("Core", "import", "Core.tblB", "yml").is_none());
    }

    #[test]
    fn test_read_text_unknown_archive() {
        let resolver = resolver(&[], vec![], vec![]);
        let location = ResourceLocation::Archive {
            archive: "gone.zip".to_string(),
            path: "a.sql".to_string(),
        };
        assert_eq!(
            resolver.read_text(&location).unwrap_err().kind(),
            ErrorKind::RuntimeExecution
        );
    }

    #[test]
    fn test_normalize_relative_dir() {
        assert_eq!(normalize_relative_dir("Core/."), "Core");
        assert_eq!(normalize_relative_dir("Core/./views"), "Core/views");
        assert_eq!(normalize_relative_dir("db-hooks/pre"), "db-hooks/pre");
        assert_eq!(normalize_relative_dir("."), "");
    }
}
