//! Registry of region files present on disk.
//!
//! The registry is the source of truth for "present": a region is present
//! when a map file of any version is registered for it. Entries are kept per
//! region in ascending version order.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::file::{FileKind, LocalFile};
use super::naming;
use crate::country::{CountryId, CountryTree, DataVersion};

/// Filesystem failure with the path that caused it.
#[derive(Debug, Error)]
#[error("{action} {path}: {source}")]
pub struct RegistryError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl RegistryError {
    fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Outcome of a startup scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Number of (region, version) entries registered.
    pub registered: usize,
    /// Regions with a downloaded diff for the current version but no map
    /// built from it yet.
    pub not_applied_diffs: Vec<CountryId>,
    /// Region files whose id is not a leaf of the catalog.
    pub unknown_files: Vec<PathBuf>,
    /// Temporary files removed from non-current version directories.
    pub removed_temporaries: usize,
}

#[derive(Debug)]
pub struct LocalFileRegistry {
    root: PathBuf,
    files: HashMap<CountryId, Vec<LocalFile>>,
}

impl LocalFileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers every region file found under the root.
    ///
    /// Temporaries in non-current version directories can never be resumed
    /// and are deleted. A missing root directory is treated as empty.
    pub fn scan(&mut self, tree: &CountryTree) -> RegistryResult<ScanReport> {
        let mut report = ScanReport::default();
        self.files.clear();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Data directory does not exist yet");
                return Ok(report);
            }
            Err(e) => return Err(RegistryError::new("failed to read", &self.root, e)),
        };

        let mut found: BTreeSet<(CountryId, DataVersion)> = BTreeSet::new();
        for entry in entries.flatten() {
            let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(naming::parse_version_directory)
            else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            self.scan_version_dir(tree, &entry.path(), version, &mut found, &mut report)?;
        }

        for (id, version) in found {
            let mut file = LocalFile::new(&self.root, id, version);
            file.sync_with_disk()
                .map_err(|e| RegistryError::new("failed to stat", file.path(FileKind::Map), e))?;
            if !file.has_files() {
                continue;
            }
            if version == tree.version()
                && file.on_disk(FileKind::Diff)
                && !file.on_disk(FileKind::Map)
            {
                report.not_applied_diffs.push(file.country_id.clone());
            }
            self.register(file);
            report.registered += 1;
        }

        info!(
            root = %self.root.display(),
            registered = report.registered,
            not_applied_diffs = report.not_applied_diffs.len(),
            unknown = report.unknown_files.len(),
            "Local file scan complete"
        );
        Ok(report)
    }

    fn scan_version_dir(
        &self,
        tree: &CountryTree,
        dir: &Path,
        version: DataVersion,
        found: &mut BTreeSet<(CountryId, DataVersion)>,
        report: &mut ScanReport,
    ) -> RegistryResult<()> {
        let entries =
            fs::read_dir(dir).map_err(|e| RegistryError::new("failed to read", dir, e))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if naming::is_temporary_file_name(&name) {
                if version != tree.version() {
                    remove_if_exists(&path)?;
                    report.removed_temporaries += 1;
                }
                continue;
            }

            let Some((id, _kind)) = naming::parse_file_name(&name) else {
                continue;
            };
            if !tree.is_leaf(&id) {
                warn!(path = %path.display(), "Region file does not match any catalog leaf");
                report.unknown_files.push(path);
                continue;
            }
            found.insert((id, version));
        }
        Ok(())
    }

    /// Newest registered entry of a region.
    pub fn latest(&self, id: &str) -> Option<&LocalFile> {
        self.files.get(id).and_then(|v| v.last())
    }

    pub fn get(&self, id: &str, version: DataVersion) -> Option<&LocalFile> {
        self.files
            .get(id)
            .and_then(|v| v.iter().find(|f| f.version == version))
    }

    /// True when a map file of any version is registered.
    pub fn is_present(&self, id: &str) -> bool {
        self.files
            .get(id)
            .map(|v| v.iter().any(|f| f.on_disk(FileKind::Map)))
            .unwrap_or(false)
    }

    /// Newest entry holding a map file.
    pub fn latest_map(&self, id: &str) -> Option<&LocalFile> {
        self.files
            .get(id)
            .and_then(|v| v.iter().rev().find(|f| f.on_disk(FileKind::Map)))
    }

    /// Ids of every region with registered files.
    pub fn ids(&self) -> impl Iterator<Item = &CountryId> {
        self.files.keys()
    }

    /// Adds or replaces the entry for `(file.country_id, file.version)`.
    pub fn register(&mut self, file: LocalFile) {
        let list = self.files.entry(file.country_id.clone()).or_default();
        match list.iter_mut().find(|f| f.version == file.version) {
            Some(existing) => *existing = file,
            None => {
                list.push(file);
                list.sort_by_key(|f| f.version);
            }
        }
    }

    /// Deletes every version of a region from disk and the registry.
    pub fn remove_all(&mut self, id: &str) -> RegistryResult<()> {
        let Some(mut list) = self.files.remove(id) else {
            return Ok(());
        };
        for file in &mut list {
            let path = file.path(FileKind::Map);
            file.delete_all()
                .map_err(|e| RegistryError::new("failed to delete", path, e))?;
        }
        debug!(country_id = id, versions = list.len(), "Removed local files");
        Ok(())
    }

    /// Deletes every version strictly older than `version`.
    pub fn remove_older_than(&mut self, id: &str, version: DataVersion) -> RegistryResult<()> {
        let Some(list) = self.files.get_mut(id) else {
            return Ok(());
        };
        let mut kept = Vec::with_capacity(list.len());
        for mut file in list.drain(..) {
            if file.version < version {
                let path = file.path(FileKind::Map);
                file.delete_all()
                    .map_err(|e| RegistryError::new("failed to delete", path, e))?;
                debug!(country_id = id, version = file.version, "Removed old version");
            } else {
                kept.push(file);
            }
        }
        *list = kept;
        if list.is_empty() {
            self.files.remove(id);
        }
        Ok(())
    }

    /// Deletes one file of one version.
    pub fn remove_file(
        &mut self,
        id: &str,
        version: DataVersion,
        kind: FileKind,
    ) -> RegistryResult<()> {
        let Some(list) = self.files.get_mut(id) else {
            return Ok(());
        };
        if let Some(file) = list.iter_mut().find(|f| f.version == version) {
            let path = file.path(kind);
            file.delete_from_disk(kind)
                .map_err(|e| RegistryError::new("failed to delete", path, e))?;
        }
        list.retain(LocalFile::has_files);
        if list.is_empty() {
            self.files.remove(id);
        }
        Ok(())
    }

    /// Creates the directory for a data version.
    pub fn prepare_version_dir(&self, version: DataVersion) -> RegistryResult<PathBuf> {
        let dir = naming::version_directory(&self.root, version);
        fs::create_dir_all(&dir).map_err(|e| RegistryError::new("failed to create", &dir, e))?;
        Ok(dir)
    }

    /// Removes every temporary a download of this file may have written.
    pub fn delete_download_artifacts(
        &self,
        id: &str,
        version: DataVersion,
        kind: FileKind,
    ) -> RegistryResult<()> {
        for path in naming::temporary_paths(&self.root, version, id, kind) {
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    /// Moves a finished `.ready` download to its stable path and registers it.
    ///
    /// Returns the size of the promoted file.
    pub fn promote_download(
        &mut self,
        id: &str,
        version: DataVersion,
        kind: FileKind,
    ) -> RegistryResult<u64> {
        let ready = naming::download_path(&self.root, version, id, kind);
        let target = naming::file_path(&self.root, version, id, kind);
        fs::rename(&ready, &target)
            .map_err(|e| RegistryError::new("failed to rename", &ready, e))?;
        self.refresh(id, version)?;
        let size = self
            .get(id, version)
            .map(|f| f.size(kind))
            .unwrap_or_default();
        debug!(country_id = id, version, ?kind, size, "Promoted download");
        Ok(size)
    }

    /// Re-reads one (region, version) entry from disk.
    pub fn refresh(&mut self, id: &str, version: DataVersion) -> RegistryResult<()> {
        let mut file = LocalFile::new(&self.root, id, version);
        file.sync_with_disk()
            .map_err(|e| RegistryError::new("failed to stat", file.path(FileKind::Map), e))?;
        if file.has_files() {
            self.register(file);
        } else if let Some(list) = self.files.get_mut(id) {
            list.retain(|f| f.version != version);
            if list.is_empty() {
                self.files.remove(id);
            }
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> RegistryResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegistryError::new("failed to delete", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country::CountryTreeBuilder;
    use tempfile::TempDir;

    fn tree() -> CountryTree {
        let mut b = CountryTreeBuilder::new("Countries", 3);
        b.add_leaf("Countries", "Luna", 10).unwrap();
        b.add_leaf("Countries", "Mars", 10).unwrap();
        b.build()
    }

    fn touch(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut reg = LocalFileRegistry::new(dir.path().join("missing"));
        let report = reg.scan(&tree()).unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[test]
    fn test_scan_registers_versions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("1/Luna.map"), b"old");
        touch(&root.join("3/Luna.map"), b"newer");
        touch(&root.join("3/Pluto.map"), b"?");
        touch(&root.join("fonts/whatever.map"), b"?");

        let mut reg = LocalFileRegistry::new(root);
        let report = reg.scan(&tree()).unwrap();

        assert_eq!(report.registered, 2);
        assert_eq!(report.unknown_files.len(), 1);
        assert_eq!(reg.latest("Luna").unwrap().version, 3);
        assert_eq!(reg.latest("Luna").unwrap().size(FileKind::Map), 5);
        assert!(reg.is_present("Luna"));
        assert!(!reg.is_present("Mars"));
    }

    #[test]
    fn test_scan_reports_not_applied_diff_and_cleans_stale_temporaries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("1/Mars.map"), b"old");
        touch(&root.join("3/Mars.mapdiff"), b"diff");
        touch(&root.join("1/Luna.map.ready.downloading"), b"partial");
        touch(&root.join("3/Luna.map.ready.downloading"), b"partial");

        let mut reg = LocalFileRegistry::new(root);
        let report = reg.scan(&tree()).unwrap();

        assert_eq!(report.not_applied_diffs, vec!["Mars".to_string()]);
        assert_eq!(report.removed_temporaries, 1);
        assert!(!root.join("1/Luna.map.ready.downloading").exists());
        // Current-version partials are kept for resumption.
        assert!(root.join("3/Luna.map.ready.downloading").exists());
    }

    #[test]
    fn test_promote_download() {
        let dir = TempDir::new().unwrap();
        let mut reg = LocalFileRegistry::new(dir.path());
        reg.prepare_version_dir(3).unwrap();
        touch(&dir.path().join("3/Luna.map.ready"), b"0123456789");

        let size = reg.promote_download("Luna", 3, FileKind::Map).unwrap();
        assert_eq!(size, 10);
        assert!(dir.path().join("3/Luna.map").exists());
        assert!(!dir.path().join("3/Luna.map.ready").exists());
        assert!(reg.is_present("Luna"));
    }

    #[test]
    fn test_remove_older_than_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("1/Luna.map"), b"a");
        touch(&root.join("3/Luna.map"), b"b");
        let mut reg = LocalFileRegistry::new(root);
        reg.scan(&tree()).unwrap();

        reg.remove_older_than("Luna", 3).unwrap();
        assert!(!root.join("1/Luna.map").exists());
        assert!(root.join("3/Luna.map").exists());
        assert!(reg.get("Luna", 1).is_none());
        assert!(reg.get("Luna", 3).is_some());
    }

    #[test]
    fn test_remove_all_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("3/Luna.map"), b"a");
        touch(&root.join("3/Luna.map.ready.downloading"), b"p");
        touch(&root.join("3/Luna.map.ready.resume"), b"r");
        let mut reg = LocalFileRegistry::new(root);
        reg.scan(&tree()).unwrap();

        reg.remove_all("Luna").unwrap();
        reg.delete_download_artifacts("Luna", 3, FileKind::Map).unwrap();
        assert!(!reg.is_present("Luna"));
        assert!(reg.latest("Luna").is_none());
        assert_eq!(fs::read_dir(root.join("3")).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_single_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("3/Mars.map"), b"m");
        touch(&root.join("3/Mars.mapdiff"), b"d");
        let mut reg = LocalFileRegistry::new(root);
        reg.scan(&tree()).unwrap();

        reg.remove_file("Mars", 3, FileKind::Diff).unwrap();
        let file = reg.latest("Mars").unwrap();
        assert!(file.on_disk(FileKind::Map));
        assert!(!file.on_disk(FileKind::Diff));
    }
}
