//! A region's files for one data version.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::naming::{self, DIFF_EXTENSION, MAP_EXTENSION};
use crate::country::{CountryId, DataVersion};

/// Kind of region file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Primary map data.
    Map,
    /// Binary diff from an older version.
    Diff,
}

impl FileKind {
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Map => MAP_EXTENSION,
            FileKind::Diff => DIFF_EXTENSION,
        }
    }
}

/// Files of one region at one version, with their last known sizes.
///
/// A `None` size means the file is not on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub country_id: CountryId,
    pub version: DataVersion,
    directory: PathBuf,
    map_size: Option<u64>,
    diff_size: Option<u64>,
}

impl LocalFile {
    /// Creates an entry with no files marked present. Call
    /// [`sync_with_disk`](Self::sync_with_disk) to pick up what exists.
    pub fn new(root: &Path, country_id: impl Into<CountryId>, version: DataVersion) -> Self {
        Self {
            country_id: country_id.into(),
            version,
            directory: naming::version_directory(root, version),
            map_size: None,
            diff_size: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, kind: FileKind) -> PathBuf {
        self.directory.join(naming::file_name(&self.country_id, kind))
    }

    pub fn on_disk(&self, kind: FileKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Size of the file, zero when absent.
    pub fn size(&self, kind: FileKind) -> u64 {
        self.slot(kind).unwrap_or(0)
    }

    pub fn has_files(&self) -> bool {
        self.map_size.is_some() || self.diff_size.is_some()
    }

    /// Refreshes presence and sizes from the filesystem.
    pub fn sync_with_disk(&mut self) -> io::Result<()> {
        for kind in [FileKind::Map, FileKind::Diff] {
            let size = match fs::metadata(self.path(kind)) {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                Ok(_) => None,
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };
            *self.slot_mut(kind) = size;
        }
        Ok(())
    }

    /// Records a file as present without touching the disk.
    pub fn mark_present(&mut self, kind: FileKind, size: u64) {
        *self.slot_mut(kind) = Some(size);
    }

    /// Removes one file. A file that is already gone is not an error.
    pub fn delete_from_disk(&mut self, kind: FileKind) -> io::Result<()> {
        match fs::remove_file(self.path(kind)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        *self.slot_mut(kind) = None;
        Ok(())
    }

    /// Removes every file of this entry.
    pub fn delete_all(&mut self) -> io::Result<()> {
        self.delete_from_disk(FileKind::Map)?;
        self.delete_from_disk(FileKind::Diff)
    }

    fn slot(&self, kind: FileKind) -> Option<u64> {
        match kind {
            FileKind::Map => self.map_size,
            FileKind::Diff => self.diff_size,
        }
    }

    fn slot_mut(&mut self, kind: FileKind) -> &mut Option<u64> {
        match kind {
            FileKind::Map => &mut self.map_size,
            FileKind::Diff => &mut self.diff_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sync_with_disk() {
        let dir = TempDir::new().unwrap();
        let mut file = LocalFile::new(dir.path(), "Luna", 250101);
        assert!(!file.has_files());

        fs::create_dir_all(file.directory()).unwrap();
        fs::write(file.path(FileKind::Map), b"abcd").unwrap();
        file.sync_with_disk().unwrap();

        assert!(file.on_disk(FileKind::Map));
        assert!(!file.on_disk(FileKind::Diff));
        assert_eq!(file.size(FileKind::Map), 4);
    }

    #[test]
    fn test_delete_from_disk() {
        let dir = TempDir::new().unwrap();
        let mut file = LocalFile::new(dir.path(), "Luna", 1);
        fs::create_dir_all(file.directory()).unwrap();
        fs::write(file.path(FileKind::Map), b"x").unwrap();
        file.sync_with_disk().unwrap();

        file.delete_all().unwrap();
        assert!(!file.has_files());
        assert!(!file.path(FileKind::Map).exists());
        // Second delete is a no-op.
        file.delete_all().unwrap();
    }

    #[test]
    fn test_path_layout() {
        let file = LocalFile::new(Path::new("/maps"), "Luna", 3);
        assert_eq!(file.path(FileKind::Map), Path::new("/maps/3/Luna.map"));
        assert_eq!(file.path(FileKind::Diff), Path::new("/maps/3/Luna.mapdiff"));
    }
}
