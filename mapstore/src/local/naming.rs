//! On-disk naming conventions for region files.
//!
//! This module is the single source of truth for every path the storage
//! writes or scans:
//! - Stable files: `{root}/{version}/{id}.map`
//! - Diff files: `{root}/{version}/{id}.mapdiff`
//! - Finished, unregistered downloads: `{file}.ready`
//! - In-progress downloads: `{file}.ready.downloading` plus `{file}.ready.resume`
//!
//! A new version always lands in its own version directory, so the stable
//! file of an older version is never touched by a running transfer.

use std::path::{Path, PathBuf};

use super::file::FileKind;
use crate::country::DataVersion;

/// Extension of a primary map file.
pub const MAP_EXTENSION: &str = "map";

/// Extension of a binary diff file.
pub const DIFF_EXTENSION: &str = "mapdiff";

/// Suffix of a completed but not yet registered download.
pub const READY_SUFFIX: &str = ".ready";

/// Suffix of a partially written download.
pub const DOWNLOADING_SUFFIX: &str = ".downloading";

/// Suffix of the resume record written next to a partial download.
pub const RESUME_SUFFIX: &str = ".resume";

/// File name of a region file.
///
/// # Examples
///
/// ```
/// use mapstore::local::{file_name, FileKind};
///
/// assert_eq!(file_name("Luna", FileKind::Map), "Luna.map");
/// assert_eq!(file_name("Luna", FileKind::Diff), "Luna.mapdiff");
/// ```
pub fn file_name(country_id: &str, kind: FileKind) -> String {
    format!("{}.{}", country_id, kind.extension())
}

/// Directory holding every file of one data version.
pub fn version_directory(root: &Path, version: DataVersion) -> PathBuf {
    root.join(version.to_string())
}

/// Stable path of a region file.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mapstore::local::{file_path, FileKind};
///
/// assert_eq!(
///     file_path(Path::new("/data"), 250101, "Luna", FileKind::Map),
///     Path::new("/data/250101/Luna.map")
/// );
/// ```
pub fn file_path(root: &Path, version: DataVersion, country_id: &str, kind: FileKind) -> PathBuf {
    version_directory(root, version).join(file_name(country_id, kind))
}

/// Path a transport writes its finished download to.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mapstore::local::{download_path, FileKind};
///
/// assert_eq!(
///     download_path(Path::new("/data"), 250101, "Luna", FileKind::Map),
///     Path::new("/data/250101/Luna.map.ready")
/// );
/// ```
pub fn download_path(
    root: &Path,
    version: DataVersion,
    country_id: &str,
    kind: FileKind,
) -> PathBuf {
    with_suffix(&file_path(root, version, country_id, kind), READY_SUFFIX)
}

/// Path of the partial file for a download destination.
pub fn downloading_path(destination: &Path) -> PathBuf {
    with_suffix(destination, DOWNLOADING_SUFFIX)
}

/// Path of the resume record for a download destination.
pub fn resume_path(destination: &Path) -> PathBuf {
    with_suffix(destination, RESUME_SUFFIX)
}

/// Every temporary path a download of this file can leave behind.
pub fn temporary_paths(
    root: &Path,
    version: DataVersion,
    country_id: &str,
    kind: FileKind,
) -> [PathBuf; 3] {
    let ready = download_path(root, version, country_id, kind);
    [downloading_path(&ready), resume_path(&ready), ready]
}

/// Appends a suffix to the full file name (not replacing the extension).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Splits a stable file name into id and kind.
///
/// Temporary files are not stable files and yield `None`.
///
/// # Examples
///
/// ```
/// use mapstore::local::{parse_file_name, FileKind};
///
/// assert_eq!(parse_file_name("Luna.map"), Some(("Luna".to_string(), FileKind::Map)));
/// assert_eq!(parse_file_name("Luna.mapdiff"), Some(("Luna".to_string(), FileKind::Diff)));
/// assert_eq!(parse_file_name("Luna.map.ready"), None);
/// ```
pub fn parse_file_name(name: &str) -> Option<(String, FileKind)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let kind = match ext {
        MAP_EXTENSION => FileKind::Map,
        DIFF_EXTENSION => FileKind::Diff,
        _ => return None,
    };
    Some((stem.to_string(), kind))
}

/// True for names ending in one of the temporary download suffixes.
pub fn is_temporary_file_name(name: &str) -> bool {
    name.ends_with(READY_SUFFIX)
        || name.ends_with(DOWNLOADING_SUFFIX)
        || name.ends_with(RESUME_SUFFIX)
}

/// Parses a version directory name.
pub fn parse_version_directory(name: &str) -> Option<DataVersion> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_paths() {
        let [downloading, resume, ready] =
            temporary_paths(Path::new("/d"), 7, "Luna", FileKind::Diff);
        assert_eq!(ready, Path::new("/d/7/Luna.mapdiff.ready"));
        assert_eq!(downloading, Path::new("/d/7/Luna.mapdiff.ready.downloading"));
        assert_eq!(resume, Path::new("/d/7/Luna.mapdiff.ready.resume"));
    }

    #[test]
    fn test_ids_with_spaces_and_dots() {
        assert_eq!(
            parse_file_name("St. Helena.map"),
            Some(("St. Helena".to_string(), FileKind::Map))
        );
        assert_eq!(parse_file_name(".map"), None);
        assert_eq!(parse_file_name("README"), None);
    }

    #[test]
    fn test_temporary_names() {
        assert!(is_temporary_file_name("Luna.map.ready"));
        assert!(is_temporary_file_name("Luna.map.ready.downloading"));
        assert!(is_temporary_file_name("Luna.map.ready.resume"));
        assert!(!is_temporary_file_name("Luna.map"));
    }

    #[test]
    fn test_version_directory_names() {
        assert_eq!(parse_version_directory("250101"), Some(250101));
        assert_eq!(parse_version_directory("fonts"), None);
        assert_eq!(parse_version_directory(""), None);
        assert_eq!(parse_version_directory("-1"), None);
    }
}
