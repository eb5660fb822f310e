//! Local storage of region files: naming, per-version entries and the
//! registry that scans and mutates them.

mod file;
mod naming;
mod registry;

pub use file::{FileKind, LocalFile};
pub use naming::{
    download_path, downloading_path, file_name, file_path, is_temporary_file_name,
    parse_file_name, parse_version_directory, resume_path, temporary_paths, version_directory,
    with_suffix, DIFF_EXTENSION, DOWNLOADING_SUFFIX, MAP_EXTENSION, READY_SUFFIX, RESUME_SUFFIX,
};
pub use registry::{LocalFileRegistry, RegistryError, RegistryResult, ScanReport};
