//! Free space accounting.

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Extra headroom required on top of any download (10 MiB).
pub const DOWNLOAD_SLACK_BYTES: u64 = 10 * 1024 * 1024;

/// Source of the free writable space for the data directory.
pub trait FreeSpaceSource: Send + Sync {
    fn free_bytes(&self) -> u64;
}

/// Queries `statvfs(2)` for the filesystem holding a directory.
#[derive(Debug, Clone)]
pub struct StatvfsFreeSpace {
    path: PathBuf,
}

impl StatvfsFreeSpace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[allow(clippy::unnecessary_cast)] // field types vary by platform
    fn query(path: &Path) -> io::Result<u64> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();

        // SAFETY: c_path is NUL-terminated and stat points to writable memory
        let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

        if result == 0 {
            // SAFETY: statvfs succeeded, stat is now initialized
            let stat = unsafe { stat.assume_init() };
            Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl FreeSpaceSource for StatvfsFreeSpace {
    fn free_bytes(&self) -> u64 {
        // The data directory may not exist yet; measure the closest ancestor.
        let mut candidate: Option<&Path> = Some(&self.path);
        while let Some(path) = candidate {
            if path.exists() {
                return match Self::query(path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "statvfs failed");
                        0
                    }
                };
            }
            candidate = path.parent();
        }
        0
    }
}

/// Fixed free space value.
#[derive(Debug, Clone, Copy)]
pub struct FixedFreeSpace(pub u64);

impl FreeSpaceSource for FixedFreeSpace {
    fn free_bytes(&self) -> u64 {
        self.0
    }
}

/// True iff `bytes` plus the slack fits into `free`.
pub fn fits_with_slack(bytes: u64, free: u64) -> bool {
    bytes
        .checked_add(DOWNLOAD_SLACK_BYTES)
        .map(|needed| needed <= free)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fits_with_slack_boundary() {
        let free = DOWNLOAD_SLACK_BYTES + 100;
        assert!(fits_with_slack(100, free));
        assert!(!fits_with_slack(101, free));
        assert!(!fits_with_slack(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_statvfs_reports_space_for_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = StatvfsFreeSpace::new(dir.path().join("not/yet/created"));
        assert!(source.free_bytes() > 0);
    }

    proptest! {
        #[test]
        fn prop_space_check_is_monotonic(free in any::<u64>(), x in any::<u64>(), y in any::<u64>()) {
            let (small, large) = if x <= y { (x, y) } else { (y, x) };
            if !fits_with_slack(small, free) {
                prop_assert!(!fits_with_slack(large, free));
            }
        }
    }
}
