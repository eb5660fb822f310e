//! Download gating collaborator.

/// Decides whether transfers may start right now.
///
/// Hosts implement this to block downloads on metered connections or while
/// roaming. Retrying is always an explicit caller action; the
/// `is_auto_retry_exhausted` flag only lets a host's own retry logic expose
/// its state through the storage.
pub trait DownloadingPolicy: Send + Sync {
    fn is_downloading_allowed(&self) -> bool;

    fn is_auto_retry_exhausted(&self) -> bool {
        false
    }
}

/// Always allows downloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllDownloads;

impl DownloadingPolicy for AllowAllDownloads {
    fn is_downloading_allowed(&self) -> bool {
        true
    }
}
