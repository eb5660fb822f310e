//! Error types for storage operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::country::{CatalogError, CountryId};
use crate::local::RegistryError;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The id names no catalog node.
    #[error("unknown country id '{0}'")]
    UnknownCountry(CountryId),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    LocalFiles(#[from] RegistryError),

    #[error("failed to persist download queue to {path}: {reason}")]
    QueuePersistence { path: PathBuf, reason: String },

    /// The daemon owning the storage is no longer running.
    #[error("storage daemon stopped")]
    DaemonStopped,
}

pub type StorageResult<T> = Result<T, StorageError>;
