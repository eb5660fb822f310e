//! MapStore - offline map region storage and download orchestration
//!
//! This library keeps track of which map regions are present on disk, at
//! which data version, and drives their download, update, cancellation and
//! deletion. Regions form a catalog tree: leaves are downloadable region
//! files, groups aggregate leaves and only ever have derived state.
//!
//! # Modules
//!
//! - [`country`]: catalog tree, node types and localized names
//! - [`local`]: on-disk layout and the registry of present files
//! - [`diff`]: available binary diffs and free space checks
//! - [`queue`]: the download queue and completion messages
//! - [`transport`]: the byte transport contract and its HTTP implementation
//! - [`notify`]: observer events and status batching
//! - [`storage`]: the orchestrator, its daemon and handle
//! - [`config`]: configuration and its INI file
//! - [`logging`]: optional tracing setup for host applications
//!
//! # Example
//!
//! ```ignore
//! use mapstore::{StorageBuilder, StorageConfig, StorageDaemon};
//!
//! let tree = mapstore::country::load_catalog(Path::new("countries.json"))?;
//! let storage = StorageBuilder::new(StorageConfig::load()?, tree).build()?;
//! let (daemon, handle) = StorageDaemon::new(storage);
//! tokio::spawn(daemon.run(shutdown.clone()));
//!
//! let (_, mut events) = handle.subscribe_channel();
//! handle.download_node("Europe").await?;
//! ```

pub mod config;
pub mod country;
pub mod diff;
pub mod local;
pub mod logging;
pub mod notify;
pub mod queue;
pub mod storage;
pub mod transport;

pub use config::{ConcurrencyPolicy, StorageConfig};
pub use country::{CountryId, CountryTree, NodeErrorCode, NodeStatus, Progress};
pub use notify::{StatusChange, StorageEvent};
pub use storage::{
    NodeAttrs, Storage, StorageBuilder, StorageDaemon, StorageError, StorageHandle, StorageResult,
};
