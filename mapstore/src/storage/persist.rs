//! Download queue persistence.
//!
//! The queue is saved as a small JSON document in the data directory after
//! every membership change, and restored once at startup:
//!
//! ```json
//! { "version": 250101, "countries": ["Luna", "Mars"] }
//! ```

use std::fs;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Storage, StorageError, StorageResult};
use crate::country::{CountryId, DataVersion};
use crate::local;

#[derive(Debug, Serialize, Deserialize)]
struct SavedQueue {
    version: DataVersion,
    countries: Vec<CountryId>,
}

impl Storage {
    /// Writes the queued ids in queue order.
    pub fn save_queue(&self) -> StorageResult<()> {
        let path = self.config.queue_file();
        let saved = SavedQueue {
            version: self.tree.version(),
            countries: self.queue.ids(),
        };
        let persistence_error = |reason: String| StorageError::QueuePersistence {
            path: path.clone(),
            reason,
        };

        let json =
            serde_json::to_string_pretty(&saved).map_err(|e| persistence_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| persistence_error(e.to_string()))?;
        }
        let tmp = local::with_suffix(&path, ".tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| persistence_error(e.to_string()))?;

        debug!(queued = saved.countries.len(), "Download queue saved");
        Ok(())
    }

    /// Re-queues the ids saved by an earlier run and starts dispatching.
    ///
    /// Leaves with a local map are queued as updates. Ids the catalog no
    /// longer knows are skipped. Returns the number of leaves queued.
    pub fn restore_queue(&mut self) -> StorageResult<usize> {
        let path = self.config.queue_file();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StorageError::QueuePersistence {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        let saved: SavedQueue =
            serde_json::from_str(&json).map_err(|e| StorageError::QueuePersistence {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut restored = 0;
        self.batched(|storage| {
            for id in &saved.countries {
                if !storage.tree.is_leaf(id) {
                    warn!(country_id = %id, "Saved queue entry is not a catalog leaf");
                    continue;
                }
                storage.enqueue_leaf(id);
                if storage.queue.contains(id) {
                    restored += 1;
                }
            }
            Ok(())
        })?;

        info!(
            restored,
            saved_version = saved.version,
            version = self.tree.version(),
            "Download queue restored"
        );
        Ok(restored)
    }
}
