//! Cloneable async front end of a running [`StorageDaemon`](super::StorageDaemon).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::attrs::{NodeAttrs, NodeStatuses};
use super::daemon::{NodeOperation, StorageCommand};
use super::{Storage, StorageError, StorageResult};
use crate::country::{CountryId, Progress};
use crate::diff::DiffInfo;
use crate::notify::{EventSink, Notifier, StorageEvent, SubscriptionId};

/// Sends commands to the daemon and awaits their replies.
///
/// Subscriptions go straight to the shared notifier and work from any
/// thread, even while the daemon is busy.
#[derive(Clone)]
pub struct StorageHandle {
    tx: mpsc::Sender<StorageCommand>,
    notifier: Notifier,
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl StorageHandle {
    pub(crate) fn new(tx: mpsc::Sender<StorageCommand>, notifier: Notifier) -> Self {
        Self { tx, notifier }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.notifier.subscribe(sink)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StorageEvent>) {
        self.notifier.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // -------------------------------------------------------------------------
    // Node operations
    // -------------------------------------------------------------------------

    pub async fn download_node(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        self.node_operation(NodeOperation::Download, id.into()).await
    }

    pub async fn retry_download_node(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        self.node_operation(NodeOperation::Retry, id.into()).await
    }

    pub async fn update_node(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        self.node_operation(NodeOperation::Update, id.into()).await
    }

    pub async fn cancel_download_node(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        self.node_operation(NodeOperation::Cancel, id.into()).await
    }

    pub async fn delete_node(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        self.node_operation(NodeOperation::Delete, id.into()).await
    }

    async fn node_operation(
        &self,
        operation: NodeOperation,
        country_id: CountryId,
    ) -> StorageResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::Node {
            operation,
            country_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StorageError::DaemonStopped)?
    }

    pub async fn set_current_region(&self, id: impl Into<CountryId>) -> StorageResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::SetCurrentRegion {
            country_id: id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StorageError::DaemonStopped)?
    }

    pub async fn on_diff_status_received(
        &self,
        diffs: HashMap<CountryId, DiffInfo>,
    ) -> StorageResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::DiffStatusReceived { diffs, reply })
            .await?;
        rx.await.map_err(|_| StorageError::DaemonStopped)
    }

    pub async fn restore_queue(&self) -> StorageResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::RestoreQueue { reply }).await?;
        rx.await.map_err(|_| StorageError::DaemonStopped)?
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Runs `f` against the storage on the daemon task and returns its
    /// result.
    pub async fn query<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(StorageCommand::Run(Box::new(move |storage: &mut Storage| {
            let _ = reply.send(f(storage));
        })))
        .await?;
        rx.await.map_err(|_| StorageError::DaemonStopped)
    }

    pub async fn get_node_attrs(&self, id: impl Into<CountryId>) -> StorageResult<NodeAttrs> {
        let id = id.into();
        self.query(move |s| s.get_node_attrs(&id)).await?
    }

    pub async fn get_node_statuses(
        &self,
        id: impl Into<CountryId>,
    ) -> StorageResult<NodeStatuses> {
        let id = id.into();
        self.query(move |s| s.get_node_statuses(&id)).await?
    }

    pub async fn get_overall_progress(&self, ids: Vec<CountryId>) -> StorageResult<Progress> {
        self.query(move |s| s.get_overall_progress(&ids)).await?
    }

    pub async fn get_group_node_path_to_root(
        &self,
        id: impl Into<CountryId>,
    ) -> StorageResult<Vec<CountryId>> {
        let id = id.into();
        self.query(move |s| s.get_group_node_path_to_root(&id)).await
    }

    pub async fn is_download_in_progress(&self) -> StorageResult<bool> {
        self.query(|s| s.is_download_in_progress()).await
    }

    pub async fn get_root_id(&self) -> StorageResult<CountryId> {
        self.query(|s| s.get_root_id().to_string()).await
    }

    async fn send(&self, command: StorageCommand) -> StorageResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| StorageError::DaemonStopped)
    }
}
