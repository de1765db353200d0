//! Download queue manager.
//!
//! The [`DownloadQueueManager`] owns the item queue and the in-flight part
//! set. It admits parts to transfers under a fixed concurrency cap, runs the
//! storage preflight, re-admits parts after transient failures, moves
//! completed parts to their destination, drives the
//! [`NotificationCoordinator`], and reports everything through a
//! [`DownloadEventSink`].
//!
//! # Concurrency model
//!
//! - One `parking_lot::Mutex` guards all queue state; nothing awaits while
//!   it is held
//! - Each admitted part runs on its own tokio task and re-enters the manager
//!   through the completion path
//! - Ownership of a part is the pair (part id, download id): a completion
//!   whose download id is no longer in flight (canceled, cleaned up) is
//!   ignored, so a canceled part is never moved; a cancel that lands while
//!   the part is moving leaves it to the mover, which discards the result
//! - Events are collected under the lock and delivered after it is released
//! - Persistence writes go through a single writer task, in lock order
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bookshelf_downloader::{DownloadQueueManager, ManagerConfig};
//! use bookshelf_downloader::download::{ClientOptions, HttpClient};
//! use bookshelf_downloader::model::DownloadItem;
//!
//! # async fn example(item: DownloadItem) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::default();
//! let client = HttpClient::new(config.client_options())?;
//! let manager = DownloadQueueManager::builder(config, Arc::new(client)).build()?;
//!
//! manager.add_download_item(item)?;
//! manager.wait_until_drained().await;
//! manager.cleanup();
//! # Ok(())
//! # }
//! ```

mod error;
mod events;
mod lifecycle;
mod mover;
mod state;
mod storage;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use error::ManagerError;
pub use events::{DownloadErrorCode, DownloadEventSink, TracingEventSink};
pub use lifecycle::{HostLifecycle, LifecycleFlag};
pub use mover::{FsPartMover, PartMover};
pub use storage::{FsStorageProbe, StorageProbe, StorageShortfall, preflight, required_headroom};

use self::events::ManagerEvent;
use self::state::{InFlightPart, QueueState};
use crate::config::ManagerConfig;
use crate::download::{
    DownloadError, PartTransport, ProgressSink, TransferJob, TransferOutcome, TransferProgress,
};
use crate::model::DownloadItem;
use crate::notification::{NotificationCoordinator, ResourceHold, TimedHold};
use crate::store::DownloadStore;

/// Result of [`DownloadQueueManager::add_download_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddItemOutcome {
    /// The item was queued.
    Queued,
    /// An item with the same id is already queued; nothing changed.
    AlreadyQueued,
    /// The host is tearing down; the request was dropped.
    Dropped,
}

/// One admission of one part.
#[derive(Debug, Clone)]
struct Admission {
    item_id: String,
    part_id: String,
    download_id: u64,
}

/// Work for the persistence writer task.
enum StoreOp {
    Save(Box<DownloadItem>),
    Remove(String),
    Flush(oneshot::Sender<()>),
}

struct Inner {
    config: ManagerConfig,
    transport: Arc<dyn PartTransport>,
    events: Arc<dyn DownloadEventSink>,
    storage: Arc<dyn StorageProbe>,
    lifecycle: Arc<dyn HostLifecycle>,
    mover: Arc<dyn PartMover>,
    store: Option<Arc<dyn DownloadStore>>,
    store_tx: Option<mpsc::UnboundedSender<StoreOp>>,
    runtime: Handle,
    state: Mutex<QueueState>,
    drained: watch::Sender<bool>,
}

/// Builder returned by [`DownloadQueueManager::builder`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    transport: Arc<dyn PartTransport>,
    events: Option<Arc<dyn DownloadEventSink>>,
    hold: Option<Arc<dyn ResourceHold>>,
    storage: Option<Arc<dyn StorageProbe>>,
    lifecycle: Option<Arc<dyn HostLifecycle>>,
    mover: Option<Arc<dyn PartMover>>,
    store: Option<Arc<dyn DownloadStore>>,
}

impl ManagerBuilder {
    /// Event receiver. Defaults to [`TracingEventSink`].
    #[must_use]
    pub fn events(mut self, events: Arc<dyn DownloadEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Platform resource hold. Defaults to [`TimedHold`].
    #[must_use]
    pub fn hold(mut self, hold: Arc<dyn ResourceHold>) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Free-space source. Defaults to [`FsStorageProbe`].
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageProbe>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Host lifecycle guard. Defaults to a [`LifecycleFlag`] that never tears down.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Arc<dyn HostLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Staging-to-library move. Defaults to [`FsPartMover`].
    #[must_use]
    pub fn mover(mut self, mover: Arc<dyn PartMover>) -> Self {
        self.mover = Some(mover);
        self
    }

    /// Persistence collaborator. Without one, nothing survives a restart.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn DownloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validates the config and builds the manager on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] for an invalid config and
    /// [`ManagerError::NoRuntime`] outside a tokio runtime.
    pub fn build(self) -> Result<DownloadQueueManager, ManagerError> {
        self.config.validate()?;
        let runtime = Handle::try_current()?;

        let hold = self.hold.unwrap_or_else(|| Arc::new(TimedHold::new()));
        let coordinator = NotificationCoordinator::new(hold, Some(self.config.hold_timeout()));

        let store_tx = self.store.clone().map(|store| {
            let (tx, rx) = mpsc::unbounded_channel();
            runtime.spawn(run_store_writer(store, rx));
            tx
        });
        let (drained, _) = watch::channel(true);

        debug!(
            max_concurrent_parts = self.config.max_concurrent_parts,
            max_part_retries = self.config.max_part_retries,
            persistent = store_tx.is_some(),
            "creating download queue manager"
        );

        Ok(DownloadQueueManager {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                events: self.events.unwrap_or_else(|| Arc::new(TracingEventSink)),
                storage: self.storage.unwrap_or_else(|| Arc::new(FsStorageProbe)),
                lifecycle: self
                    .lifecycle
                    .unwrap_or_else(|| Arc::new(LifecycleFlag::new())),
                mover: self.mover.unwrap_or_else(|| Arc::new(FsPartMover)),
                store: self.store,
                store_tx,
                runtime,
                state: Mutex::new(QueueState::new(coordinator)),
                drained,
            }),
        })
    }
}

/// Owns the download queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct DownloadQueueManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for DownloadQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadQueueManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DownloadQueueManager {
    /// Starts building a manager that moves bytes through `transport`.
    #[must_use]
    pub fn builder(config: ManagerConfig, transport: Arc<dyn PartTransport>) -> ManagerBuilder {
        ManagerBuilder {
            config,
            transport,
            events: None,
            hold: None,
            storage: None,
            lifecycle: None,
            mover: None,
            store: None,
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Validates, preflights and queues an item, then admits parts.
    ///
    /// Requests made while the host is tearing down are dropped with a
    /// warning. A storage shortfall is reported once through
    /// `on_download_error(INSUFFICIENT_STORAGE, ..)` and nothing is started.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Item`] for an invalid item and
    /// [`ManagerError::InsufficientStorage`] when preflight fails.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub fn add_download_item(&self, item: DownloadItem) -> Result<AddItemOutcome, ManagerError> {
        if self.inner.lifecycle.is_tearing_down() {
            warn!("host is tearing down, dropping download request");
            return Ok(AddItemOutcome::Dropped);
        }
        item.validate()?;
        if self.inner.state.lock().contains_item(&item.id) {
            warn!("item already queued");
            return Ok(AddItemOutcome::AlreadyQueued);
        }

        let destination = item.local_folder.path.join(&item.item_subfolder);
        let total_size = item.total_size();
        if let Err(shortfall) = preflight(
            self.inner.storage.as_ref(),
            &destination,
            total_size,
            self.inner.config.storage_buffer_floor_bytes,
            self.inner.config.storage_buffer_percent,
        ) {
            let details = shortfall.describe();
            error!(
                required = shortfall.required,
                available = shortfall.available,
                "insufficient storage, item not queued"
            );
            self.inner
                .events
                .on_download_error(DownloadErrorCode::InsufficientStorage, &details);
            return Err(ManagerError::insufficient_storage(
                &item.id,
                shortfall.required,
                shortfall.available,
            ));
        }

        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.contains_item(&item.id) {
                warn!("item already queued");
                return Ok(AddItemOutcome::AlreadyQueued);
            }
            info!(parts = item.parts.len(), total_size, "queuing download item");
            self.inner.send_store(StoreOp::Save(Box::new(item.clone())));
            events.push(ManagerEvent::Queued(item.clone()));
            state.items.push_back(item);
            self.inner.pump(&mut state, &mut events);
        }
        self.inner.deliver(events);
        Ok(AddItemOutcome::Queued)
    }

    /// Cancels every in-flight part of the item and removes it.
    ///
    /// Staged files are deleted best-effort; a part that is mid-move is left
    /// to its mover, which undoes the move once it sees the cancel. Returns
    /// `false` for an unknown id.
    #[instrument(skip(self))]
    pub fn cancel_item(&self, item_id: &str) -> bool {
        let mut events = Vec::new();
        let staged = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.items.iter().position(|item| item.id == item_id) else {
                debug!("cancel requested for unknown item");
                return false;
            };
            let Some(item) = state.items.remove(index) else {
                return false;
            };

            let mut canceled = 0usize;
            state.in_flight.retain(|entry| {
                if entry.item_id == item_id {
                    entry.cancel.cancel();
                    canceled += 1;
                    false
                } else {
                    true
                }
            });
            for part in &item.parts {
                state.transient_failures.remove(&part.id);
            }
            self.inner.send_store(StoreOp::Remove(item.id.clone()));
            info!(canceled, "download item canceled");

            self.inner.pump(&mut state, &mut events);
            item.parts
                .iter()
                .filter(|part| !part.moved && !part.is_moving)
                .map(|part| part.temp_path.clone())
                .collect::<Vec<_>>()
        };
        self.inner.deliver(events);
        self.inner.runtime.spawn(remove_staged_files(staged));
        true
    }

    /// Cancels all transfers, stops the indicator and clears the queue.
    ///
    /// Idempotent and infallible; safe to call from any teardown path, also
    /// when nothing was ever started. Persisted items are kept for
    /// [`restore_incomplete_downloads`](Self::restore_incomplete_downloads).
    #[instrument(skip(self))]
    pub fn cleanup(&self) {
        let (canceled, dropped) = {
            let mut state = self.inner.state.lock();
            let canceled = state.cancel_all();
            let dropped = state.items.len();
            state.items.clear();
            state.transient_failures.clear();
            state.coordinator.stop();
            self.inner.drained.send_replace(true);
            (canceled, dropped)
        };
        if canceled == 0 && dropped == 0 {
            debug!("cleanup with nothing to clean up");
        } else {
            info!(canceled, dropped, "download manager cleaned up");
        }
    }

    /// Re-queues items persisted by a previous process.
    ///
    /// Transient fields are reset and `token` becomes the session token of
    /// every restored item. Preflight is skipped: their bytes are partly on
    /// disk already. Returns the number of items queued.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] if the store cannot be read.
    #[instrument(skip(self, token))]
    pub async fn restore_incomplete_downloads(
        &self,
        token: Option<String>,
    ) -> Result<usize, ManagerError> {
        let Some(store) = self.inner.store.clone() else {
            debug!("no store configured, nothing to restore");
            return Ok(0);
        };
        if self.inner.lifecycle.is_tearing_down() {
            warn!("host is tearing down, not restoring downloads");
            return Ok(0);
        }

        self.sync_store().await;
        let items = store.load_items().await?;

        let mut restored = 0usize;
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            for mut item in items {
                if state.contains_item(&item.id) {
                    continue;
                }
                item.reset_transient_state();
                item.server.token.clone_from(&token);

                if let Err(error) = item.validate() {
                    warn!(item_id = %item.id, error = %error, "dropping invalid stored item");
                    self.inner.send_store(StoreOp::Remove(item.id.clone()));
                    continue;
                }
                if item.is_settled() {
                    debug!(item_id = %item.id, "stored item already settled, dropping");
                    self.inner.send_store(StoreOp::Remove(item.id.clone()));
                    continue;
                }

                events.push(ManagerEvent::Queued(item.clone()));
                state.items.push_back(item);
                restored += 1;
            }
            if restored > 0 {
                self.inner.pump(&mut state, &mut events);
            }
        }
        self.inner.deliver(events);
        info!(restored, "restored incomplete downloads");
        Ok(restored)
    }

    /// Waits until every queued persistence write has been applied.
    pub async fn sync_store(&self) {
        let Some(tx) = &self.inner.store_tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(StoreOp::Flush(done_tx)).is_err() {
            warn!("store writer stopped, cannot flush");
            return;
        }
        if done_rx.await.is_err() {
            warn!("store writer stopped before flush completed");
        }
    }

    /// True while any item is queued or any part is in flight.
    #[must_use]
    pub fn has_active_downloads(&self) -> bool {
        !self.inner.state.lock().is_drained()
    }

    /// Number of admitted parts (transferring or moving).
    #[must_use]
    pub fn active_part_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Copies of all queued items, taken atomically.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadItem> {
        self.inner.state.lock().items.iter().cloned().collect()
    }

    /// Resolves once no item is queued and no part is in flight.
    pub async fn wait_until_drained(&self) {
        let mut rx = self.inner.drained.subscribe();
        if rx.wait_for(|drained| *drained).await.is_err() {
            debug!("drain watch closed");
        }
    }
}

impl Inner {
    fn send_store(&self, op: StoreOp) {
        if let Some(tx) = &self.store_tx
            && tx.send(op).is_err()
        {
            warn!("store writer stopped, persistence update lost");
        }
    }

    fn deliver(&self, events: Vec<ManagerEvent>) {
        for event in events {
            event.deliver(self.events.as_ref());
        }
    }

    /// Admits parts, retires settled items and refreshes the indicator.
    /// Call with the lock held.
    fn pump(self: &Arc<Self>, state: &mut QueueState, events: &mut Vec<ManagerEvent>) {
        self.admit_next(state, events);

        for item in state.drain_settled() {
            let success = !item.has_failed_parts();
            info!(item_id = %item.id, success, "download item settled");
            self.send_store(StoreOp::Remove(item.id.clone()));
            events.push(ManagerEvent::Complete(item, success));
        }

        self.refresh_indicator(state);
    }

    fn refresh_indicator(&self, state: &mut QueueState) {
        if state.is_drained() {
            state.coordinator.stop();
            self.drained.send_replace(true);
            return;
        }
        self.drained.send_replace(false);

        if !state.in_flight.is_empty() && !state.coordinator.is_visible() {
            if self.lifecycle.is_tearing_down() {
                warn!("host is tearing down, not starting download notification");
            } else {
                state.coordinator.start();
            }
        }
        let current = state.current_file().map(str::to_owned);
        let active = state.in_flight.len();
        state.coordinator.update(active, current.as_deref());
    }

    /// Hands admissible parts to transfers until the cap is reached, in
    /// item-arrival then part-declaration order.
    fn admit_next(self: &Arc<Self>, state: &mut QueueState, events: &mut Vec<ManagerEvent>) {
        let cap = self.config.max_concurrent_parts;

        for item in &mut state.items {
            let item_id = item.id.clone();
            let server = item.server.clone();
            loop {
                let free = cap.saturating_sub(state.in_flight.len());
                let parts = item.next_parts_mut(free);
                if parts.is_empty() {
                    break;
                }
                for part in parts {
                    let job = match TransferJob::for_part(part, &server) {
                        Ok(job) => job,
                        Err(error) => {
                            error!(part_id = %part.id, error = %error, "cannot build transfer, failing part");
                            part.failed = true;
                            events.push(ManagerEvent::Error(
                                DownloadErrorCode::DownloadFailed,
                                format!("{}: {error}", part.filename),
                            ));
                            events.push(ManagerEvent::PartUpdate(part.clone()));
                            continue;
                        }
                    };

                    state.next_download_id += 1;
                    let download_id = state.next_download_id;
                    part.download_id = Some(download_id);

                    let cancel = CancellationToken::new();
                    state.in_flight.push(InFlightPart {
                        part_id: part.id.clone(),
                        item_id: item_id.clone(),
                        download_id,
                        filename: part.filename.clone(),
                        cancel: cancel.clone(),
                    });
                    debug!(
                        item_id = %item_id,
                        part_id = %part.id,
                        download_id,
                        in_flight = state.in_flight.len(),
                        "part admitted"
                    );

                    let admission = Admission {
                        item_id: item_id.clone(),
                        part_id: part.id.clone(),
                        download_id,
                    };
                    let inner = Arc::clone(self);
                    self.runtime.spawn(async move {
                        inner.run_part(admission, job, cancel).await;
                    });
                }
            }
            if state.in_flight.len() >= cap {
                break;
            }
        }
    }

    async fn run_part(self: Arc<Self>, admission: Admission, job: TransferJob, cancel: CancellationToken) {
        let progress = self.progress_sink(&admission);
        let outcome = self.transport.transfer(job, progress, cancel).await;
        match outcome {
            TransferOutcome::Success { bytes } => self.complete_part(&admission, bytes).await,
            TransferOutcome::TransientFailure(error) => self.fail_part(&admission, &error, true),
            TransferOutcome::TerminalFailure(error) => self.fail_part(&admission, &error, false),
            TransferOutcome::Canceled => self.release_canceled(&admission),
        }
    }

    fn progress_sink(self: &Arc<Self>, admission: &Admission) -> ProgressSink {
        let inner: Weak<Self> = Arc::downgrade(self);
        let admission = admission.clone();
        Arc::new(move |progress: TransferProgress| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let update = {
                let mut state = inner.state.lock();
                if !state.owns(&admission.part_id, admission.download_id) {
                    return;
                }
                let Some(part) = state.part_mut(&admission.item_id, &admission.part_id) else {
                    return;
                };
                part.progress = progress.progress;
                part.bytes_downloaded = progress.bytes_downloaded;
                part.clone()
            };
            inner.events.on_download_item_part_update(&update);
        })
    }

    async fn complete_part(self: &Arc<Self>, admission: &Admission, bytes: u64) {
        let (temp_path, final_path) = {
            let mut state = self.state.lock();
            if !state.owns(&admission.part_id, admission.download_id) {
                debug!(part_id = %admission.part_id, "completion for a released admission ignored");
                return;
            }
            let Some(part) = state.part_mut(&admission.item_id, &admission.part_id) else {
                return;
            };
            part.completed = true;
            part.download_id = None;
            part.is_moving = true;
            part.bytes_downloaded = bytes;
            part.progress = 100;
            (part.temp_path.clone(), part.final_path.clone())
        };

        let moved = self.mover.move_part(&temp_path, &final_path).await;

        let mut events = Vec::new();
        let owned = {
            let mut state = self.state.lock();
            let owned = state
                .take_in_flight_if_owned(&admission.part_id, admission.download_id)
                .is_some();
            if owned {
                self.settle_moved_part(&mut state, admission, &final_path, &moved, &mut events);
            }
            owned
        };

        if !owned {
            debug!(part_id = %admission.part_id, "item canceled during move, discarding part");
            let leftover = if moved.is_ok() { final_path } else { temp_path };
            remove_staged_files(vec![leftover]).await;
            return;
        }
        if moved.is_err() {
            remove_staged_files(vec![temp_path]).await;
        }
        self.deliver(events);
    }

    fn settle_moved_part(
        self: &Arc<Self>,
        state: &mut QueueState,
        admission: &Admission,
        final_path: &Path,
        moved: &io::Result<()>,
        events: &mut Vec<ManagerEvent>,
    ) {
        if let Some(part) = state.part_mut(&admission.item_id, &admission.part_id) {
            part.is_moving = false;
            match moved {
                Ok(()) => {
                    part.moved = true;
                    info!(part_id = %part.id, path = %final_path.display(), "part delivered");
                }
                Err(error) => {
                    part.failed = true;
                    error!(part_id = %part.id, error = ?error, "failed to move part");
                    events.push(ManagerEvent::Error(
                        DownloadErrorCode::MoveFailed,
                        format!(
                            "Failed to move {} to {}: {error}",
                            part.filename,
                            final_path.display()
                        ),
                    ));
                }
            }
            events.push(ManagerEvent::PartUpdate(part.clone()));
        }
        if let Some(item) = state.item_mut(&admission.item_id) {
            self.send_store(StoreOp::Save(Box::new(item.clone())));
        }
        self.pump(state, events);
    }

    fn fail_part(self: &Arc<Self>, admission: &Admission, error: &DownloadError, transient: bool) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state
                .take_in_flight_if_owned(&admission.part_id, admission.download_id)
                .is_none()
            {
                debug!(part_id = %admission.part_id, "failure for a released admission ignored");
                return;
            }

            let retry = transient && {
                let failures = state
                    .transient_failures
                    .entry(admission.part_id.clone())
                    .or_insert(0);
                *failures += 1;
                *failures <= self.config.max_part_retries
            };
            let code = if matches!(error, DownloadError::AuthRequired { .. }) {
                DownloadErrorCode::TokenExpired
            } else {
                DownloadErrorCode::DownloadFailed
            };

            if let Some(part) = state.part_mut(&admission.item_id, &admission.part_id) {
                part.download_id = None;
                if retry {
                    warn!(part_id = %part.id, error = %error, "transient failure, part will be re-admitted");
                } else {
                    part.failed = true;
                    error!(part_id = %part.id, code = %code, error = %error, "part failed");
                    events.push(ManagerEvent::Error(code, format!("{}: {error}", part.filename)));
                    events.push(ManagerEvent::PartUpdate(part.clone()));
                }
            }
            if !retry && let Some(item) = state.item_mut(&admission.item_id) {
                self.send_store(StoreOp::Save(Box::new(item.clone())));
            }
            self.pump(&mut state, &mut events);
        }
        self.deliver(events);
    }

    fn release_canceled(self: &Arc<Self>, admission: &Admission) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state
                .take_in_flight_if_owned(&admission.part_id, admission.download_id)
                .is_none()
            {
                return;
            }
            if let Some(part) = state.part_mut(&admission.item_id, &admission.part_id) {
                part.download_id = None;
            }
            debug!(part_id = %admission.part_id, "transfer canceled itself, part released");
            self.pump(&mut state, &mut events);
        }
        self.deliver(events);
    }
}

async fn run_store_writer(store: Arc<dyn DownloadStore>, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Save(item) => {
                if let Err(error) = store.save_item(&item).await {
                    warn!(item_id = %item.id, error = %error, "failed to persist download item");
                }
            }
            StoreOp::Remove(item_id) => {
                if let Err(error) = store.remove_item(&item_id).await {
                    warn!(item_id = %item_id, error = %error, "failed to remove persisted download item");
                }
            }
            StoreOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("store writer stopped");
}

async fn remove_staged_files(paths: Vec<PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed staging file"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = %path.display(), error = %error, "failed to remove staging file"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::model::{LocalFolder, PartKind, PartSpec, ServerConnection};

    /// Writes the expected bytes straight into the staging file.
    struct InstantTransport;

    #[async_trait]
    impl PartTransport for InstantTransport {
        async fn transfer(
            &self,
            job: TransferJob,
            progress: ProgressSink,
            _cancel: CancellationToken,
        ) -> TransferOutcome {
            if let Some(parent) = job.temp_path.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            let len = usize::try_from(job.expected_size).unwrap();
            tokio::fs::write(&job.temp_path, vec![1u8; len]).await.unwrap();
            progress(TransferProgress::new(job.expected_size, Some(job.expected_size)));
            TransferOutcome::Success {
                bytes: job.expected_size,
            }
        }
    }

    struct Unlimited;

    impl StorageProbe for Unlimited {
        fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(u64::MAX)
        }
    }

    fn item(root: &Path, id: &str, parts: usize) -> DownloadItem {
        DownloadItem::builder(
            id,
            ServerConnection::new("http://127.0.0.1:9", "u", "c"),
            LocalFolder {
                id: "lf".to_string(),
                name: "Books".to_string(),
                path: root.to_path_buf(),
            },
        )
        .parts((0..parts).map(|i| PartSpec {
            filename: format!("{i}.mp3"),
            server_path: format!("/f/{i}"),
            file_size: 3,
            kind: PartKind::AudioTrack,
        }))
        .build()
        .unwrap()
    }

    fn manager() -> DownloadQueueManager {
        DownloadQueueManager::builder(ManagerConfig::default(), Arc::new(InstantTransport))
            .storage(Arc::new(Unlimited))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result =
            DownloadQueueManager::builder(ManagerConfig::default(), Arc::new(InstantTransport))
                .build();
        assert!(matches!(result, Err(ManagerError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = ManagerConfig {
            max_concurrent_parts: 0,
            ..ManagerConfig::default()
        };
        let result = DownloadQueueManager::builder(config, Arc::new(InstantTransport)).build();
        assert!(matches!(result, Err(ManagerError::Config(_))));
    }

    #[tokio::test]
    async fn test_item_is_delivered_and_retired() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager();
        let item = item(temp_dir.path(), "li_1", 4);
        let finals: Vec<_> = item.parts.iter().map(|p| p.final_path.clone()).collect();

        assert_eq!(
            manager.add_download_item(item).unwrap(),
            AddItemOutcome::Queued
        );
        manager.wait_until_drained().await;

        assert!(finals.iter().all(|path| path.exists()));
        assert!(!manager.has_active_downloads());
        assert!(manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_item_returns_false() {
        let manager = manager();
        assert!(!manager.cancel_item("missing"));
    }

    #[tokio::test]
    async fn test_restore_without_store_is_noop() {
        let manager = manager();
        assert_eq!(
            manager
                .restore_incomplete_downloads(Some("t".to_string()))
                .await
                .unwrap(),
            0
        );
        manager.sync_store().await;
    }

    #[tokio::test]
    async fn test_clones_share_one_queue() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager();
        let other = manager.clone();
        other.add_download_item(item(temp_dir.path(), "li_1", 1)).unwrap();
        assert_eq!(
            manager.add_download_item(item(temp_dir.path(), "li_1", 1)).unwrap(),
            AddItemOutcome::AlreadyQueued
        );
        manager.wait_until_drained().await;
    }
}
