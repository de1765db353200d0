//! Shared fakes for queue integration tests.
//!
//! - [`GatedTransport`] parks every transfer until the test releases it and
//!   records how many were live at once
//! - [`RecordingSink`] keeps every event the manager emitted
//! - [`RecordingHold`] counts acquire/release calls
//! - [`FixedStorage`] reports a fixed amount of free space
//! - [`GatedMover`] holds every move until the test lets it through

#![allow(dead_code)]

#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookshelf_downloader::download::{
    DownloadError, PartTransport, ProgressSink, TransferJob, TransferOutcome, TransferProgress,
};
use bookshelf_downloader::manager::{
    DownloadErrorCode, DownloadEventSink, FsPartMover, PartMover, StorageProbe,
};
use bookshelf_downloader::model::{
    DownloadItem, DownloadItemPart, LocalFolder, PartKind, PartSpec, ServerConnection,
};
use bookshelf_downloader::notification::{HoldError, ResourceHold};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Builds an item with `parts` audio tracks of `size` bytes under `root`.
pub fn item(library_item_id: &str, root: &Path, parts: usize, size: u64) -> DownloadItem {
    DownloadItem::builder(
        library_item_id,
        ServerConnection::new("http://127.0.0.1:9", "user", "config").with_token("tok"),
        LocalFolder {
            id: "lf_1".to_string(),
            name: "Books".to_string(),
            path: root.join("library"),
        },
    )
    .title(format!("Title {library_item_id}"))
    .temp_dir(root.join("stage"))
    .parts((0..parts).map(|index| PartSpec {
        filename: format!("{index:02}.mp3"),
        server_path: format!("/api/items/{library_item_id}/file/{index}"),
        file_size: size,
        kind: PartKind::AudioTrack,
    }))
    .build()
    .unwrap()
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// How a parked transfer should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Succeed,
    Transient,
    Terminal,
    AuthRejected,
}

struct Parked {
    seq: u64,
    part_id: String,
    cancel: CancellationToken,
    release: oneshot::Sender<Release>,
}

#[derive(Default)]
struct GateState {
    next_seq: u64,
    parked: Vec<Parked>,
    live: usize,
    max_live: usize,
    started: Vec<String>,
}

/// Transport whose transfers wait for an explicit [`Release`].
#[derive(Default)]
pub struct GatedTransport {
    state: Mutex<GateState>,
    changed: Notify,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transfers still running inside the transport.
    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    /// Parked transfers whose token has not been tripped.
    pub fn uncanceled_parked(&self) -> usize {
        self.state
            .lock()
            .parked
            .iter()
            .filter(|parked| !parked.cancel.is_cancelled())
            .count()
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().max_live
    }

    /// Part ids in admission order, repeats included.
    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn parked_parts(&self) -> Vec<String> {
        self.state
            .lock()
            .parked
            .iter()
            .map(|parked| parked.part_id.clone())
            .collect()
    }

    /// Waits until at least `count` transfers have started in total.
    pub async fn wait_started(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let notified = self.changed.notified();
                if self.state.lock().started.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("fewer than {count} transfers started"));
    }

    /// Waits until exactly `count` transfers are parked.
    pub async fn wait_parked(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let notified = self.changed.notified();
                if self.state.lock().parked.len() == count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("parked transfers never reached {count}"));
    }

    /// Releases the oldest parked transfer of `part_id`.
    pub fn release(&self, part_id: &str, how: Release) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.parked.iter().position(|p| p.part_id == part_id) else {
            return false;
        };
        let parked = state.parked.remove(index);
        parked.release.send(how).is_ok()
    }

    /// Releases the oldest parked transfer, whatever its part.
    pub fn release_next(&self, how: Release) -> Option<String> {
        let mut state = self.state.lock();
        if state.parked.is_empty() {
            return None;
        }
        let parked = state.parked.remove(0);
        let part_id = parked.part_id.clone();
        parked.release.send(how).ok().map(|()| part_id)
    }
}

#[async_trait]
impl PartTransport for GatedTransport {
    async fn transfer(
        &self,
        job: TransferJob,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.parked.push(Parked {
                seq,
                part_id: job.part_id.clone(),
                cancel: cancel.clone(),
                release: tx,
            });
            state.live += 1;
            state.max_live = state.max_live.max(state.live);
            state.started.push(job.part_id.clone());
            seq
        };
        self.changed.notify_waiters();

        let outcome = tokio::select! {
            () = cancel.cancelled() => TransferOutcome::Canceled,
            released = rx => match released {
                Ok(Release::Succeed) => {
                    stage_file(&job.temp_path, job.expected_size).await;
                    progress(TransferProgress::new(job.expected_size, Some(job.expected_size)));
                    TransferOutcome::Success { bytes: job.expected_size }
                }
                Ok(Release::Transient) => {
                    TransferOutcome::TransientFailure(DownloadError::timeout(job.url.as_str()))
                }
                Ok(Release::Terminal) => {
                    TransferOutcome::TerminalFailure(DownloadError::http_status(job.url.as_str(), 404))
                }
                Ok(Release::AuthRejected) => {
                    TransferOutcome::TerminalFailure(DownloadError::auth_required(job.url.as_str(), 401))
                }
                Err(_) => TransferOutcome::Canceled,
            },
        };

        {
            let mut state = self.state.lock();
            state.parked.retain(|parked| parked.seq != seq);
            state.live -= 1;
        }
        self.changed.notify_waiters();
        outcome
    }
}

/// Writes `size` bytes to `path`, creating its parent.
pub async fn stage_file(path: &Path, size: u64) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    let len = usize::try_from(size).unwrap();
    tokio::fs::write(path, vec![7u8; len]).await.unwrap();
}

/// Event recorded by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Queued(String),
    PartUpdate { part_id: String, progress: u8, moved: bool, failed: bool },
    Complete { item_id: String, success: bool },
    Error { code: DownloadErrorCode, details: String },
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn completions(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Complete { item_id, success } => Some((item_id, success)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(DownloadErrorCode, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Error { code, details } => Some((code, details)),
                _ => None,
            })
            .collect()
    }

    pub fn queued(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Queued(item_id) => Some(item_id),
                _ => None,
            })
            .collect()
    }
}

impl DownloadEventSink for RecordingSink {
    fn on_download_item(&self, item: &DownloadItem) {
        self.events.lock().push(Recorded::Queued(item.id.clone()));
    }

    fn on_download_item_part_update(&self, part: &DownloadItemPart) {
        self.events.lock().push(Recorded::PartUpdate {
            part_id: part.id.clone(),
            progress: part.progress,
            moved: part.moved,
            failed: part.failed,
        });
    }

    fn on_download_item_complete(&self, item: &DownloadItem, success: bool) {
        self.events.lock().push(Recorded::Complete {
            item_id: item.id.clone(),
            success,
        });
    }

    fn on_download_error(&self, code: DownloadErrorCode, details: &str) {
        self.events.lock().push(Recorded::Error {
            code,
            details: details.to_string(),
        });
    }
}

/// Hold that counts calls and remembers the last status line.
#[derive(Default)]
pub struct RecordingHold {
    acquires: Mutex<usize>,
    releases: Mutex<usize>,
    held: Mutex<bool>,
    statuses: Mutex<Vec<String>>,
}

impl RecordingHold {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquires(&self) -> usize {
        *self.acquires.lock()
    }

    pub fn releases(&self) -> usize {
        *self.releases.lock()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().clone()
    }
}

impl ResourceHold for RecordingHold {
    fn acquire(&self, _timeout: Option<Duration>) -> Result<(), HoldError> {
        *self.acquires.lock() += 1;
        *self.held.lock() = true;
        Ok(())
    }

    fn release(&self) {
        *self.releases.lock() += 1;
        *self.held.lock() = false;
    }

    fn render_status(&self, _active_count: usize, label: &str) {
        self.statuses.lock().push(label.to_string());
    }

    fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

/// Storage probe with a fixed free-space figure.
pub struct FixedStorage(pub u64);

impl StorageProbe for FixedStorage {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Plenty of room for any test item.
pub fn roomy_storage() -> Arc<FixedStorage> {
    Arc::new(FixedStorage(u64::MAX))
}

/// Final paths of every part of `item`.
pub fn final_paths(item: &DownloadItem) -> Vec<PathBuf> {
    item.parts.iter().map(|part| part.final_path.clone()).collect()
}

#[derive(Default)]
struct MoveGate {
    waiting: Vec<oneshot::Sender<()>>,
    entered: usize,
    finished: usize,
}

/// Real file-system mover that parks before each move.
#[derive(Default)]
pub struct GatedMover {
    state: Mutex<MoveGate>,
    changed: Notify,
}

impl GatedMover {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Moves that ran to completion, successful or not.
    pub fn finished(&self) -> usize {
        self.state.lock().finished
    }

    /// Waits until `count` moves have reached the gate.
    pub async fn wait_entered(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let notified = self.changed.notified();
                if self.state.lock().entered >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("fewer than {count} moves started"));
    }

    /// Lets every parked move proceed.
    pub fn open(&self) {
        for waiter in self.state.lock().waiting.drain(..) {
            let _ = waiter.send(());
        }
    }
}

#[async_trait]
impl PartMover for GatedMover {
    async fn move_part(&self, from: &Path, to: &Path) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.waiting.push(tx);
            state.entered += 1;
        }
        self.changed.notify_waiters();
        let _ = rx.await;

        let result = FsPartMover.move_part(from, to).await;
        self.state.lock().finished += 1;
        self.changed.notify_waiters();
        result
    }
}
