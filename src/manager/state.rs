//! Queue state guarded by the manager's single lock.

use std::collections::{HashMap, VecDeque};

use tokio_util::sync::CancellationToken;

use crate::model::{DownloadItem, DownloadItemPart};
use crate::notification::NotificationCoordinator;

/// A part currently owned by a transfer (or mid-move after one).
#[derive(Debug)]
pub(crate) struct InFlightPart {
    pub(crate) part_id: String,
    pub(crate) item_id: String,
    pub(crate) download_id: u64,
    pub(crate) filename: String,
    pub(crate) cancel: CancellationToken,
}

/// Everything the lock protects.
#[derive(Debug)]
pub(crate) struct QueueState {
    /// Pending and active items, in arrival order.
    pub(crate) items: VecDeque<DownloadItem>,
    /// Admitted parts; never longer than the admission cap.
    pub(crate) in_flight: Vec<InFlightPart>,
    /// Transient failures per part id.
    pub(crate) transient_failures: HashMap<String, u32>,
    pub(crate) next_download_id: u64,
    pub(crate) coordinator: NotificationCoordinator,
}

impl QueueState {
    pub(crate) fn new(coordinator: NotificationCoordinator) -> Self {
        Self {
            items: VecDeque::new(),
            in_flight: Vec::new(),
            transient_failures: HashMap::new(),
            next_download_id: 0,
            coordinator,
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.items.is_empty() && self.in_flight.is_empty()
    }

    pub(crate) fn contains_item(&self, item_id: &str) -> bool {
        self.items.iter().any(|item| item.id == item_id)
    }

    /// True if `download_id` is still the live admission of `part_id`.
    pub(crate) fn owns(&self, part_id: &str, download_id: u64) -> bool {
        self.in_flight
            .iter()
            .any(|entry| entry.part_id == part_id && entry.download_id == download_id)
    }

    /// Removes the admission if it is still live; `None` for a stale one.
    pub(crate) fn take_in_flight_if_owned(
        &mut self,
        part_id: &str,
        download_id: u64,
    ) -> Option<InFlightPart> {
        let index = self
            .in_flight
            .iter()
            .position(|entry| entry.part_id == part_id && entry.download_id == download_id)?;
        Some(self.in_flight.remove(index))
    }

    pub(crate) fn item_mut(&mut self, item_id: &str) -> Option<&mut DownloadItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    pub(crate) fn part_mut(&mut self, item_id: &str, part_id: &str) -> Option<&mut DownloadItemPart> {
        self.item_mut(item_id)?.part_mut(part_id)
    }

    /// File name shown in the indicator: the oldest admission still running.
    pub(crate) fn current_file(&self) -> Option<&str> {
        self.in_flight
            .iter()
            .min_by_key(|entry| entry.download_id)
            .map(|entry| entry.filename.as_str())
    }

    /// Removes and returns every item whose parts are all settled.
    pub(crate) fn drain_settled(&mut self) -> Vec<DownloadItem> {
        let mut settled = Vec::new();
        let mut index = 0;
        while index < self.items.len() {
            if self.items[index].is_settled() {
                if let Some(item) = self.items.remove(index) {
                    for part in &item.parts {
                        self.transient_failures.remove(&part.id);
                    }
                    settled.push(item);
                }
            } else {
                index += 1;
            }
        }
        settled
    }

    /// Cancels and forgets every admission.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for entry in self.in_flight.drain(..) {
            entry.cancel.cancel();
        }
        count
    }
}
