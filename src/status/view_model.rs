use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use super::codes::ReturnResult;
use super::item::{FileOperationType, StatusCenterItem};
use super::posted::{SharedItem, StatusCenterPostedItem};
use crate::error::StatusCenterError;
use crate::events::{EventBroadcaster, StatusCenterEvent};

/// Consumer of status center items.
pub trait StatusCenterSink: Send + Sync {
    /// Inserts a newly posted item.
    fn add_item(&self, item: SharedItem);

    /// Removes the item. Returns false when it was not present.
    fn close_banner(&self, item: &SharedItem) -> bool;

    /// Notifies that the item's presentation changed.
    fn update_banner(&self, item: &SharedItem);

    /// Recomputes the aggregate progress of ongoing items.
    fn update_median_progress(&self);
}

/// In-process status center: newest-first list of items plus aggregate state.
pub struct StatusCenterViewModel {
    items: RwLock<Vec<SharedItem>>,
    median_progress: Mutex<f32>,
    events: EventBroadcaster,
    sample_interval_ms: u64,
}

fn lock_item(item: &SharedItem) -> std::sync::MutexGuard<'_, StatusCenterItem> {
    item.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusCenterViewModel {
    pub fn new(events: EventBroadcaster, sample_interval_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            items: RwLock::new(Vec::new()),
            median_progress: Mutex::new(0.0),
            events,
            sample_interval_ms,
        })
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Stream of events for presentation layers. Lagged receivers see an error item.
    pub fn event_stream(&self) -> BroadcastStream<StatusCenterEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Snapshots of all items, newest first.
    pub fn items(&self) -> Vec<StatusCenterItem> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|item| lock_item(item).clone())
            .collect()
    }

    pub fn post_banner(
        self: &Arc<Self>,
        title: &str,
        message: &str,
        initial_progress: f32,
        status: ReturnResult,
        operation: FileOperationType,
    ) -> Result<StatusCenterPostedItem, StatusCenterError> {
        let item = StatusCenterItem::new(message, title, initial_progress, status, operation)?;
        Ok(self.post(item, None))
    }

    /// Posts an item whose operation can be cancelled from the status center.
    pub fn post_operation_banner(
        self: &Arc<Self>,
        title: &str,
        message: &str,
        initial_progress: f32,
        status: ReturnResult,
        operation: FileOperationType,
        cancellation: CancellationToken,
    ) -> Result<StatusCenterPostedItem, StatusCenterError> {
        let item = StatusCenterItem::new(message, title, initial_progress, status, operation)?
            .with_cancellation(cancellation.clone());
        Ok(self.post(item, Some(cancellation)))
    }

    pub fn post_action_banner(
        self: &Arc<Self>,
        title: &str,
        message: &str,
        primary_button_text: &str,
        secondary_button_text: &str,
    ) -> Result<StatusCenterPostedItem, StatusCenterError> {
        let item = StatusCenterItem::new_action(
            message,
            title,
            primary_button_text,
            secondary_button_text,
        )?;
        Ok(self.post(item, None))
    }

    fn post(
        self: &Arc<Self>,
        item: StatusCenterItem,
        cancellation: Option<CancellationToken>,
    ) -> StatusCenterPostedItem {
        tracing::debug!(
            target: "status",
            id = %item.id,
            title = %item.title,
            status = %item.status,
            "Posting status center item"
        );
        let shared: SharedItem = Arc::new(Mutex::new(item));
        let sink: Arc<dyn StatusCenterSink> = self.clone();
        let posted =
            StatusCenterPostedItem::new(shared.clone(), sink, cancellation, self.sample_interval_ms);
        self.add_item(shared);
        posted
    }

    pub fn ongoing_operations_count(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|item| lock_item(item).is_progressing)
            .count()
    }

    pub fn any_operations_ongoing(&self) -> bool {
        self.ongoing_operations_count() > 0
    }

    pub fn any_banners_present(&self) -> bool {
        !self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// 0 all succeeded, 1 ongoing, 2 ongoing with a failure, 3 finished with a failure.
    pub fn info_badge_state(&self) -> u8 {
        let any_failure = self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|item| lock_item(item).status.is_failure());

        match (any_failure, self.any_operations_ongoing()) {
            (false, false) => 0,
            (false, true) => 1,
            (true, true) => 2,
            (true, false) => 3,
        }
    }

    /// Number of ongoing operations, or -1 when there are none.
    pub fn info_badge_value(&self) -> i64 {
        match self.ongoing_operations_count() {
            0 => -1,
            n => n as i64,
        }
    }

    pub fn median_progress(&self) -> f32 {
        *self
            .median_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast_counts(&self) {
        self.events.broadcast(StatusCenterEvent::CountsChanged {
            ongoing: self.ongoing_operations_count(),
            info_badge_state: self.info_badge_state(),
            info_badge_value: self.info_badge_value(),
        });
    }
}

impl StatusCenterSink for StatusCenterViewModel {
    fn add_item(&self, item: SharedItem) {
        let snapshot = lock_item(&item).clone();
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, item);
        self.events
            .broadcast(StatusCenterEvent::ItemPosted { item: snapshot });
        self.broadcast_counts();
    }

    fn close_banner(&self, item: &SharedItem) -> bool {
        let removed = {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            match items.iter().position(|i| Arc::ptr_eq(i, item)) {
                Some(index) => {
                    items.remove(index);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return false;
        }

        let id = lock_item(item).id;
        tracing::debug!(target: "status", id = %id, "Closed status center item");
        self.events.broadcast(StatusCenterEvent::ItemClosed { id });
        self.broadcast_counts();
        true
    }

    fn update_banner(&self, item: &SharedItem) {
        let snapshot = lock_item(item).clone();
        self.events
            .broadcast(StatusCenterEvent::ItemUpdated { item: snapshot });
        self.broadcast_counts();
    }

    fn update_median_progress(&self) {
        let (sum, count) = self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|item| {
                let item = lock_item(item);
                item.is_progressing.then_some(item.progress as f32)
            })
            .fold((0.0f32, 0usize), |(sum, count), p| (sum + p, count + 1));

        // Keep the last value once nothing is ongoing.
        if count == 0 {
            return;
        }
        let value = sum / count as f32;
        *self
            .median_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = value;
        self.events
            .broadcast(StatusCenterEvent::MedianProgressChanged { value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::codes::FileSystemStatusCode;
    use crate::status::progress::FileSystemProgress;
    use futures::StreamExt;

    fn view_model() -> Arc<StatusCenterViewModel> {
        StatusCenterViewModel::new(EventBroadcaster::default(), 100)
    }

    #[tokio::test]
    async fn test_items_are_newest_first() {
        let vm = view_model();
        vm.post_banner("First", "", 0.0, ReturnResult::InProgress, FileOperationType::Copy)
            .unwrap();
        vm.post_banner("Second", "", 0.0, ReturnResult::InProgress, FileOperationType::Move)
            .unwrap();

        let titles: Vec<_> = vm.items().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["Second", "First"]);
        assert_eq!(vm.ongoing_operations_count(), 2);
        assert_eq!(vm.info_badge_value(), 2);
    }

    #[tokio::test]
    async fn test_invalid_terminal_banner_is_rejected() {
        let vm = view_model();
        let result = vm.post_banner("", "", 0.0, ReturnResult::Failed, FileOperationType::Copy);
        assert!(result.is_err());
        assert!(!vm.any_banners_present());
    }

    #[tokio::test]
    async fn test_info_badge_states() {
        let vm = view_model();
        assert_eq!(vm.info_badge_state(), 0);
        assert_eq!(vm.info_badge_value(), -1);

        let running = vm
            .post_banner("Copy", "", 0.0, ReturnResult::InProgress, FileOperationType::Copy)
            .unwrap();
        assert_eq!(vm.info_badge_state(), 1);

        vm.post_banner("Failed", "Access denied", 0.0, ReturnResult::Failed, FileOperationType::Delete)
            .unwrap();
        assert_eq!(vm.info_badge_state(), 2);

        running.report_progress_to_banner(&FileSystemProgress::with_status(
            FileSystemStatusCode::Success,
        ));
        assert_eq!(vm.info_badge_state(), 3);
    }

    #[tokio::test]
    async fn test_median_progress_averages_ongoing_items() {
        let vm = view_model();
        let a = vm
            .post_banner("A", "", 0.0, ReturnResult::InProgress, FileOperationType::Copy)
            .unwrap();
        let b = vm
            .post_banner("B", "", 0.0, ReturnResult::InProgress, FileOperationType::Copy)
            .unwrap();

        a.report_progress_to_banner(&FileSystemProgress {
            percentage: Some(20.0),
            ..Default::default()
        });
        b.report_progress_to_banner(&FileSystemProgress {
            percentage: Some(60.0),
            ..Default::default()
        });
        assert!((vm.median_progress() - 40.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_close_banner_removes_once() {
        let vm = view_model();
        let posted = vm
            .post_banner("Copy", "", 0.0, ReturnResult::InProgress, FileOperationType::Copy)
            .unwrap();
        assert!(posted.remove());
        assert!(!posted.remove());
        assert!(!vm.any_banners_present());
    }

    #[tokio::test]
    async fn test_event_stream_sees_posted_and_updated() {
        let vm = view_model();
        let mut stream = vm.event_stream();

        let posted = vm
            .post_operation_banner(
                "Copy",
                "",
                0.0,
                ReturnResult::InProgress,
                FileOperationType::Copy,
                CancellationToken::new(),
            )
            .unwrap();
        posted.request_cancellation();

        let mut names = Vec::new();
        while let Some(Ok(event)) = stream.next().await {
            names.push(event.name());
            if let StatusCenterEvent::ItemUpdated { item } = event {
                assert!(item.is_cancelled);
                break;
            }
        }
        assert_eq!(names, vec!["ItemPosted", "CountsChanged", "ItemUpdated"]);
    }
}
