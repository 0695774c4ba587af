//! Bridge between a running operation and its status center card.
//!
//! Operations report `FileSystemProgress` samples through a `ProgressReporter`. Each
//! sample is a full snapshot of the operation, so the reporter keeps only the latest
//! one in a `watch` slot. A single consumer task turns it into header text on the shared
//! `StatusCenterItem` and notifies the `StatusCenterSink`. Samples the consumer has not
//! seen yet are replaced rather than queued, so a terminal status is never lost behind
//! intermediate progress. Once the operation is cancelled, samples are dropped on both
//! ends of the slot.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::codes::FileSystemStatusCode;
use super::format::format_bytes;
use super::item::StatusCenterItem;
use super::progress::{FileSystemProgress, ProgressSink, StatusCenterItemProgressModel};
use super::view_model::StatusCenterSink;

/// Item shared between the view model and the posted counterpart.
pub type SharedItem = Arc<Mutex<StatusCenterItem>>;

/// Producer side of the progress slot.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Option<FileSystemProgress>>>,
    cancellation: Option<CancellationToken>,
}

impl ProgressSink<FileSystemProgress> for ProgressReporter {
    fn report(&self, value: FileSystemProgress) {
        if self.cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            return;
        }
        if self.tx.is_closed() {
            tracing::trace!(target: "status", "Progress consumer gone, dropping sample");
            return;
        }
        self.tx.send_replace(Some(value));
    }
}

/// A posted status center item together with its progress source.
pub struct StatusCenterPostedItem {
    item: SharedItem,
    sink: Arc<dyn StatusCenterSink>,
    cancellation: Option<CancellationToken>,
    reporter: ProgressReporter,
    sample_interval_ms: u64,
}

impl StatusCenterPostedItem {
    /// Wires `item` to `sink` and starts the consumer task on the current runtime.
    pub fn new(
        item: SharedItem,
        sink: Arc<dyn StatusCenterSink>,
        cancellation: Option<CancellationToken>,
        sample_interval_ms: u64,
    ) -> Self {
        let (tx, mut rx) = watch::channel::<Option<FileSystemProgress>>(None);

        let consumer_item = item.clone();
        let consumer_sink = sink.clone();
        let consumer_token = cancellation.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(value) = rx.borrow_and_update().clone() else {
                    continue;
                };
                apply_progress(
                    &consumer_item,
                    consumer_sink.as_ref(),
                    consumer_token.as_ref(),
                    &value,
                );
            }
        });

        Self {
            item,
            sink,
            reporter: ProgressReporter {
                tx: Arc::new(tx),
                cancellation: cancellation.clone(),
            },
            cancellation,
            sample_interval_ms,
        }
    }

    pub fn item(&self) -> &SharedItem {
        &self.item
    }

    /// Snapshot of the item.
    pub fn snapshot(&self) -> StatusCenterItem {
        self.item
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.reporter.clone()
    }

    /// Progress model for the operation, reporting into this item.
    pub fn progress_model(&self) -> StatusCenterItemProgressModel {
        let sink: Arc<dyn ProgressSink<FileSystemProgress>> = Arc::new(self.reporter.clone());
        StatusCenterItemProgressModel::new(Some(sink))
            .with_status(FileSystemStatusCode::InProgress)
            .with_sample_interval(self.sample_interval_ms)
    }

    /// Token observed by the operation. Never cancelled when the item is not cancellable.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone().unwrap_or_default()
    }

    /// Applies one sample synchronously, bypassing the slot.
    pub fn report_progress_to_banner(&self, value: &FileSystemProgress) {
        apply_progress(
            &self.item,
            self.sink.as_ref(),
            self.cancellation.as_ref(),
            value,
        );
    }

    /// Cancels the operation and marks the item as canceling.
    pub fn request_cancellation(&self) {
        {
            let mut item = self.item.lock().unwrap_or_else(PoisonError::into_inner);
            if !item.cancel_operation() {
                if let Some(token) = &self.cancellation {
                    token.cancel();
                    item.is_cancelled = true;
                    item.full_title = format!("{} (canceling)", item.title);
                }
            }
        }
        self.sink.update_banner(&self.item);
    }

    /// Closes the item in the status center.
    pub fn remove(&self) -> bool {
        self.sink.close_banner(&self.item)
    }
}

/// Builds the header of `title` for one sample. Returns the new progress when the sample
/// carries enough information to compute one.
///
/// Precedence: explicit percentage, then enumerated totals (size and count, size only,
/// count only), then the provisional counters of a still running enumeration.
pub fn format_header(title: &str, value: &FileSystemProgress) -> (String, Option<u8>) {
    let progress = value.percent_complete();

    if value.percentage.is_some() {
        let pct = progress.unwrap_or_default();
        return (format!("{title} ({pct}%)"), progress);
    }

    if value.enumeration_completed {
        let pct = progress.unwrap_or_default();
        let header = match (value.total_size, value.items_count) {
            (total, count) if total != 0 && count != 0 => format!(
                "{title} ({} ({}) / {count} ({}): {pct}%)",
                value.processed_items_count,
                format_bytes(value.processed_size),
                format_bytes(total),
            ),
            (total, _) if total != 0 => format!(
                "{title} ({} / {}: {pct}%)",
                format_bytes(value.processed_size),
                format_bytes(total),
            ),
            (_, count) if count != 0 => {
                format!("{title} ({} / {count}: {pct}%)", value.processed_items_count)
            }
            _ => format!("{title} (...)"),
        };
        return (header, progress);
    }

    let header = match (value.processed_size, value.processed_items_count) {
        (size, count) if size != 0 && count != 0 => {
            format!("{title} ({count} ({}) / ...)", format_bytes(size))
        }
        (size, _) if size != 0 => format!("{title} ({} / ...)", format_bytes(size)),
        (_, count) if count != 0 => format!("{title} ({count} / ...)"),
        _ => format!("{title} (...)"),
    };
    (header, None)
}

fn apply_progress(
    item: &SharedItem,
    sink: &dyn StatusCenterSink,
    cancellation: Option<&CancellationToken>,
    value: &FileSystemProgress,
) {
    if cancellation.is_some_and(|t| t.is_cancelled()) {
        return;
    }

    {
        let mut item = item.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = value.status {
            item.status = status.to_status();
        }
        item.is_progressing = value.status.is_none_or(|s| s.is_in_progress());

        let (header, progress) = format_header(&item.title, value);
        item.full_title = header;
        if let Some(progress) = progress {
            item.progress = progress;
        }
    }

    sink.update_banner(item);
    sink.update_median_progress();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::codes::ReturnResult;
    use crate::status::item::FileOperationType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        updates: AtomicUsize,
        medians: AtomicUsize,
        closed: AtomicUsize,
    }

    impl StatusCenterSink for CountingSink {
        fn add_item(&self, _item: SharedItem) {}

        fn close_banner(&self, _item: &SharedItem) -> bool {
            self.closed.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn update_banner(&self, _item: &SharedItem) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn update_median_progress(&self) {
            self.medians.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn posted(token: Option<CancellationToken>) -> (StatusCenterPostedItem, Arc<CountingSink>) {
        let mut item = StatusCenterItem::new(
            "",
            "Copy",
            0.0,
            ReturnResult::InProgress,
            FileOperationType::Copy,
        )
        .unwrap();
        if let Some(token) = &token {
            item = item.with_cancellation(token.clone());
        }
        let sink = Arc::new(CountingSink::default());
        let posted =
            StatusCenterPostedItem::new(Arc::new(Mutex::new(item)), sink.clone(), token, 100);
        (posted, sink)
    }

    #[test]
    fn test_percentage_takes_precedence() {
        let value = FileSystemProgress {
            percentage: Some(42.7),
            enumeration_completed: true,
            processed_size: 10,
            total_size: 100,
            ..Default::default()
        };
        let (header, progress) = format_header("Copy", &value);
        assert_eq!(header, "Copy (42%)");
        assert_eq!(progress, Some(42));
    }

    #[test]
    fn test_both_known_uses_size_ratio() {
        let value = FileSystemProgress {
            enumeration_completed: true,
            processed_size: 3,
            total_size: 9,
            processed_items_count: 2,
            items_count: 3,
            ..Default::default()
        };
        let (header, progress) = format_header("Copy", &value);
        assert_eq!(progress, Some(33));
        assert_eq!(header, "Copy (2 (3 B) / 3 (9 B): 33%)");
    }

    #[test]
    fn test_count_only_branch() {
        let value = FileSystemProgress {
            enumeration_completed: true,
            processed_items_count: 1,
            items_count: 4,
            ..Default::default()
        };
        assert_eq!(
            format_header("Delete", &value),
            ("Delete (1 / 4: 25%)".to_string(), Some(25))
        );
    }

    #[test]
    fn test_nothing_known_is_ellipsis() {
        let enumerated = FileSystemProgress {
            enumeration_completed: true,
            ..Default::default()
        };
        assert_eq!(format_header("Copy", &enumerated), ("Copy (...)".to_string(), None));
        assert_eq!(
            format_header("Copy", &FileSystemProgress::default()),
            ("Copy (...)".to_string(), None)
        );
    }

    #[test]
    fn test_provisional_headers() {
        let value = FileSystemProgress {
            processed_size: 2048,
            processed_items_count: 5,
            ..Default::default()
        };
        assert_eq!(format_header("Copy", &value).0, "Copy (5 (2.00 KB) / ...)");

        let count_only = FileSystemProgress {
            processed_items_count: 5,
            ..Default::default()
        };
        assert_eq!(format_header("Copy", &count_only), ("Copy (5 / ...)".to_string(), None));
    }

    #[tokio::test]
    async fn test_size_only_sample_reports_fifty_percent() {
        let (posted, sink) = posted(None);
        posted.report_progress_to_banner(&FileSystemProgress {
            status: Some(FileSystemStatusCode::InProgress),
            enumeration_completed: true,
            processed_size: 50,
            total_size: 100,
            ..Default::default()
        });

        let item = posted.snapshot();
        assert_eq!(item.progress, 50);
        assert_eq!(item.full_title, "Copy (50 B / 100 B: 50%)");
        assert!(item.is_progressing);
        assert_eq!(sink.updates.load(Ordering::SeqCst), 1);
        assert_eq!(sink.medians.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_status_maps_to_result() {
        let (posted, _sink) = posted(None);
        posted.report_progress_to_banner(&FileSystemProgress::with_status(
            FileSystemStatusCode::Unauthorized,
        ));
        let item = posted.snapshot();
        assert_eq!(item.status, ReturnResult::AccessUnauthorized);
        assert!(!item.is_progressing);
    }

    #[tokio::test]
    async fn test_samples_after_cancellation_are_dropped() {
        let (posted, sink) = posted(Some(CancellationToken::new()));
        posted.report_progress_to_banner(&FileSystemProgress {
            percentage: Some(10.0),
            ..Default::default()
        });
        posted.request_cancellation();
        let updates = sink.updates.load(Ordering::SeqCst);

        posted.report_progress_to_banner(&FileSystemProgress {
            percentage: Some(80.0),
            ..Default::default()
        });
        posted.reporter().report(FileSystemProgress {
            percentage: Some(90.0),
            ..Default::default()
        });
        tokio::task::yield_now().await;

        let item = posted.snapshot();
        assert!(item.is_cancelled);
        assert!(posted.cancellation_token().is_cancelled());
        assert_eq!(item.progress, 10);
        assert_eq!(item.full_title, "Copy (canceling)");
        assert_eq!(sink.updates.load(Ordering::SeqCst), updates);
    }

    #[tokio::test]
    async fn test_reporter_feeds_consumer_task() {
        let (posted, sink) = posted(None);
        posted.reporter().report(FileSystemProgress {
            percentage: Some(75.0),
            ..Default::default()
        });

        for _ in 0..100 {
            if sink.updates.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(posted.snapshot().progress, 75);
    }

    #[tokio::test]
    async fn test_terminal_status_survives_a_burst_of_samples() {
        let sink = Arc::new(CountingSink::default());
        let item = StatusCenterItem::new(
            "",
            "Copy",
            0.0,
            ReturnResult::InProgress,
            FileOperationType::Copy,
        )
        .unwrap();
        let posted = StatusCenterPostedItem::new(Arc::new(Mutex::new(item)), sink.clone(), None, 0);

        let mut model = posted
            .progress_model()
            .with_enumeration_completed(true)
            .with_totals(400, 0);
        for _ in 0..300 {
            model.add_processed_items_count(1);
            model.report(None);
        }
        model.report_status(FileSystemStatusCode::Success, Some(100.0));

        for _ in 0..100 {
            if posted.snapshot().status == ReturnResult::Success {
                break;
            }
            tokio::task::yield_now().await;
        }
        let item = posted.snapshot();
        assert_eq!(item.status, ReturnResult::Success);
        assert_eq!(item.progress, 100);
        assert!(!item.is_progressing);
    }

    #[tokio::test]
    async fn test_remove_closes_banner() {
        let (posted, sink) = posted(None);
        assert!(posted.remove());
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }
}
