//! Progress state for a single file system operation.
//!
//! A running operation owns one `StatusCenterItemProgressModel`, mutates its counters
//! from the worker, and calls `report` after each step. The model decides whether the
//! step is worth propagating (status and enumeration changes always are, everything else
//! is rate limited by an `IntervalSampler`), notifies its observer with the batch of
//! fields that changed since the previous propagation, computes throughput and pushes a
//! `FileSystemProgress` snapshot into its sink.

use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use super::codes::FileSystemStatusCode;
use super::sampler::IntervalSampler;

/// Value snapshot reported by a running operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSystemProgress {
    pub status: Option<FileSystemStatusCode>,
    /// Completion estimate in the 0-100 range
    pub percentage: Option<f32>,
    /// True once `total_size` and `items_count` are known
    pub enumeration_completed: bool,
    pub processed_size: u64,
    pub total_size: u64,
    pub processed_items_count: u64,
    pub items_count: u64,
}

impl FileSystemProgress {
    pub fn with_status(status: FileSystemStatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whole percent of completion: the explicit percentage when present, otherwise
    /// the size ratio, otherwise the item ratio. `None` until enumeration completes.
    pub fn percent_complete(&self) -> Option<u8> {
        if let Some(pct) = self.percentage {
            return Some(whole_percent(pct));
        }
        if !self.enumeration_completed {
            return None;
        }
        if self.total_size != 0 {
            Some(ratio_percent(self.processed_size, self.total_size))
        } else if self.items_count != 0 {
            Some(ratio_percent(self.processed_items_count, self.items_count))
        } else {
            None
        }
    }

    /// Processed counters never exceed the enumerated totals.
    pub fn is_consistent(&self) -> bool {
        !self.enumeration_completed
            || (self.processed_size <= self.total_size
                && self.processed_items_count <= self.items_count)
    }
}

/// Floors a percentage into the `0..=100` range.
pub fn whole_percent(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).floor() as u8
}

fn ratio_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Receiver of progress values, the counterpart of an `IProgress<T>` sink.
pub trait ProgressSink<T>: Send + Sync {
    fn report(&self, value: T);
}

/// Closure-based progress sink
pub struct FnProgress<F>(pub F);

impl<T, F> ProgressSink<T> for FnProgress<F>
where
    F: Fn(T) + Send + Sync,
{
    fn report(&self, value: T) {
        (self.0)(value)
    }
}

impl<T, S: ProgressSink<T> + ?Sized> ProgressSink<T> for Arc<S> {
    fn report(&self, value: T) {
        (**self).report(value)
    }
}

/// Observable fields of the progress model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgressProperty {
    Status,
    Percentage,
    EnumerationCompleted,
    ProcessedSize,
    TotalSize,
    ProcessedItemsCount,
    ItemsCount,
    ProcessingSizeSpeed,
    ProcessingItemsCountSpeed,
    CompletedTime,
}

/// Listener for batched field changes.
pub trait ProgressObserver: Send + Sync {
    /// Called once per propagated report with the fields that changed since the last one,
    /// in declaration order.
    fn properties_changed(&self, model: &StatusCenterItemProgressModel, changed: &[ProgressProperty]);
}

pub struct StatusCenterItemProgressModel {
    sink: Option<Arc<dyn ProgressSink<FileSystemProgress>>>,
    observer: Option<Arc<dyn ProgressObserver>>,
    sampler: IntervalSampler,
    dirty: DashMap<ProgressProperty, bool>,
    critical_report: bool,

    status: Option<FileSystemStatusCode>,
    percentage: Option<f32>,
    enumeration_completed: bool,
    processed_size: u64,
    total_size: u64,
    processed_items_count: u64,
    items_count: u64,
    processing_size_speed: f64,
    processing_items_count_speed: f64,
    started_time: DateTime<Local>,
    completed_time: Option<DateTime<Local>>,

    previous_processed_size: u64,
    previous_processed_items_count: u64,
    previous_report_time: Instant,
}

fn set_tracked<T: PartialEq>(
    field: &mut T,
    value: T,
    dirty: &DashMap<ProgressProperty, bool>,
    property: ProgressProperty,
) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    dirty.insert(property, true);
    true
}

/// Units per second between two samples. Zero or non-finite elapsed time yields 0.
fn throughput(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let speed = (current as f64 - previous as f64) / elapsed_secs;
    if speed.is_finite() { speed } else { 0.0 }
}

impl StatusCenterItemProgressModel {
    pub fn new(sink: Option<Arc<dyn ProgressSink<FileSystemProgress>>>) -> Self {
        Self {
            sink,
            observer: None,
            sampler: IntervalSampler::default(),
            dirty: DashMap::new(),
            critical_report: false,
            status: None,
            percentage: None,
            enumeration_completed: false,
            processed_size: 0,
            total_size: 0,
            processed_items_count: 0,
            items_count: 0,
            processing_size_speed: 0.0,
            processing_items_count_speed: 0.0,
            started_time: Local::now(),
            completed_time: None,
            previous_processed_size: 0,
            previous_processed_items_count: 0,
            previous_report_time: Instant::now(),
        }
    }

    pub fn with_status(mut self, status: FileSystemStatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_enumeration_completed(mut self, completed: bool) -> Self {
        self.enumeration_completed = completed;
        self
    }

    pub fn with_totals(mut self, items_count: u64, total_size: u64) -> Self {
        self.items_count = items_count;
        self.total_size = total_size;
        self
    }

    pub fn with_sample_interval(mut self, interval_ms: u64) -> Self {
        self.sampler = IntervalSampler::new(interval_ms);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn status(&self) -> Option<FileSystemStatusCode> {
        self.status
    }

    pub fn percentage(&self) -> Option<f32> {
        self.percentage
    }

    pub fn enumeration_completed(&self) -> bool {
        self.enumeration_completed
    }

    pub fn processed_size(&self) -> u64 {
        self.processed_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn processed_items_count(&self) -> u64 {
        self.processed_items_count
    }

    pub fn items_count(&self) -> u64 {
        self.items_count
    }

    /// Bytes per second measured between the last two propagated reports
    pub fn processing_size_speed(&self) -> f64 {
        self.processing_size_speed
    }

    /// Items per second measured between the last two propagated reports
    pub fn processing_items_count_speed(&self) -> f64 {
        self.processing_items_count_speed
    }

    pub fn started_time(&self) -> DateTime<Local> {
        self.started_time
    }

    pub fn completed_time(&self) -> Option<DateTime<Local>> {
        self.completed_time
    }

    pub fn set_status(&mut self, status: Option<FileSystemStatusCode>) {
        if set_tracked(&mut self.status, status, &self.dirty, ProgressProperty::Status) {
            self.critical_report = true;
        }
    }

    pub fn set_enumeration_completed(&mut self, completed: bool) {
        if set_tracked(
            &mut self.enumeration_completed,
            completed,
            &self.dirty,
            ProgressProperty::EnumerationCompleted,
        ) {
            self.critical_report = true;
        }
    }

    pub fn set_processed_size(&mut self, value: u64) {
        set_tracked(&mut self.processed_size, value, &self.dirty, ProgressProperty::ProcessedSize);
    }

    pub fn add_processed_size(&mut self, delta: u64) {
        self.set_processed_size(self.processed_size.saturating_add(delta));
    }

    pub fn set_total_size(&mut self, value: u64) {
        set_tracked(&mut self.total_size, value, &self.dirty, ProgressProperty::TotalSize);
    }

    pub fn set_processed_items_count(&mut self, value: u64) {
        set_tracked(
            &mut self.processed_items_count,
            value,
            &self.dirty,
            ProgressProperty::ProcessedItemsCount,
        );
    }

    pub fn add_processed_items_count(&mut self, delta: u64) {
        self.set_processed_items_count(self.processed_items_count.saturating_add(delta));
    }

    pub fn set_items_count(&mut self, value: u64) {
        set_tracked(&mut self.items_count, value, &self.dirty, ProgressProperty::ItemsCount);
    }

    /// Current values as a plain snapshot.
    pub fn snapshot(&self) -> FileSystemProgress {
        FileSystemProgress {
            status: self.status,
            percentage: self.percentage,
            enumeration_completed: self.enumeration_completed,
            processed_size: self.processed_size,
            total_size: self.total_size,
            processed_items_count: self.processed_items_count,
            items_count: self.items_count,
        }
    }

    /// Sets the status then reports.
    pub fn report_status(&mut self, status: FileSystemStatusCode, percentage: Option<f32>) {
        self.set_status(Some(status));
        self.report(percentage);
    }

    /// Merges `percentage`, applies the auto-completion rule, then propagates if the
    /// change is critical or the sampler allows it. Returns whether it propagated.
    pub fn report(&mut self, percentage: Option<f32>) -> bool {
        set_tracked(&mut self.percentage, percentage, &self.dirty, ProgressProperty::Percentage);

        let completed_by_counts = self.enumeration_completed
            && self.processed_items_count == self.items_count
            && self.processed_size == self.total_size
            && self.total_size != 0;
        let completed_by_percentage =
            percentage.is_some_and(|p| (p - 100.0).abs() <= f32::EPSILON);

        // Never overwrite a terminal failure or cancellation.
        if (completed_by_counts || completed_by_percentage)
            && matches!(self.status, None | Some(FileSystemStatusCode::InProgress))
        {
            self.set_status(Some(FileSystemStatusCode::Success));
        }

        if self.status == Some(FileSystemStatusCode::Success) && self.completed_time.is_none() {
            self.completed_time = Some(Local::now());
            self.dirty.insert(ProgressProperty::CompletedTime, true);
        }

        if self.critical_report || self.sampler.check_now() {
            self.propagate();
            true
        } else {
            false
        }
    }

    fn propagate(&mut self) {
        self.critical_report = false;

        let now = Instant::now();
        let elapsed = now.duration_since(self.previous_report_time).as_secs_f64();
        let size_speed = throughput(self.processed_size, self.previous_processed_size, elapsed);
        let items_speed = throughput(
            self.processed_items_count,
            self.previous_processed_items_count,
            elapsed,
        );
        set_tracked(
            &mut self.processing_size_speed,
            size_speed,
            &self.dirty,
            ProgressProperty::ProcessingSizeSpeed,
        );
        set_tracked(
            &mut self.processing_items_count_speed,
            items_speed,
            &self.dirty,
            ProgressProperty::ProcessingItemsCountSpeed,
        );

        let mut changed = Vec::new();
        for mut entry in self.dirty.iter_mut() {
            if *entry.value() {
                changed.push(*entry.key());
                *entry.value_mut() = false;
            }
        }
        changed.sort();

        if !changed.is_empty() {
            if let Some(observer) = &self.observer {
                observer.properties_changed(self, &changed);
            }
        }

        if let Some(sink) = &self.sink {
            sink.report(self.snapshot());
        }

        self.previous_report_time = now;
        self.previous_processed_size = self.processed_size;
        self.previous_processed_items_count = self.processed_items_count;
    }
}
