//! `FileOperation` commands: copy, move, delete, rename and create, with progress
//! pushed back to the application while they run.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use uuid::Uuid;

use super::MessageHandler;
use crate::error::{LauncherError, Result};
use crate::ipc::{Connection, IncomingMessage, value_set};
use crate::status::format::{format_bytes, format_speed};
use crate::status::{
    FileSystemProgress, FileSystemStatusCode, FnProgress, ProgressSink,
    StatusCenterItemProgressModel,
};

/// Unspecified failure
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
/// Recycling requested but no recycle bin is available
pub const COPYENGINE_E_RECYCLE_BIN_NOT_FOUND: i32 = 0x8027_0035_u32 as i32;

fn hresult_from_io(err: &io::Error) -> i32 {
    #[cfg(windows)]
    if let Some(code) = err.raw_os_error().filter(|c| (1..=0xFFFF).contains(c)) {
        return (0x8007_0000_u32 | code as u32) as i32;
    }
    #[cfg(not(windows))]
    let _ = err;
    E_FAIL
}

/// Outcome of one item of a file operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShellOperationItemResult {
    pub succeeded: bool,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub h_result: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShellOperationResult {
    pub items: Vec<ShellOperationItemResult>,
}

fn display(path: &Path) -> Option<String> {
    Some(path.to_string_lossy().into_owned())
}

impl ShellOperationResult {
    fn record(&mut self, source: Option<&Path>, destination: Option<&Path>, outcome: io::Result<()>) {
        let (succeeded, h_result) = match &outcome {
            Ok(()) => (true, 0),
            Err(e) => (false, hresult_from_io(e)),
        };
        self.items.push(ShellOperationItemResult {
            succeeded,
            source: source.and_then(display),
            destination: destination.and_then(display),
            h_result,
        });
    }

    fn all_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.succeeded)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OperationWithProgress {
    progress: i32,
    canceled: bool,
    /// Runs registered under this id
    runs: usize,
}

/// Registry of running operations, their last progress and cancellation requests.
pub struct ProgressHandler {
    operations: DashMap<String, OperationWithProgress>,
    completed: Notify,
    connection: OnceLock<Connection>,
}

impl Default for ProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler {
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
            completed: Notify::new(),
            connection: OnceLock::new(),
        }
    }

    /// Connection used for `Progress` notifications. Only the first call has an effect.
    pub fn attach(&self, connection: Connection) {
        let _ = self.connection.set(connection);
    }

    /// Mean progress of the operations that were not canceled.
    pub fn progress(&self) -> i32 {
        let (sum, count) = self
            .operations
            .iter()
            .filter(|op| !op.canceled)
            .fold((0i64, 0i64), |(sum, count), op| (sum + op.progress as i64, count + 1));
        if count == 0 { 0 } else { (sum / count) as i32 }
    }

    /// Registers a run of `id`. An already registered operation keeps its state, and
    /// stays registered until each of its runs is removed.
    pub fn add_operation(&self, id: &str) {
        self.operations.entry(id.to_string()).or_default().runs += 1;
    }

    pub fn remove_operation(&self, id: &str) {
        if let Some(mut op) = self.operations.get_mut(id) {
            op.runs = op.runs.saturating_sub(1);
        }
        self.operations.remove_if(id, |_, op| op.runs == 0);
        if self.operations.is_empty() {
            self.completed.notify_waiters();
        }
    }

    /// Records progress of a registered operation and notifies the application.
    pub fn update_operation(&self, id: &str, progress: i32) {
        let updated = match self.operations.get_mut(id) {
            Some(mut op) => {
                op.progress = progress;
                true
            }
            None => false,
        };
        if !updated {
            return;
        }
        if let Some(connection) = self.connection.get() {
            connection.notify(
                value_set(json!({ "Progress": progress, "OperationID": id })),
                None,
            );
        }
    }

    /// Unknown operations count as canceled.
    pub fn check_canceled(&self, id: &str) -> bool {
        self.operations.get(id).is_none_or(|op| op.canceled)
    }

    pub fn try_cancel(&self, id: &str) -> bool {
        match self.operations.get_mut(id) {
            Some(mut op) => {
                op.canceled = true;
                true
            }
            None => false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.operations.is_empty()
    }

    /// Resolves once no operation is registered.
    pub async fn wait_for_completion(&self) {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.operations.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|n| n != 0)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!("expected a boolean, got {other}"))),
    }
}

/// Payload of a `FileOperation` command, selected by `fileop`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "fileop")]
pub enum FileOperationRequest {
    CopyItem {
        filepath: String,
        destpath: String,
        #[serde(rename = "operationID", default)]
        operation_id: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        overwrite: bool,
    },
    MoveItem {
        filepath: String,
        destpath: String,
        #[serde(rename = "operationID", default)]
        operation_id: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        overwrite: bool,
    },
    DeleteItem {
        filepath: String,
        #[serde(rename = "operationID", default)]
        operation_id: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        permanently: bool,
    },
    RenameItem {
        filepath: String,
        #[serde(rename = "newName")]
        new_name: String,
        #[serde(rename = "operationID", default)]
        operation_id: Option<String>,
        #[serde(default, deserialize_with = "flexible_bool")]
        overwrite: bool,
    },
    CreateFile {
        filepath: String,
    },
    CreateFolder {
        filepath: String,
    },
    CancelOperation {
        #[serde(rename = "operationID")]
        operation_id: String,
    },
}

fn split_paths(paths: &str) -> Vec<PathBuf> {
    paths
        .split('|')
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Copy,
    Move,
}

fn canceled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "operation canceled")
}

/// Bookkeeping of one running operation. Unregisters itself when dropped.
struct OperationRun {
    id: String,
    handler: Arc<ProgressHandler>,
    model: StatusCenterItemProgressModel,
}

impl OperationRun {
    fn start(handler: &Arc<ProgressHandler>, id: Option<String>, sample_interval_ms: u64) -> Self {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        handler.add_operation(&id);

        let sink_handler = handler.clone();
        let sink_id = id.clone();
        let sink: Arc<dyn ProgressSink<FileSystemProgress>> =
            Arc::new(FnProgress(move |progress: FileSystemProgress| {
                if let Some(pct) = progress.percent_complete() {
                    sink_handler.update_operation(&sink_id, pct as i32);
                }
            }));
        let model = StatusCenterItemProgressModel::new(Some(sink))
            .with_status(FileSystemStatusCode::InProgress)
            .with_sample_interval(sample_interval_ms);

        tracing::debug!(target: "handlers::file_operations", operation_id = %id, "Operation started");
        Self {
            id,
            handler: handler.clone(),
            model,
        }
    }

    fn check_canceled(&self) -> io::Result<()> {
        if self.handler.check_canceled(&self.id) {
            Err(canceled_error())
        } else {
            Ok(())
        }
    }

    fn enumerated(&mut self, items: u64, bytes: u64) {
        self.model.set_items_count(items);
        self.model.set_total_size(bytes);
        self.model.set_enumeration_completed(true);
        self.model.report(None);
    }

    fn advance(&mut self, items: u64, bytes: u64) {
        self.model.add_processed_items_count(items);
        self.model.add_processed_size(bytes);
        self.model.report(None);
    }

    fn finish(&mut self, succeeded: bool) {
        tracing::debug!(
            target: "handlers::file_operations",
            operation_id = %self.id,
            processed = %format_bytes(self.model.processed_size()),
            speed = %format_speed(self.model.processing_size_speed()),
            succeeded,
            "Operation completing"
        );
        if succeeded {
            self.model
                .report_status(FileSystemStatusCode::Success, Some(100.0));
        } else {
            self.model.report_status(FileSystemStatusCode::Generic, None);
        }
    }
}

impl Drop for OperationRun {
    fn drop(&mut self) {
        self.handler.remove_operation(&self.id);
        tracing::debug!(target: "handlers::file_operations", operation_id = %self.id, "Operation finished");
    }
}

/// How the walkers treat an entry. Links are never followed: they count as one item
/// without bytes and are recreated as links.
enum EntryKind {
    Dir,
    File(u64),
    Link,
}

fn entry_kind(meta: &std::fs::Metadata) -> EntryKind {
    if meta.file_type().is_symlink() {
        EntryKind::Link
    } else if meta.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File(meta.len())
    }
}

async fn kind_of(path: &Path) -> io::Result<EntryKind> {
    Ok(entry_kind(&tokio::fs::symlink_metadata(path).await?))
}

/// Items and bytes below `path`, the path itself included.
async fn measure(path: &Path, run: &OperationRun) -> io::Result<(u64, u64)> {
    run.check_canceled()?;
    let dir = match kind_of(path).await? {
        EntryKind::Dir => path.to_path_buf(),
        EntryKind::File(len) => return Ok((1, len)),
        EntryKind::Link => return Ok((1, 0)),
    };

    let (mut items, mut bytes) = (1u64, 0u64);
    let mut pending = vec![dir];
    while let Some(dir) = pending.pop() {
        run.check_canceled()?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            items += 1;
            match kind_of(&entry.path()).await? {
                EntryKind::Dir => pending.push(entry.path()),
                EntryKind::File(len) => bytes += len,
                EntryKind::Link => {}
            }
        }
    }
    Ok((items, bytes))
}

async fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    let target = tokio::fs::read_link(src).await?;
    #[cfg(unix)]
    {
        tokio::fs::symlink(&target, dst).await
    }
    #[cfg(windows)]
    {
        if tokio::fs::metadata(src).await.is_ok_and(|m| m.is_dir()) {
            tokio::fs::symlink_dir(&target, dst).await
        } else {
            tokio::fs::symlink_file(&target, dst).await
        }
    }
}

/// Copies one non-directory entry and reports it.
async fn copy_leaf(src: &Path, dst: &Path, kind: &EntryKind, run: &mut OperationRun) -> io::Result<()> {
    run.check_canceled()?;
    match kind {
        EntryKind::Link => {
            copy_link(src, dst).await?;
            run.advance(1, 0);
        }
        EntryKind::File(len) => {
            tokio::fs::copy(src, dst).await?;
            run.advance(1, *len);
        }
        EntryKind::Dir => {}
    }
    Ok(())
}

/// `path` itself when free, otherwise the first free "name (n).ext" next to it.
async fn unique_destination(path: &Path) -> PathBuf {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return path.to_path_buf();
    }
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 2u32;
    loop {
        let candidate = parent.join(format!("{stem} ({n}){extension}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

async fn copy_tree(src: &Path, dst: &Path, run: &mut OperationRun) -> io::Result<()> {
    if dst.starts_with(src) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "destination is inside the source folder",
        ));
    }

    let kind = kind_of(src).await?;
    if !matches!(kind, EntryKind::Dir) {
        return copy_leaf(src, dst, &kind, run).await;
    }

    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        run.check_canceled()?;
        tokio::fs::create_dir_all(&to).await?;
        run.advance(1, 0);

        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            match kind_of(&entry.path()).await? {
                EntryKind::Dir => pending.push((entry.path(), target)),
                kind => copy_leaf(&entry.path(), &target, &kind, run).await?,
            }
        }
    }
    Ok(())
}

async fn remove_path(path: &Path) -> io::Result<()> {
    if matches!(kind_of(path).await?, EntryKind::Dir) {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

async fn transfer_one(
    src: &Path,
    dst: &Path,
    kind: TransferKind,
    measured: (u64, u64),
    run: &mut OperationRun,
) -> io::Result<()> {
    run.check_canceled()?;
    let exists = tokio::fs::try_exists(dst).await.unwrap_or(false);
    if kind == TransferKind::Move && !exists && tokio::fs::rename(src, dst).await.is_ok() {
        run.advance(measured.0, measured.1);
        return Ok(());
    }

    copy_tree(src, dst, run).await?;
    if kind == TransferKind::Move {
        remove_path(src).await?;
    }
    Ok(())
}

/// Handles `FileOperation` commands.
pub struct FileOperationsHandler {
    progress: Arc<ProgressHandler>,
    sample_interval_ms: u64,
}

impl FileOperationsHandler {
    pub fn new(sample_interval_ms: u64) -> Self {
        Self {
            progress: Arc::new(ProgressHandler::new()),
            sample_interval_ms,
        }
    }

    pub fn progress_handler(&self) -> &Arc<ProgressHandler> {
        &self.progress
    }

    async fn handle(&self, connection: &Connection, message: &IncomingMessage) -> Result<()> {
        let request: FileOperationRequest = match message.parse() {
            Ok(request) => request,
            Err(e) => {
                connection.send_message(value_set(json!({ "Success": false })), message.request_id())?;
                return Err(LauncherError::InvalidField {
                    field: "fileop",
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(
            target: "handlers::file_operations",
            fileop = message.get_str("fileop").unwrap_or_default(),
            request_id = message.request_id().unwrap_or_default(),
            "File operation requested"
        );

        let result = match request {
            FileOperationRequest::CopyItem {
                filepath,
                destpath,
                operation_id,
                overwrite,
            } => {
                self.transfer(&filepath, &destpath, operation_id, overwrite, TransferKind::Copy)
                    .await
            }
            FileOperationRequest::MoveItem {
                filepath,
                destpath,
                operation_id,
                overwrite,
            } => {
                self.transfer(&filepath, &destpath, operation_id, overwrite, TransferKind::Move)
                    .await
            }
            FileOperationRequest::DeleteItem {
                filepath,
                operation_id,
                permanently,
            } => Ok(self.delete(&filepath, operation_id, permanently).await),
            FileOperationRequest::RenameItem {
                filepath,
                new_name,
                operation_id,
                overwrite,
            } => Ok(self.rename(&filepath, &new_name, operation_id, overwrite).await),
            FileOperationRequest::CreateFile { filepath } => Ok(self.create(&filepath, false).await),
            FileOperationRequest::CreateFolder { filepath } => Ok(self.create(&filepath, true).await),
            FileOperationRequest::CancelOperation { operation_id } => {
                let found = self.progress.try_cancel(&operation_id);
                tracing::info!(
                    target: "handlers::file_operations",
                    operation_id = %operation_id,
                    found,
                    "Cancellation requested"
                );
                return Ok(());
            }
        };

        let (success, result) = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                connection.send_message(value_set(json!({ "Success": false })), message.request_id())?;
                return Err(e);
            }
        };

        connection.send_message(
            value_set(json!({
                "Success": success,
                "Result": serde_json::to_string(&result)?,
            })),
            message.request_id(),
        )
    }

    async fn transfer(
        &self,
        filepath: &str,
        destpath: &str,
        operation_id: Option<String>,
        overwrite: bool,
        kind: TransferKind,
    ) -> Result<(bool, ShellOperationResult)> {
        let sources = split_paths(filepath);
        let destinations = split_paths(destpath);
        if sources.len() != destinations.len() {
            return Err(LauncherError::InvalidField {
                field: "destpath",
                reason: format!(
                    "{} sources but {} destinations",
                    sources.len(),
                    destinations.len()
                ),
            });
        }

        let mut run = OperationRun::start(&self.progress, operation_id, self.sample_interval_ms);
        let mut result = ShellOperationResult::default();

        let mut queued = Vec::with_capacity(sources.len());
        let (mut items, mut bytes) = (0u64, 0u64);
        for (src, dst) in sources.into_iter().zip(destinations) {
            match measure(&src, &run).await {
                Ok(measured) => {
                    items += measured.0;
                    bytes += measured.1;
                    queued.push((src, dst, measured));
                }
                Err(e) => result.record(Some(&src), Some(&dst), Err(e)),
            }
        }
        run.enumerated(items, bytes);

        let mut canceled = false;
        for (src, dst, measured) in queued {
            if canceled {
                result.record(Some(&src), Some(&dst), Err(canceled_error()));
                continue;
            }
            let dst = if overwrite { dst } else { unique_destination(&dst).await };
            let outcome = transfer_one(&src, &dst, kind, measured, &mut run).await;
            if let Err(e) = &outcome {
                canceled = e.kind() == io::ErrorKind::Interrupted;
                tracing::warn!(
                    target: "handlers::file_operations",
                    operation_id = %run.id,
                    source = %src.display(),
                    destination = %dst.display(),
                    error = %e,
                    "Transfer of item failed"
                );
            }
            result.record(Some(&src), Some(&dst), outcome);
        }

        let success = !canceled && result.all_succeeded();
        run.finish(success);
        Ok((success, result))
    }

    async fn delete(
        &self,
        filepath: &str,
        operation_id: Option<String>,
        permanently: bool,
    ) -> (bool, ShellOperationResult) {
        let paths = split_paths(filepath);
        let mut run = OperationRun::start(&self.progress, operation_id, self.sample_interval_ms);
        let mut result = ShellOperationResult::default();

        if !permanently {
            for path in &paths {
                result.items.push(ShellOperationItemResult {
                    succeeded: false,
                    source: display(path),
                    destination: None,
                    h_result: COPYENGINE_E_RECYCLE_BIN_NOT_FOUND,
                });
            }
            run.finish(false);
            return (false, result);
        }

        run.enumerated(paths.len() as u64, 0);
        for path in &paths {
            let outcome = match run.check_canceled() {
                Ok(()) => remove_path(path).await,
                Err(e) => Err(e),
            };
            if outcome.is_ok() {
                run.advance(1, 0);
            }
            result.record(Some(path), None, outcome);
        }

        let success = result.all_succeeded();
        run.finish(success);
        (success, result)
    }

    async fn rename(
        &self,
        filepath: &str,
        new_name: &str,
        operation_id: Option<String>,
        overwrite: bool,
    ) -> (bool, ShellOperationResult) {
        let src = PathBuf::from(filepath);
        let mut run = OperationRun::start(&self.progress, operation_id, self.sample_interval_ms);
        let mut result = ShellOperationResult::default();

        let target = src
            .parent()
            .map(|p| p.join(new_name))
            .unwrap_or_else(|| PathBuf::from(new_name));
        let target = if overwrite || target == src {
            target
        } else {
            unique_destination(&target).await
        };

        let outcome = tokio::fs::rename(&src, &target).await;
        let success = outcome.is_ok();
        result.record(Some(&src), Some(&target), outcome);
        run.finish(success);
        (success, result)
    }

    async fn create(&self, filepath: &str, folder: bool) -> (bool, ShellOperationResult) {
        let target = unique_destination(Path::new(filepath)).await;
        let outcome = if folder {
            tokio::fs::create_dir(&target).await
        } else {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
                .map(|_| ())
        };

        let mut result = ShellOperationResult::default();
        let success = outcome.is_ok();
        result.record(None, Some(&target), outcome);
        (success, result)
    }
}

impl MessageHandler for FileOperationsHandler {
    fn name(&self) -> &'static str {
        "FileOperations"
    }

    fn initialize(&self, connection: &Connection) {
        self.progress.attach(connection.clone());
    }

    fn parse_arguments<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a IncomingMessage,
        arguments: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if arguments != "FileOperation" {
                return Ok(());
            }
            self.handle(connection, message).await
        })
    }

    fn wait_for_completion(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.progress.wait_for_completion())
    }
}
