use futures::future::BoxFuture;
use notify_debouncer_full::notify::event::{EventKind, ModifyKind, RenameMode};
use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer};
use serde_json::{Map, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use super::MessageHandler;
use crate::error::{LauncherError, Result};
use crate::ipc::{Connection, IncomingMessage, ValueSet, value_set};

type DirectoryWatcher = Debouncer<RecommendedWatcher, RecommendedCache>;

const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(200);

/// Change type names understood by the app.
fn change_type(kind: &EventKind) -> Option<&'static str> {
    match kind {
        EventKind::Create(_) => Some("Created"),
        EventKind::Remove(_) => Some("Deleted"),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some("Renamed"),
        EventKind::Modify(_) => Some("Changed"),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Turns a debounced event into the change notification sent to the app.
fn change_notification(watcher_id: i64, event: &DebouncedEvent) -> Option<ValueSet> {
    let kind = change_type(&event.kind)?;
    let path = if kind == "Renamed" {
        event.paths.get(1)
    } else {
        event.paths.first()
    }?;

    let mut values = Map::new();
    values.insert(
        "FileSystem".into(),
        json!(path.parent().map(|p| p.to_string_lossy().into_owned())),
    );
    values.insert(
        "Name".into(),
        json!(path.file_name().map(|n| n.to_string_lossy().into_owned())),
    );
    values.insert("Path".into(), json!(path.to_string_lossy()));
    values.insert("Type".into(), json!(kind));
    values.insert("WatcherID".into(), json!(watcher_id));
    if kind == "Renamed" {
        if let Some(old) = event.paths.first() {
            values.insert("OldPath".into(), json!(old.to_string_lossy()));
        }
    }
    Some(values)
}

/// Generic Win32 commands. Only directory watching is portable.
pub struct Win32MessageHandler {
    connection: OnceLock<Connection>,
    watchers: Mutex<HashMap<i64, DirectoryWatcher>>,
    next_id: AtomicI64,
}

impl Default for Win32MessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Win32MessageHandler {
    pub fn new() -> Self {
        Self {
            connection: OnceLock::new(),
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or_default()
    }

    /// Starts watching `folder`, returning the watcher id, or `None` when it is not a directory.
    pub fn start_watching(&self, folder: &Path) -> Result<Option<i64>> {
        if !folder.is_dir() {
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = self.connection.get().cloned().unwrap_or_else(Connection::detached);
        let mut debouncer = new_debouncer(DEBOUNCE_TIMEOUT, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in &events {
                        if let Some(values) = change_notification(id, event) {
                            connection.notify(values, None);
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!(target: "handlers::win32", watcher_id = id, error = %e, "Directory watcher error");
                    }
                }
            }
        })
        .map_err(|e| LauncherError::Io(std::io::Error::other(e)))?;
        debouncer
            .watch(folder, RecursiveMode::NonRecursive)
            .map_err(|e| LauncherError::Io(std::io::Error::other(e)))?;

        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.insert(id, debouncer);
        }
        tracing::info!(target: "handlers::win32", watcher_id = id, folder = %folder.display(), "Watching directory");
        Ok(Some(id))
    }

    /// Stops the watcher `id`. Returns false when it is unknown.
    pub fn stop_watching(&self, id: i64) -> bool {
        let removed = self
            .watchers
            .lock()
            .ok()
            .and_then(|mut watchers| watchers.remove(&id));
        match removed {
            Some(debouncer) => {
                debouncer.stop();
                tracing::info!(target: "handlers::win32", watcher_id = id, "Stopped watching directory");
                true
            }
            None => false,
        }
    }

    fn watch_directory(&self, connection: &Connection, message: &IncomingMessage) -> Result<()> {
        match message.require_str("action")? {
            "start" => {
                let folder = message.require_str("folderPath")?;
                let reply = match self.start_watching(Path::new(folder))? {
                    Some(id) => value_set(json!({ "watcherID": id })),
                    None => ValueSet::new(),
                };
                connection.send_message(reply, message.request_id())
            }
            "cancel" => {
                let id = message
                    .get_i64("watcherID")
                    .ok_or(LauncherError::MissingField("watcherID"))?;
                self.stop_watching(id);
                Ok(())
            }
            other => Err(LauncherError::InvalidField {
                field: "action",
                reason: format!("unknown action {other}"),
            }),
        }
    }
}

impl MessageHandler for Win32MessageHandler {
    fn name(&self) -> &'static str {
        "Win32"
    }

    fn initialize(&self, connection: &Connection) {
        let _ = self.connection.set(connection.clone());
    }

    fn parse_arguments<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a IncomingMessage,
        arguments: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match arguments {
                "WatchDirectory" => self.watch_directory(connection, message),
                _ => Ok(()),
            }
        })
    }

    fn dispose(&self) {
        let drained: Vec<DirectoryWatcher> = match self.watchers.lock() {
            Ok(mut watchers) => watchers.drain().map(|(_, w)| w).collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        for debouncer in drained {
            debouncer.stop();
        }
        tracing::debug!(target: "handlers::win32", count, "Directory watchers disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::JsonMessageCodec;
    use futures::StreamExt;
    use notify_debouncer_full::notify::Event;
    use std::path::PathBuf;
    use std::time::Instant;
    use tokio_util::codec::FramedRead;

    fn debounced(kind: EventKind, paths: &[&str]) -> DebouncedEvent {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        DebouncedEvent::new(event, Instant::now())
    }

    #[test]
    fn test_rename_notification_carries_old_path() {
        let event = debounced(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/data/old.txt", "/data/new.txt"],
        );
        let values = change_notification(7, &event).unwrap();
        assert_eq!(values["Type"], "Renamed");
        assert_eq!(values["Path"], "/data/new.txt");
        assert_eq!(values["OldPath"], "/data/old.txt");
        assert_eq!(values["Name"], "new.txt");
        assert_eq!(values["FileSystem"], "/data");
        assert_eq!(values["WatcherID"], 7);
    }

    #[test]
    fn test_access_events_are_ignored() {
        use notify_debouncer_full::notify::event::AccessKind;
        let event = debounced(EventKind::Access(AccessKind::Any), &["/data/a.txt"]);
        assert!(change_notification(1, &event).is_none());

        let created = debounced(
            EventKind::Create(notify_debouncer_full::notify::event::CreateKind::File),
            &["/data/a.txt"],
        );
        assert_eq!(change_notification(1, &created).unwrap()["Type"], "Created");
    }

    #[tokio::test]
    async fn test_start_and_cancel_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = tokio::io::duplex(4096);
        let (connection, _writer) = Connection::spawn(client);
        let handler = Win32MessageHandler::new();
        handler.initialize(&connection);

        let start = IncomingMessage::new(value_set(json!({
            "Arguments": "WatchDirectory",
            "action": "start",
            "folderPath": dir.path().to_str().unwrap(),
            "RequestID": "w1"
        })));
        handler
            .parse_arguments(&connection, &start, "WatchDirectory")
            .await
            .unwrap();

        let mut replies = FramedRead::new(server, JsonMessageCodec::default());
        let reply = replies.next().await.unwrap().unwrap();
        assert_eq!(reply.request_id(), Some("w1"));
        let id = reply.get_i64("watcherID").unwrap();
        assert_eq!(handler.watcher_count(), 1);

        let cancel = IncomingMessage::new(value_set(json!({
            "Arguments": "WatchDirectory",
            "action": "cancel",
            "watcherID": id
        })));
        handler
            .parse_arguments(&connection, &cancel, "WatchDirectory")
            .await
            .unwrap();
        assert_eq!(handler.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_folder_gets_empty_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = tokio::io::duplex(4096);
        let (connection, _writer) = Connection::spawn(client);
        let handler = Win32MessageHandler::new();
        handler.initialize(&connection);

        let start = IncomingMessage::new(value_set(json!({
            "action": "start",
            "folderPath": dir.path().join("missing").to_str().unwrap()
        })));
        handler
            .parse_arguments(&connection, &start, "WatchDirectory")
            .await
            .unwrap();

        let mut replies = FramedRead::new(server, JsonMessageCodec::default());
        let reply = replies.next().await.unwrap().unwrap();
        assert!(reply.get("watcherID").is_none());
        assert_eq!(handler.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_stops_all_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Win32MessageHandler::new();
        handler.start_watching(dir.path()).unwrap().unwrap();
        handler.start_watching(dir.path()).unwrap().unwrap();
        assert_eq!(handler.watcher_count(), 2);
        handler.dispose();
        assert_eq!(handler.watcher_count(), 0);
    }
}
