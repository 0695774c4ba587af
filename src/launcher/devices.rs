use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ipc::{Connection, value_set};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DeviceEventType {
    Added = 0,
    Removed = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    pub device_id: String,
    pub event_type: DeviceEventType,
}

/// Source of the currently mounted drives.
pub trait DriveSource: Send + Sync + 'static {
    fn drives(&self) -> BTreeSet<String>;
}

/// Logical drives on Windows, removable mount points elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDrives;

#[cfg(windows)]
impl DriveSource for SystemDrives {
    fn drives(&self) -> BTreeSet<String> {
        let mask = unsafe { windows::Win32::Storage::FileSystem::GetLogicalDrives() };
        (0..26u8)
            .filter(|bit| mask & (1u32 << bit) != 0)
            .map(|bit| format!("{}:\\", (b'A' + bit) as char))
            .collect()
    }
}

#[cfg(not(windows))]
impl DriveSource for SystemDrives {
    fn drives(&self) -> BTreeSet<String> {
        match std::fs::read_to_string("/proc/mounts") {
            Ok(mounts) => parse_mounts(&mounts),
            Err(_) => BTreeSet::new(),
        }
    }
}

/// Mount points under the usual removable media roots.
#[cfg(not(windows))]
fn parse_mounts(mounts: &str) -> BTreeSet<String> {
    const ROOTS: [&str; 3] = ["/media/", "/mnt/", "/run/media/"];
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|mount| mount.replace("\\040", " "))
        .filter(|mount| ROOTS.iter().any(|root| mount.starts_with(root)))
        .collect()
}

/// Changes between two drive snapshots, additions first.
pub fn diff_drives(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Vec<DeviceChange> {
    let added = current.difference(previous).map(|id| DeviceChange {
        device_id: id.clone(),
        event_type: DeviceEventType::Added,
    });
    let removed = previous.difference(current).map(|id| DeviceChange {
        device_id: id.clone(),
        event_type: DeviceEventType::Removed,
    });
    added.chain(removed).collect()
}

/// Polls the drive source and notifies the app about arrivals and removals.
pub struct DeviceWatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeviceWatcher {
    pub fn start(connection: Connection, source: Arc<dyn DriveSource>, poll_interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut known = source.drives();
            tracing::debug!(target: "devices", count = known.len(), "Device watcher started");

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let current = source.drives();
                for change in diff_drives(&known, &current) {
                    tracing::info!(
                        target: "devices",
                        device_id = %change.device_id,
                        event = ?change.event_type,
                        "Device change"
                    );
                    connection.notify(
                        value_set(json!({
                            "DeviceID": change.device_id,
                            "EventType": change.event_type as i32,
                        })),
                        None,
                    );
                }
                known = current;
            }
            tracing::debug!(target: "devices", "Device watcher stopped");
        });
        Self { token, handle }
    }

    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(target: "devices", error = %e, "Device watcher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::JsonMessageCodec;
    use futures::StreamExt;
    use std::sync::Mutex;
    use tokio_util::codec::FramedRead;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_drives() {
        let changes = diff_drives(&set(&["C:\\", "D:\\"]), &set(&["C:\\", "E:\\"]));
        assert_eq!(
            changes,
            vec![
                DeviceChange {
                    device_id: "E:\\".into(),
                    event_type: DeviceEventType::Added
                },
                DeviceChange {
                    device_id: "D:\\".into(),
                    event_type: DeviceEventType::Removed
                },
            ]
        );
        assert!(diff_drives(&set(&["C:\\"]), &set(&["C:\\"])).is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_parse_mounts_keeps_removable_roots() {
        let mounts = "/dev/sda1 / ext4 rw 0 0\n\
                      /dev/sdb1 /media/user/USB\\040STICK vfat rw 0 0\n\
                      proc /proc proc rw 0 0\n\
                      /dev/sdc1 /mnt/backup ext4 rw 0 0\n";
        assert_eq!(parse_mounts(mounts), set(&["/media/user/USB STICK", "/mnt/backup"]));
    }

    struct ScriptedDrives(Mutex<Vec<BTreeSet<String>>>);

    impl DriveSource for ScriptedDrives {
        fn drives(&self) -> BTreeSet<String> {
            let mut script = self.0.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    #[tokio::test]
    async fn test_watcher_notifies_arrival() {
        let (client, server) = tokio::io::duplex(4096);
        let (connection, _writer) = Connection::spawn(client);
        let source = Arc::new(ScriptedDrives(Mutex::new(vec![
            set(&["C:\\"]),
            set(&["C:\\", "F:\\"]),
        ])));

        let watcher = DeviceWatcher::start(connection, source, Duration::from_millis(10));
        let mut messages = FramedRead::new(server, JsonMessageCodec::default());
        let message = messages.next().await.unwrap().unwrap();
        assert_eq!(message.get_str("DeviceID"), Some("F:\\"));
        assert_eq!(message.get_i64("EventType"), Some(0));

        watcher.stop().await;
    }
}
