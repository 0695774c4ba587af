//! The helper process' message loop.
//!
//! One inbound pipe, read sequentially. Builtin commands (`Terminate`, `Elevate`) are
//! handled inline; everything else is offered to every registered handler on a spawned
//! task, so slow operations never hold up the read loop. On exit the launcher waits for
//! outstanding handler work before disposing the handlers and the device watcher.

pub mod devices;
pub mod elevation;
pub mod startup;

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tokio_util::task::TaskTracker;

use crate::handlers::{
    ApplicationLaunchHandler, FileOperationsHandler, MessageHandler, Win32MessageHandler,
};
use crate::ipc::{Command, Connection, IncomingMessage, JsonMessageCodec, value_set};
use devices::{DeviceWatcher, DriveSource, SystemDrives};
use elevation::{ElevationOutcome, Elevator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReceivingMessages,
}

/// Why the message loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Terminated,
    /// An elevated instance took over
    Elevated,
    PipeClosed,
}

/// Handlers available without shell interop.
pub fn default_handlers(sample_interval_ms: u64) -> Vec<Arc<dyn MessageHandler>> {
    vec![
        Arc::new(ApplicationLaunchHandler::new()),
        Arc::new(FileOperationsHandler::new(sample_interval_ms)),
        Arc::new(Win32MessageHandler::new()),
    ]
}

pub struct Launcher {
    handlers: Arc<[Arc<dyn MessageHandler>]>,
    elevator: Arc<dyn Elevator>,
    devices: Option<(Arc<dyn DriveSource>, Duration)>,
    state: watch::Sender<ConnectionState>,
    tasks: TaskTracker,
}

impl Launcher {
    pub fn new(handlers: Vec<Arc<dyn MessageHandler>>, elevator: Arc<dyn Elevator>) -> Self {
        Self {
            handlers: handlers.into(),
            elevator,
            devices: None,
            state: watch::Sender::new(ConnectionState::Disconnected),
            tasks: TaskTracker::new(),
        }
    }

    /// Enables drive arrival/removal notifications from the system drives.
    pub fn with_device_watcher(self, poll_interval: Duration) -> Self {
        self.with_drive_source(Arc::new(SystemDrives), poll_interval)
    }

    pub fn with_drive_source(mut self, source: Arc<dyn DriveSource>, poll_interval: Duration) -> Self {
        self.devices = Some((source, poll_interval));
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(target: "launcher", from = ?previous, to = ?state, "Connection state changed");
        }
    }

    /// Reads messages from `reader` until the pipe closes or the app asks to exit,
    /// then drains outstanding work and disposes the handlers.
    pub async fn run<R>(&self, reader: R, connection: Connection) -> ExitReason
    where
        R: AsyncRead + Unpin,
    {
        self.set_state(ConnectionState::Connected);
        for handler in self.handlers.iter() {
            handler.initialize(&connection);
        }
        let device_watcher = self
            .devices
            .as_ref()
            .map(|(source, interval)| DeviceWatcher::start(connection.clone(), source.clone(), *interval));

        self.set_state(ConnectionState::ReceivingMessages);
        let mut frames = FramedRead::new(reader, JsonMessageCodec::default());
        let reason = loop {
            match frames.next().await {
                Some(Ok(message)) => {
                    if let Some(reason) = self.dispatch(&connection, message) {
                        break reason;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(target: "launcher", error = %e, "Pipe read failed");
                    break ExitReason::PipeClosed;
                }
                None => break ExitReason::PipeClosed,
            }
        };

        tracing::info!(target: "launcher", reason = ?reason, "Leaving message loop");
        self.shutdown(device_watcher).await;
        self.set_state(ConnectionState::Disconnected);
        reason
    }

    /// Handles one message. Returns the exit reason when the loop must end.
    fn dispatch(&self, connection: &Connection, message: IncomingMessage) -> Option<ExitReason> {
        let Some(command) = message.command() else {
            tracing::trace!(target: "launcher", "Ignoring message without arguments");
            return None;
        };

        match command {
            Command::Terminate => Some(ExitReason::Terminated),
            Command::Elevate => {
                let outcome = self.elevator.elevate();
                tracing::info!(target: "launcher", outcome = ?outcome, "Elevation requested");
                connection.notify(
                    value_set(json!({ "Success": outcome.code() })),
                    message.request_id(),
                );
                (outcome == ElevationOutcome::Relaunched).then_some(ExitReason::Elevated)
            }
            Command::Handler(arguments) => {
                let handlers = self.handlers.clone();
                let connection = connection.clone();
                self.tasks.spawn(async move {
                    for handler in handlers.iter() {
                        if let Err(e) = handler.parse_arguments(&connection, &message, &arguments).await {
                            tracing::error!(
                                target: "launcher",
                                handler = handler.name(),
                                arguments = %arguments,
                                request_id = message.request_id().unwrap_or_default(),
                                error = %e,
                                "Handler failed to process message"
                            );
                        }
                    }
                });
                None
            }
        }
    }

    async fn shutdown(&self, device_watcher: Option<DeviceWatcher>) {
        self.tasks.close();
        self.tasks.wait().await;

        for handler in self.handlers.iter() {
            handler.wait_for_completion().await;
        }
        tracing::debug!(target: "launcher", "Outstanding operations drained");

        for handler in self.handlers.iter() {
            handler.dispose();
        }
        if let Some(watcher) = device_watcher {
            watcher.stop().await;
        }
        tracing::info!(target: "launcher", "Handlers disposed");
    }
}
