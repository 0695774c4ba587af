use futures::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

use super::codec::JsonMessageCodec;
use super::message::{REQUEST_ID, ValueSet};
use crate::error::{LauncherError, Result};

/// Outbound side of the pipe.
///
/// Cheap to clone; every clone feeds the same writer task, so messages from concurrent
/// handlers are written whole and in send order.
#[derive(Clone)]
pub struct Connection {
    tx: Option<mpsc::UnboundedSender<ValueSet>>,
}

impl Connection {
    /// Starts the writer task for `writer`.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ValueSet>();
        let handle = tokio::spawn(async move {
            let mut framed = FramedWrite::new(writer, JsonMessageCodec::default());
            while let Some(message) = rx.recv().await {
                if let Err(e) = framed.send(message).await {
                    tracing::warn!(target: "ipc", error = %e, "Failed to write message, closing writer");
                    break;
                }
            }
            tracing::debug!(target: "ipc", "Writer task finished");
        });
        (Self { tx: Some(tx) }, handle)
    }

    /// A connection that was never established. Sends fail with `ConnectionClosed`.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queues `values` with a `RequestID` key, `null` when not replying to a request.
    pub fn send_message(&self, mut values: ValueSet, request_id: Option<&str>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(LauncherError::ConnectionClosed)?;
        values.insert(
            REQUEST_ID.to_string(),
            request_id.map_or(Value::Null, |id| Value::String(id.to_string())),
        );
        tx.send(values).map_err(|_| LauncherError::ConnectionClosed)
    }

    /// Like `send_message`, logging instead of failing.
    pub fn notify(&self, values: ValueSet, request_id: Option<&str>) {
        if let Err(e) = self.send_message(values, request_id) {
            tracing::debug!(target: "ipc", error = %e, "Dropping outbound message");
        }
    }
}
