//! Handlers for commands forwarded by the launcher's message loop.

pub mod application_launch;
pub mod file_operations;
pub mod win32;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::ipc::{Connection, IncomingMessage};

pub use application_launch::ApplicationLaunchHandler;
pub use file_operations::{FileOperationsHandler, ProgressHandler};
pub use win32::Win32MessageHandler;

/// A unit of the launcher that answers a family of `Arguments` commands.
///
/// Every handler sees every non-builtin command and ignores those it does not own.
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once after the pipe is connected, before any message is dispatched.
    fn initialize(&self, _connection: &Connection) {}

    fn parse_arguments<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a IncomingMessage,
        arguments: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Resolves once no work started by this handler is outstanding.
    fn wait_for_completion(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    /// Releases watchers and other resources. Called after `wait_for_completion`.
    fn dispose(&self) {}
}
