//! Full-trust helper of the Files app: the named pipe launcher that performs file
//! operations on the app's behalf, and the status center models that turn their
//! progress into user visible cards.

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ipc;
pub mod launcher;
pub mod logging;
pub mod status;

pub use error::{LauncherError, Result, StatusCenterError};
