use std::io;
use thiserror::Error;

/// Errors raised by the launcher process: pipe transport, message decoding,
/// handler payload validation and process control.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to connect to pipe {name}: {source}")]
    PipeConnect {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out connecting to pipe {0}")]
    ConnectTimeout(String),

    #[error("Message is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Message field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Elevation failed: {0}")]
    Elevation(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Connection is closed")]
    ConnectionClosed,
}

impl LauncherError {
    /// OS error code carried by the underlying I/O error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(source) | Self::PipeConnect { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Errors raised while building status center items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusCenterError {
    /// Terminal items are shown expanded and must carry both texts.
    #[error("A {status} status center item requires a title and a message")]
    MissingTitleOrMessage { status: String },
}

pub type Result<T> = std::result::Result<T, LauncherError>;
