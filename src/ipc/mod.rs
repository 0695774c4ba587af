//! Named pipe transport between the application and this process.

pub mod codec;
pub mod connection;
pub mod message;
pub mod pipe;

pub use codec::JsonMessageCodec;
pub use connection::Connection;
pub use message::{Command, IncomingMessage, ValueSet, value_set};
