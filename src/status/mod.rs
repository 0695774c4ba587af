//! Status center: progress models of running file system operations and the cards
//! that present them.

pub mod codes;
pub mod format;
pub mod item;
pub mod posted;
pub mod progress;
pub mod sampler;
pub mod view_model;

pub use codes::{FileSystemStatusCode, ReturnResult};
pub use item::{FileOperationType, StatusCenterItem, StatusCenterItemKind};
pub use posted::{ProgressReporter, SharedItem, StatusCenterPostedItem};
pub use progress::{
    FileSystemProgress, FnProgress, ProgressObserver, ProgressProperty, ProgressSink,
    StatusCenterItemProgressModel,
};
pub use sampler::IntervalSampler;
pub use view_model::{StatusCenterSink, StatusCenterViewModel};
