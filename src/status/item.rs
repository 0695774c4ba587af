use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codes::ReturnResult;
use super::progress::whole_percent;
use crate::error::StatusCenterError;

/// Kind of file system operation an item tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileOperationType {
    #[default]
    CreateNew,
    Rename,
    CreateLink,
    Move,
    Copy,
    Delete,
    Recycle,
    Restore,
    Extract,
    Compress,
    Prepare,
}

impl FileOperationType {
    /// Title used for in-progress items posted without one.
    pub fn in_progress_title(self) -> Option<&'static str> {
        match self {
            Self::Extract => Some("Extracting items"),
            Self::Copy => Some("Copying items"),
            Self::Move => Some("Moving items"),
            Self::Delete => Some("Deleting items"),
            Self::Recycle => Some("Moving items to the Recycle Bin"),
            Self::Compress => Some("Compressing items"),
            Self::Prepare => Some("Preparing items"),
            _ => None,
        }
    }
}

/// Presentation of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusCenterItemKind {
    /// Progress card of a running or finished operation
    Operation,
    /// Failure card offering a follow-up action
    Action {
        primary_button_text: String,
        secondary_button_text: String,
    },
}

/// Accent of the card, derived from the status at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSeverity {
    Informational,
    Success,
    Error,
}

/// One user visible operation card.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCenterItem {
    pub id: Uuid,
    pub title: String,
    /// Title decorated with progress details
    pub full_title: String,
    pub message: String,
    pub status: ReturnResult,
    /// Whole percent in `0..=100`
    pub progress: u8,
    pub is_progressing: bool,
    pub is_cancelled: bool,
    pub operation: FileOperationType,
    pub kind: StatusCenterItemKind,
    pub severity: ItemSeverity,
    pub created_at: DateTime<Local>,
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl StatusCenterItem {
    /// Creates an operation card.
    ///
    /// Terminal items (`Success`, `Failed`, `Cancelled`) are shown expanded and require
    /// both a title and a message.
    pub fn new(
        message: impl Into<String>,
        title: impl Into<String>,
        initial_progress: f32,
        status: ReturnResult,
        operation: FileOperationType,
    ) -> Result<Self, StatusCenterError> {
        let mut item = Self {
            id: Uuid::new_v4(),
            title: title.into(),
            full_title: String::new(),
            message: message.into(),
            status,
            progress: whole_percent(initial_progress),
            is_progressing: false,
            is_cancelled: false,
            operation,
            kind: StatusCenterItemKind::Operation,
            severity: ItemSeverity::Informational,
            created_at: Local::now(),
            cancellation: None,
        };

        match status {
            ReturnResult::InProgress => {
                item.is_progressing = true;
                if is_blank(&item.title) {
                    if let Some(title) = operation.in_progress_title() {
                        item.title = title.to_string();
                    }
                }
                item.full_title = format!("{} ({}%)", item.title, item.progress);
            }
            ReturnResult::Success | ReturnResult::Failed | ReturnResult::Cancelled => {
                item.require_texts()?;
                item.full_title = item.title.clone();
                item.severity = if status == ReturnResult::Success {
                    ItemSeverity::Success
                } else {
                    ItemSeverity::Error
                };
            }
            _ => {
                item.full_title = item.title.clone();
            }
        }

        Ok(item)
    }

    /// Creates an operation card the user can cancel through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Creates a failure card with a follow-up action.
    pub fn new_action(
        message: impl Into<String>,
        title: impl Into<String>,
        primary_button_text: impl Into<String>,
        secondary_button_text: impl Into<String>,
    ) -> Result<Self, StatusCenterError> {
        let item = Self {
            id: Uuid::new_v4(),
            title: title.into(),
            full_title: String::new(),
            message: message.into(),
            status: ReturnResult::Failed,
            progress: 0,
            is_progressing: false,
            is_cancelled: false,
            operation: FileOperationType::default(),
            kind: StatusCenterItemKind::Action {
                primary_button_text: primary_button_text.into(),
                secondary_button_text: secondary_button_text.into(),
            },
            severity: ItemSeverity::Error,
            created_at: Local::now(),
            cancellation: None,
        };
        item.require_texts()?;
        Ok(Self {
            full_title: item.title.clone(),
            ..item
        })
    }

    fn require_texts(&self) -> Result<(), StatusCenterError> {
        if is_blank(&self.title) || is_blank(&self.message) {
            return Err(StatusCenterError::MissingTitleOrMessage {
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    pub fn cancel_button_visible(&self) -> bool {
        self.cancellation.is_some()
    }

    /// Action buttons are shown only when a primary action is labelled.
    pub fn solution_buttons_visible(&self) -> bool {
        matches!(&self.kind, StatusCenterItemKind::Action { primary_button_text, .. } if !is_blank(primary_button_text))
    }

    /// Requests cooperative cancellation of the underlying operation.
    ///
    /// Returns false when the item cannot be cancelled.
    pub fn cancel_operation(&mut self) -> bool {
        let Some(token) = &self.cancellation else {
            return false;
        };
        token.cancel();
        self.is_cancelled = true;
        self.full_title = format!("{} (canceling)", self.title);
        true
    }
}
