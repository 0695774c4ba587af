use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome codes reported by file system operations.
///
/// Values are bit flags so that a status can be tested against `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum FileSystemStatusCode {
    Success = 0,
    Generic = 1,
    Unauthorized = 2,
    NotFound = 4,
    InUse = 8,
    NameTooLong = 16,
    AlreadyExists = 32,
    NotAFolder = 64,
    NotAFile = 128,
    InProgress = 256,
}

impl FileSystemStatusCode {
    pub const ALL: [FileSystemStatusCode; 10] = [
        Self::Success,
        Self::Generic,
        Self::Unauthorized,
        Self::NotFound,
        Self::InUse,
        Self::NameTooLong,
        Self::AlreadyExists,
        Self::NotAFolder,
        Self::NotAFile,
        Self::InProgress,
    ];

    pub fn bits(self) -> u16 {
        self as u16
    }

    pub fn is_in_progress(self) -> bool {
        self.bits() & Self::InProgress.bits() != 0
    }

    /// Terminal codes end an operation; only `InProgress` does not.
    pub fn is_terminal(self) -> bool {
        !self.is_in_progress()
    }

    /// Collapses a file system code into the coarser result shown to the user.
    pub fn to_status(self) -> ReturnResult {
        match self {
            Self::Success => ReturnResult::Success,
            Self::Generic => ReturnResult::Failed,
            Self::Unauthorized => ReturnResult::AccessUnauthorized,
            Self::NotFound => ReturnResult::IntegrityCheckFailed,
            Self::InUse => ReturnResult::AccessUnauthorized,
            Self::NameTooLong => ReturnResult::UnknownException,
            Self::AlreadyExists => ReturnResult::Failed,
            Self::NotAFolder => ReturnResult::BadArgumentException,
            Self::NotAFile => ReturnResult::BadArgumentException,
            Self::InProgress => ReturnResult::InProgress,
        }
    }

    /// Best-effort classification of an I/O error.
    pub fn from_io_error(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::PermissionDenied => Self::Unauthorized,
            ErrorKind::AlreadyExists => Self::AlreadyExists,
            ErrorKind::NotADirectory => Self::NotAFolder,
            ErrorKind::IsADirectory => Self::NotAFile,
            ErrorKind::ResourceBusy => Self::InUse,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for FileSystemStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result taxonomy displayed on status center items.
///
/// Ordering matters: callers keep the worst result seen with `a < ReturnResult::Failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ReturnResult {
    #[default]
    InProgress = 0,
    Success = 1,
    Failed = 2,
    IntegrityCheckFailed = 3,
    UnknownException = 4,
    NullException = 5,
    AccessUnauthorized = 6,
    Cancelled = 7,
    BadArgumentException = 8,
}

impl ReturnResult {
    pub fn is_terminal(self) -> bool {
        self != ReturnResult::InProgress
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, ReturnResult::InProgress | ReturnResult::Success)
    }
}

impl fmt::Display for ReturnResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_status_table() {
        use FileSystemStatusCode as C;
        let expected = [
            (C::Success, ReturnResult::Success),
            (C::Generic, ReturnResult::Failed),
            (C::Unauthorized, ReturnResult::AccessUnauthorized),
            (C::NotFound, ReturnResult::IntegrityCheckFailed),
            (C::InUse, ReturnResult::AccessUnauthorized),
            (C::NameTooLong, ReturnResult::UnknownException),
            (C::AlreadyExists, ReturnResult::Failed),
            (C::NotAFolder, ReturnResult::BadArgumentException),
            (C::NotAFile, ReturnResult::BadArgumentException),
            (C::InProgress, ReturnResult::InProgress),
        ];
        for (code, result) in expected {
            assert_eq!(code.to_status(), result, "mapping for {code}");
        }
    }

    #[test]
    fn test_only_in_progress_carries_the_flag() {
        for code in FileSystemStatusCode::ALL {
            assert_eq!(code.is_in_progress(), code == FileSystemStatusCode::InProgress);
        }
    }

    #[test]
    fn test_return_result_ordering() {
        assert!(ReturnResult::Success < ReturnResult::Failed);
        assert!(ReturnResult::Cancelled > ReturnResult::Failed);
        assert_eq!(ReturnResult::default(), ReturnResult::InProgress);
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(FileSystemStatusCode::from_io_error(&err), FileSystemStatusCode::NotFound);
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(FileSystemStatusCode::from_io_error(&err), FileSystemStatusCode::Unauthorized);
    }
}
