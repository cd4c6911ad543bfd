//! Event store error types
//!
//! Error codes:
//! - TAP_STORE_IO_ERROR (ERROR severity)
//! - TAP_STORE_WRITE_FAILED (ERROR severity)
//! - TAP_STORE_READ_FAILED (ERROR severity)
//! - TAP_EVENT_NOT_FOUND (ERROR severity)
//! - TAP_STORE_INVALID_REQUEST (ERROR severity)
//! - TAP_STORE_LOCKED (ERROR severity)
//! - TAP_STORE_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;
use std::path::Path;

/// Severity levels for store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, station continues
    Error,
    /// Store must not be used
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Store error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// Disk I/O failure
    IoError,
    /// Durable append failed
    WriteFailed,
    /// Log read failed
    ReadFailed,
    /// No live event with the requested id
    EventNotFound,
    /// Administrative request is malformed
    InvalidRequest,
    /// Another process holds the data directory
    Locked,
    /// Checksum or framing failure in the log
    Corruption,
}

impl StoreErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::IoError => "TAP_STORE_IO_ERROR",
            StoreErrorCode::WriteFailed => "TAP_STORE_WRITE_FAILED",
            StoreErrorCode::ReadFailed => "TAP_STORE_READ_FAILED",
            StoreErrorCode::EventNotFound => "TAP_EVENT_NOT_FOUND",
            StoreErrorCode::InvalidRequest => "TAP_STORE_INVALID_REQUEST",
            StoreErrorCode::Locked => "TAP_STORE_LOCKED",
            StoreErrorCode::Corruption => "TAP_STORE_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StoreErrorCode::Corruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Store error with code, message and optional context
#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StoreError {
    fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StoreErrorCode::IoError, message)
        }
    }

    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StoreErrorCode::WriteFailed, message)
        }
    }

    /// Write failure without an underlying IO error (e.g. encode failure)
    pub fn write_failed_no_source(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::WriteFailed, message)
    }

    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StoreErrorCode::ReadFailed, message)
        }
    }

    pub fn not_found(event_id: u64) -> Self {
        Self {
            details: Some(format!("event_id: {}", event_id)),
            ..Self::new(StoreErrorCode::EventNotFound, "Event not found")
        }
    }

    pub fn invalid_request(field: &str, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("field: {}", field)),
            ..Self::new(StoreErrorCode::InvalidRequest, reason)
        }
    }

    pub fn locked(path: &Path) -> Self {
        Self {
            details: Some(format!("path: {}", path.display())),
            ..Self::new(
                StoreErrorCode::Locked,
                "Store is already held by another opener",
            )
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Corruption, message)
    }

    /// Corruption with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("byte_offset: {}", offset)),
            ..Self::new(StoreErrorCode::Corruption, reason)
        }
    }

    pub fn code(&self) -> StoreErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error means the store must not be used
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StoreErrorCode::EventNotFound
    }

    pub fn is_locked(&self) -> bool {
        self.code == StoreErrorCode::Locked
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StoreErrorCode::IoError.code(), "TAP_STORE_IO_ERROR");
        assert_eq!(StoreErrorCode::WriteFailed.code(), "TAP_STORE_WRITE_FAILED");
        assert_eq!(StoreErrorCode::EventNotFound.code(), "TAP_EVENT_NOT_FOUND");
        assert_eq!(StoreErrorCode::Corruption.code(), "TAP_STORE_CORRUPTION");
        assert_eq!(StoreErrorCode::Locked.code(), "TAP_STORE_LOCKED");
    }

    #[test]
    fn test_locked_names_the_path() {
        let err = StoreError::locked(Path::new("/srv/tap/data/events.log"));
        assert!(err.is_locked());
        assert!(!err.is_fatal());
        assert_eq!(err.details(), Some("path: /srv/tap/data/events.log"));
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(StoreError::corruption("bad crc").is_fatal());
        assert!(!StoreError::not_found(3).is_fatal());
        assert!(!StoreError::write_failed(
            "disk full",
            io::Error::new(io::ErrorKind::Other, "disk full")
        )
        .is_fatal());
    }

    #[test]
    fn test_display_carries_context() {
        let display = StoreError::corruption_at_offset(512, "checksum mismatch").to_string();
        assert!(display.contains("FATAL"));
        assert!(display.contains("TAP_STORE_CORRUPTION"));
        assert!(display.contains("byte_offset: 512"));

        let display = StoreError::not_found(42).to_string();
        assert!(display.contains("event_id: 42"));
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error;
        let err = StoreError::read_failed("open", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
        assert!(StoreError::corruption("x").source().is_none());
    }
}
