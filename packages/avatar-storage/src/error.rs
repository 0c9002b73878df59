//! Error types for avatar-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Metadata database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Job record or object not found
    NotFound,
    /// Object store (S3) errors
    ObjectStore,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ObjectStore => "object_store",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("Job not found: {}", job_id))
    }

    pub fn object_not_found(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("Object not found: {}", key.into()))
    }

    pub fn object_store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjectStore, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("IO error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = StorageError::job_not_found("1b4e28ba");
        let msg = format!("{}", err);
        assert!(msg.contains("not_found"));
        assert!(msg.contains("1b4e28ba"));
    }

    #[test]
    fn test_database_error() {
        let err = StorageError::database("Connection failed");
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(err.message, "Connection failed");
        assert!(err.source.is_none());
        assert_eq!(format!("{}", err), "[database] Connection failed");
    }

    #[test]
    fn test_object_not_found_is_not_found() {
        let err = StorageError::object_not_found("uploads/u1/avatar.png");
        assert!(err.is_not_found());
        assert!(err.message.contains("uploads/u1/avatar.png"));

        let err = StorageError::object_store("throttled");
        assert!(!err.is_not_found());
        assert_eq!(format!("{}", err), "[object_store] throttled");
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StorageError::database("DB file missing").with_source(io_err);

        assert_eq!(err.kind, ErrorKind::Database);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = json_err.into();
        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.starts_with("JSON error"));
    }

    #[test]
    fn test_error_kind_strings() {
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::ObjectStore.to_string(), "object_store");
        assert_eq!(ErrorKind::IO.as_str(), "io");
    }
}
