//! Error types for MeetBridge.

use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Task tracker error: {0}")]
    Tracker(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Transient failures that should become a retry entry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout(_) | Self::Provider(_) | Self::Tracker(_)
        )
    }

    /// Failures that should stop the task that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(BridgeError::Timeout(120).is_retryable());
        assert!(BridgeError::Tracker("429 Too Many Requests".into()).is_retryable());
        assert!(!BridgeError::Parse("bad json".into()).is_retryable());
        assert!(BridgeError::Database("disk I/O error".into()).is_fatal());
        assert!(!BridgeError::Http("connection refused".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let e = BridgeError::Timeout(30);
        assert_eq!(e.to_string(), "Timed out after 30s");
    }
}
