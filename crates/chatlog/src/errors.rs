// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for submitting, persisting and configuring chat logs.

use crate::destination::Destination;
use crate::entry::Entry;
use std::io;
use std::path::PathBuf;

/// Failures while persisting a single entry.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to create log directory {path}: {source}")]
    DirectoryCreation { path: PathBuf, source: io::Error },

    #[error("Failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to write to log file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Destination {0:?} is not supported by this sink")]
    UnsupportedDestination(Destination),
}

impl SinkError {
    /// Whether another attempt at the same entry can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SinkError::DirectoryCreation { .. }
                | SinkError::Open { .. }
                | SinkError::Write { .. }
                | SinkError::Unavailable(_)
        )
    }
}

/// Failures returned to producers.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Chat log is shut down")]
    Shutdown,

    /// Only returned by `try_submit`; the rejected entry is handed back.
    #[error("Chat log queue is full")]
    QueueFull(Entry),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::Invalid("queue capacity must be at least 1".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: queue capacity must be at least 1"
        );

        let error = SinkError::Open {
            path: PathBuf::from("/logs/irc/foo/2024/01/02/03.csl"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(error
            .to_string()
            .starts_with("Failed to open log file /logs/irc/foo/2024/01/02/03.csl"));
    }

    #[test]
    fn test_retryable_classification() {
        let io_error = || io::Error::from(io::ErrorKind::Other);
        assert!(SinkError::DirectoryCreation {
            path: PathBuf::new(),
            source: io_error()
        }
        .is_retryable());
        assert!(SinkError::Write {
            path: PathBuf::new(),
            source: io_error()
        }
        .is_retryable());
        assert!(SinkError::Unavailable("connection refused".into()).is_retryable());
        assert!(!SinkError::UnsupportedDestination(Destination::Queue("q".into())).is_retryable());

        let serde_error = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(!SinkError::Serialization(serde_error).is_retryable());
    }
}
