//! Error types for burrow-core
//!
//! Every core operation returns `Result<T, Error>`. Expected coordination
//! outcomes (a lock that stayed busy, a lost-update conflict, a transaction
//! that could not start) are ordinary variants, never panics. The CLI maps
//! them onto exit codes through [`Error::exit_code`].

use std::{io, path::PathBuf};

use serde::Serialize;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Core error type for coordination operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Lock acquisition did not succeed within the timeout window.
    #[error("timed out after {waited_ms}ms waiting for lock '{resource}'")]
    LockTimeout { resource: String, waited_ms: u64 },

    /// Release attempted by a process that does not hold the lock.
    #[error("lock '{resource}' is not held by this process (holder: {})", describe_holder(.holder))]
    LockNotOwned {
        resource: String,
        holder: Option<u32>,
    },

    /// Optimistic-concurrency check found a newer write than the baseline.
    #[error("conflict detected: {} changed since it was read", .path.display())]
    ConflictDetected { path: PathBuf },

    /// Commit could not acquire its locks, or an apply step failed.
    #[error("transaction {id} failed: {reason}")]
    TransactionFailed { id: String, reason: String },

    /// Queue sequence counter missing, unreadable or corrupt.
    #[error("sequence error for agent '{agent}': {reason}")]
    SequenceError { agent: String, reason: String },

    /// Generic filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Configuration value out of range or unparseable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller-supplied input rejected before touching the filesystem.
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Closed set of status codes surfaced to the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LockTimeout,
    LockNotOwned,
    ConflictDetected,
    TransactionFailed,
    SequenceError,
    IoFailure,
    InvalidConfig,
    ValidationFailed,
}

impl Error {
    /// Wrap an IO error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Status code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::LockNotOwned { .. } => ErrorCode::LockNotOwned,
            Self::ConflictDetected { .. } => ErrorCode::ConflictDetected,
            Self::TransactionFailed { .. } => ErrorCode::TransactionFailed,
            Self::SequenceError { .. } => ErrorCode::SequenceError,
            Self::Io { .. } => ErrorCode::IoFailure,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::Validation(_) => ErrorCode::ValidationFailed,
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// - 1: validation or configuration
    /// - 2: filesystem failure
    /// - 3: lock timeout
    /// - 4: conflict detected
    /// - 5: transaction failed
    /// - 6: sequence error
    /// - 7: lock not owned
    pub const fn exit_code(&self) -> i32 {
        match self.code() {
            ErrorCode::InvalidConfig | ErrorCode::ValidationFailed => 1,
            ErrorCode::IoFailure => 2,
            ErrorCode::LockTimeout => 3,
            ErrorCode::ConflictDetected => 4,
            ErrorCode::TransactionFailed => 5,
            ErrorCode::SequenceError => 6,
            ErrorCode::LockNotOwned => 7,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::LockTimeout | ErrorCode::ConflictDetected | ErrorCode::TransactionFailed
        )
    }
}

fn describe_holder(holder: &Option<u32>) -> String {
    holder.map_or_else(|| "none".to_string(), |pid| format!("pid {pid}"))
}

/// Result type alias for burrow-core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let errors = [
            Error::validation("bad"),
            Error::io("read", io::Error::other("disk")),
            Error::LockTimeout {
                resource: "r".into(),
                waited_ms: 10,
            },
            Error::ConflictDetected {
                path: PathBuf::from("a"),
            },
            Error::TransactionFailed {
                id: "tx".into(),
                reason: "locks".into(),
            },
            Error::SequenceError {
                agent: "a".into(),
                reason: "corrupt".into(),
            },
            Error::LockNotOwned {
                resource: "r".into(),
                holder: None,
            },
        ];
        let codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::LockTimeout.to_string(), "LOCK_TIMEOUT");
        assert_eq!(ErrorCode::IoFailure.as_ref(), "IO_FAILURE");
    }

    #[test]
    fn test_lock_not_owned_message_names_holder() {
        let err = Error::LockNotOwned {
            resource: "queue_a".into(),
            holder: Some(42),
        };
        assert!(err.to_string().contains("pid 42"));

        let err = Error::LockNotOwned {
            resource: "queue_a".into(),
            holder: None,
        };
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::ConflictDetected {
            path: PathBuf::from("x")
        }
        .is_retryable());
        assert!(!Error::validation("x").is_retryable());
    }
}
