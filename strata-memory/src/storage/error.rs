//! Storage Errors
//!
//! `TigerStyle`: Explicit error types with context.

use thiserror::Error;

/// Errors from tier store operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Record not found
    #[error("record not found: {id}")]
    NotFound {
        /// Id that was not found
        id: String,
    },

    /// Record already exists (write-once stores)
    #[error("record already exists: {id}")]
    AlreadyExists {
        /// Id that already exists
        id: String,
    },

    /// A flag transition lost a race: some records were already migrated
    #[error("conflict on {id}: {message}")]
    Conflict {
        /// First conflicting record id
        id: String,
        /// What was already true
        message: String,
    },

    /// Validation error
    #[error("validation error: {message}")]
    Validation {
        /// Validation error message
        message: String,
    },

    /// Connection error
    #[error("connection error: {message}")]
    Connection {
        /// Connection error message
        message: String,
    },

    /// Timeout error
    #[error("timeout after {duration_ms}ms")]
    Timeout {
        /// Duration in milliseconds
        duration_ms: u64,
    },

    /// Simulated fault (for DST)
    #[error("simulated fault: {fault_type}")]
    SimulatedFault {
        /// Type of simulated fault
        fault_type: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl StorageError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an already exists error.
    #[must_use]
    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a simulated fault error.
    #[must_use]
    pub fn simulated_fault(fault_type: impl Into<String>) -> Self {
        Self::SimulatedFault {
            fault_type: fault_type.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same call might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::SimulatedFault { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            StorageError::not_found("f-1").to_string(),
            "record not found: f-1"
        );
        assert_eq!(
            StorageError::conflict("f-1", "already consolidated").to_string(),
            "conflict on f-1: already consolidated"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(StorageError::connection("failed").is_transient());
        assert!(StorageError::timeout(1000).is_transient());
        assert!(StorageError::simulated_fault("write").is_transient());

        assert!(!StorageError::not_found("id").is_transient());
        assert!(!StorageError::conflict("id", "x").is_transient());
        assert!(!StorageError::validation("bad").is_transient());
    }
}
