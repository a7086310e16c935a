//! Database Error Types
//!
//! This module defines error types for the persistence collaborator, providing
//! clear error handling for availability, version-check and idempotency failures.

use thiserror::Error;

/// Persistence errors
///
/// `VersionMismatch` is the commit-time half of optimistic concurrency: the
/// engine checked the token up front, but another writer committed first.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    /// Store cannot be reached (or refused our credentials)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Expected version did not match the stored version at commit time
    #[error("Version mismatch for {entity} '{id}': expected {expected}, found {actual}")]
    VersionMismatch {
        entity: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// A partial write referenced a record that does not exist
    #[error("Record not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    /// An idempotency key was reused for a different kind of entity
    #[error("Idempotency key '{key}' already used for a different operation")]
    IdempotencyConflict { key: String },
}

impl DatabaseError {
    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a version mismatch error
    pub fn version_mismatch(
        entity: impl Into<String>,
        id: impl Into<String>,
        expected: i64,
        actual: i64,
    ) -> Self {
        Self::VersionMismatch {
            entity: entity.into(),
            id: id.into(),
            expected,
            actual,
        }
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_message() {
        let err = DatabaseError::version_mismatch("screen", "s-1", 3, 4);
        assert_eq!(
            format!("{}", err),
            "Version mismatch for screen 's-1': expected 3, found 4"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = DatabaseError::not_found("question", "q-9");
        assert_eq!(format!("{}", err), "Record not found: question 'q-9'");
    }
}
