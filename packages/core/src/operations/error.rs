//! Error types for the questionnaire engine
//!
//! Every abort surfaces exactly one [`EngineError`]. Variants are grouped into
//! the three classes reported by [`EngineError::class`]; the class is for
//! observability only, control flow is identical for all of them.

use crate::db::{DatabaseError, OrderingError};
use crate::models::ValidationError;
use thiserror::Error;

/// Broad error class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Detected before any persistence write; no side effects
    Precondition,
    /// Failure mid-pipeline; nothing from this operation was committed
    Runtime,
    /// Store unreachable or misconfigured
    Environment,
}

/// Errors that abort an engine operation
///
/// # Examples
///
/// ```rust
/// use questionnaire_core::operations::{EngineError, ErrorClass};
///
/// let err = EngineError::stale_token("question", "q-1");
/// assert_eq!(err.class(), ErrorClass::Precondition);
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// Referenced entity does not exist (or belongs to another questionnaire)
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Update without an If-Match token
    #[error("Missing concurrency token for {entity} '{id}'")]
    MissingToken { entity: String, id: String },

    /// Token is not something this engine could have issued
    #[error("Malformed concurrency token for {entity} '{id}'")]
    MalformedToken { entity: String, id: String },

    /// Token does not match the current version (someone else wrote first)
    #[error("Stale concurrency token for {entity} '{id}'")]
    StaleToken { entity: String, id: String },

    /// Create without a deduplication key
    #[error("Missing idempotency key for {operation}")]
    MissingIdempotencyKey { operation: String },

    /// Idempotency key was already used for a different kind of entity
    #[error("Idempotency key '{key}' was used for a different operation")]
    IdempotencyKeyReused { key: String },

    /// Proposed position outside the allowed range
    #[error("Invalid position: {0}")]
    InvalidPosition(OrderingError),

    /// Screen titles are unique per questionnaire
    #[error("Screen title '{title}' already exists in this questionnaire")]
    DuplicateTitle { title: String },

    /// Answer option values are unique per question
    #[error("Option value '{value}' already exists on question '{question_id}'")]
    DuplicateOption { question_id: String, value: String },

    /// A question cannot be its own visibility parent
    #[error("Question '{question_id}' cannot be its own parent")]
    SelfReference { question_id: String },

    /// The proposed parent link would close a cycle (or the chain is too deep)
    #[error("Parent '{parent_id}' would create a cycle for question '{question_id}'")]
    CycleDetected {
        question_id: String,
        parent_id: String,
    },

    /// `visible_if_value` outside the parent's canonical domain
    #[error("Non-canonical visible_if_value: {reason}")]
    NonCanonicalVisibleIf { reason: String },

    /// `answer_kind` is set at most once
    #[error("Answer kind of question '{question_id}' is already '{current}' and cannot change")]
    AnswerKindLocked { question_id: String, current: String },

    /// Answer value does not fit the question's answer kind
    #[error("Answer for question '{question_id}' is incompatible: {reason}")]
    IncompatibleAnswer { question_id: String, reason: String },

    /// Stored answer could not be resolved to a canonical value
    #[error("Cannot resolve answer for question '{question_id}': {reason}")]
    Resolution { question_id: String, reason: String },

    /// Request field failed schema-level validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Sequence computation produced an invalid result
    #[error("Reindex failed: {0}")]
    Reindex(String),

    /// Store rejected or failed a read/commit
    #[error("Persistence failed: {0}")]
    Persistence(DatabaseError),

    /// Store unreachable
    #[error("Environment error: {0}")]
    Environment(String),

    /// Orchestrator misuse; indicates a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn missing_token(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::MissingToken {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn malformed_token(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::MalformedToken {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn stale_token(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::StaleToken {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn missing_idempotency_key(operation: impl Into<String>) -> Self {
        Self::MissingIdempotencyKey {
            operation: operation.into(),
        }
    }

    pub fn non_canonical(reason: impl Into<String>) -> Self {
        Self::NonCanonicalVisibleIf {
            reason: reason.into(),
        }
    }

    pub fn incompatible_answer(question_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleAnswer {
            question_id: question_id.into(),
            reason: reason.into(),
        }
    }

    pub fn resolution(question_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            question_id: question_id.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::NotFound { .. }
            | EngineError::MissingToken { .. }
            | EngineError::MalformedToken { .. }
            | EngineError::StaleToken { .. }
            | EngineError::MissingIdempotencyKey { .. }
            | EngineError::IdempotencyKeyReused { .. }
            | EngineError::InvalidPosition(_)
            | EngineError::DuplicateTitle { .. }
            | EngineError::DuplicateOption { .. }
            | EngineError::SelfReference { .. }
            | EngineError::CycleDetected { .. }
            | EngineError::NonCanonicalVisibleIf { .. }
            | EngineError::AnswerKindLocked { .. }
            | EngineError::IncompatibleAnswer { .. }
            | EngineError::Validation(_) => ErrorClass::Precondition,
            EngineError::Environment(_) => ErrorClass::Environment,
            EngineError::Resolution { .. }
            | EngineError::Reindex(_)
            | EngineError::Persistence(_)
            | EngineError::Internal(_) => ErrorClass::Runtime,
        }
    }

    /// True for both the up-front token check and a lost commit race
    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::StaleToken { .. })
    }
}

impl From<OrderingError> for EngineError {
    fn from(err: OrderingError) -> Self {
        match err {
            OrderingError::OutOfRange { .. } => EngineError::InvalidPosition(err),
            other => EngineError::Reindex(other.to_string()),
        }
    }
}

impl From<DatabaseError> for EngineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::VersionMismatch { entity, id, .. } => EngineError::StaleToken { entity, id },
            DatabaseError::IdempotencyConflict { key } => EngineError::IdempotencyKeyReused { key },
            DatabaseError::Unavailable(msg) => EngineError::Environment(msg),
            other => EngineError::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_token_message_and_class() {
        let err = EngineError::stale_token("screen", "s-1");
        assert_eq!(format!("{}", err), "Stale concurrency token for screen 's-1'");
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(err.is_stale());
    }

    #[test]
    fn test_out_of_range_maps_to_invalid_position() {
        let err: EngineError = OrderingError::OutOfRange {
            proposed: 9,
            max: 3,
        }
        .into();
        assert!(matches!(err, EngineError::InvalidPosition(_)));
        assert_eq!(
            format!("{}", err),
            "Invalid position: Proposed position 9 is outside 1..=3"
        );
    }

    #[test]
    fn test_unknown_member_maps_to_reindex_failure() {
        let err: EngineError = OrderingError::UnknownMember {
            id: "q".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::Reindex(_)));
        assert_eq!(err.class(), ErrorClass::Runtime);
    }

    #[test]
    fn test_commit_race_maps_to_stale_token() {
        let err: EngineError = DatabaseError::version_mismatch("question", "q-1", 2, 3).into();
        assert!(err.is_stale());
    }

    #[test]
    fn test_unavailable_store_is_environment_error() {
        let err: EngineError = DatabaseError::unavailable("connection refused").into();
        assert_eq!(err.class(), ErrorClass::Environment);
    }

    #[test]
    fn test_validation_error_is_precondition() {
        let err: EngineError = ValidationError::EmptyUpdate.into();
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert_eq!(format!("{}", err), "Validation error: Update contains no changes");
    }
}
