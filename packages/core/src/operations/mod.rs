//! Operation Types
//!
//! Request parameters for every engine write, plus the error taxonomy. The
//! request-handling layer builds these after schema validation; the engine
//! still enforces its own preconditions (tokens, keys, positions, visibility rules)
//! itself before anything is persisted.

pub mod error;

pub use error::{EngineError, ErrorClass};

use crate::models::{AnswerKind, AnswerValue};
use serde::{Deserialize, Serialize};

/// Parameters for creating a questionnaire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestionnaireParams {
    pub title: String,
}

/// Parameters for creating a screen
///
/// `proposed_position` is a hint in `1..=N+1`; `None` appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScreenParams {
    pub title: String,
    #[serde(default)]
    pub proposed_position: Option<i64>,
}

/// Rename and/or reposition a screen; at least one field must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScreenParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub proposed_position: Option<i64>,
}

/// Parameters for creating a question on a screen
///
/// Leaving `answer_kind` empty creates a scaffold question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestionParams {
    pub question_text: String,
    #[serde(default)]
    pub answer_kind: Option<AnswerKind>,
    #[serde(default)]
    pub proposed_position: Option<i64>,
}

/// Content update for a question
///
/// `answer_kind` may only be supplied while the question is still a scaffold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateQuestionParams {
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub answer_kind: Option<AnswerKind>,
}

impl UpdateQuestionParams {
    pub fn is_empty(&self) -> bool {
        self.question_text.is_none() && self.answer_kind.is_none()
    }
}

/// Move a question to another screen (or within its own)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveQuestionParams {
    pub target_screen_id: String,
    #[serde(default)]
    pub proposed_position: Option<i64>,
}

/// Link a question to a visibility parent
///
/// `visible_if_value` is the raw JSON from the request (scalar or array); the
/// engine canonicalizes it against the parent's answer kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVisibilityParams {
    pub parent_question_id: String,
    pub visible_if_value: serde_json::Value,
}

/// Add a selectable option to an `enum_single` question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAnswerOptionParams {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Write one answer into a response set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteAnswerParams {
    pub response_set_id: String,
    pub question_id: String,
    pub value: AnswerValue,
}

/// Request preconditions supplied by the request-handling layer
///
/// Updates carry `if_match`; creates carry `idempotency_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    #[serde(default)]
    pub if_match: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl Precondition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn if_match(token: impl Into<String>) -> Self {
        Self {
            if_match: Some(token.into()),
            idempotency_key: None,
        }
    }

    pub fn idempotency_key(key: impl Into<String>) -> Self {
        Self {
            if_match: None,
            idempotency_key: Some(key.into()),
        }
    }
}
