//! QuestionnaireStore Trait - Persistence Collaborator Boundary
//!
//! The engine never talks to a database directly. It reads questionnaire-scoped
//! snapshots through [`QuestionnaireStore`] and hands every mutation back as one
//! [`WriteBatch`], which the store must apply atomically: either every
//! expectation holds and every write lands, or nothing changes.
//!
//! # Ordering columns
//!
//! `screen_order` and `question_order` are only written through
//! [`RecordWrite::ScreenOrder`] and [`RecordWrite::QuestionOrder`]. A plain
//! `Screen`/`Question` upsert of an existing record keeps the stored order, so a
//! concurrent content edit can never clobber a reindex.

use crate::db::DatabaseError;
use crate::models::{Answer, AnswerOption, Question, Questionnaire, ResponseSet, Screen};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a versioned record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Questionnaire { id: String },
    Screen { id: String },
    Question { id: String },
    AnswerOption { id: String },
    ResponseSet { id: String },
    Answer {
        response_set_id: String,
        question_id: String,
    },
}

impl EntityRef {
    pub fn questionnaire(id: impl Into<String>) -> Self {
        Self::Questionnaire { id: id.into() }
    }

    pub fn screen(id: impl Into<String>) -> Self {
        Self::Screen { id: id.into() }
    }

    pub fn question(id: impl Into<String>) -> Self {
        Self::Question { id: id.into() }
    }

    pub fn answer_option(id: impl Into<String>) -> Self {
        Self::AnswerOption { id: id.into() }
    }

    pub fn response_set(id: impl Into<String>) -> Self {
        Self::ResponseSet { id: id.into() }
    }

    pub fn answer(response_set_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self::Answer {
            response_set_id: response_set_id.into(),
            question_id: question_id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Questionnaire { .. } => "questionnaire",
            EntityRef::Screen { .. } => "screen",
            EntityRef::Question { .. } => "question",
            EntityRef::AnswerOption { .. } => "answer_option",
            EntityRef::ResponseSet { .. } => "response_set",
            EntityRef::Answer { .. } => "answer",
        }
    }

    /// Record key; answers are keyed `response_set_id/question_id`
    pub fn key(&self) -> String {
        match self {
            EntityRef::Questionnaire { id }
            | EntityRef::Screen { id }
            | EntityRef::Question { id }
            | EntityRef::AnswerOption { id }
            | EntityRef::ResponseSet { id } => id.clone(),
            EntityRef::Answer {
                response_set_id,
                question_id,
            } => format!("{}/{}", response_set_id, question_id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.key())
    }
}

/// Commit-time precondition: the record must currently be at `version`.
///
/// `version == 0` means the record must not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionExpectation {
    pub entity: EntityRef,
    pub version: i64,
}

/// One row-level write
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    Questionnaire(Questionnaire),
    Screen(Screen),
    ScreenOrder { screen_id: String, screen_order: u32 },
    Question(Question),
    QuestionOrder {
        question_id: String,
        screen_id: String,
        question_order: u32,
    },
    AnswerOption(AnswerOption),
    ResponseSet(ResponseSet),
    Answer(Answer),
}

/// Record of an earlier create, keyed by its deduplication key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub entity: EntityRef,
}

/// Unit of work handed to [`QuestionnaireStore::commit`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub expectations: Vec<VersionExpectation>,
    pub writes: Vec<RecordWrite>,
    pub idempotency: Option<IdempotencyRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `entity` to be at `version` when the batch commits
    pub fn expect(&mut self, entity: EntityRef, version: i64) -> &mut Self {
        self.expectations.push(VersionExpectation { entity, version });
        self
    }

    pub fn put(&mut self, write: RecordWrite) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn record_idempotency(&mut self, key: impl Into<String>, entity: EntityRef) -> &mut Self {
        self.idempotency = Some(IdempotencyRecord {
            key: key.into(),
            entity,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Everything the engine needs about one questionnaire, read in one go
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionnaireSnapshot {
    pub questionnaire: Questionnaire,
    pub screens: Vec<Screen>,
    pub questions: Vec<Question>,
    pub options: Vec<AnswerOption>,
}

impl QuestionnaireSnapshot {
    pub fn screen(&self, screen_id: &str) -> Option<&Screen> {
        self.screens.iter().find(|s| s.screen_id == screen_id)
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    /// Screens in `screen_order`
    pub fn ordered_screens(&self) -> Vec<&Screen> {
        let mut screens: Vec<&Screen> = self.screens.iter().collect();
        screens.sort_by(|a, b| {
            a.screen_order
                .cmp(&b.screen_order)
                .then_with(|| a.screen_id.cmp(&b.screen_id))
        });
        screens
    }

    /// Questions of one screen in `question_order`
    pub fn questions_on(&self, screen_id: &str) -> Vec<&Question> {
        let mut questions: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| q.screen_id == screen_id)
            .collect();
        questions.sort_by(|a, b| {
            a.question_order
                .cmp(&b.question_order)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        questions
    }

    pub fn options_for(&self, question_id: &str) -> Vec<&AnswerOption> {
        self.options
            .iter()
            .filter(|o| o.question_id == question_id)
            .collect()
    }
}

/// Abstraction over questionnaire persistence
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; many requests may use one store
/// concurrently. Cross-request ordering is provided only by the version
/// expectations checked inside [`QuestionnaireStore::commit`].
#[async_trait]
pub trait QuestionnaireStore: Send + Sync {
    /// Load a questionnaire with its screens, questions and options
    ///
    /// Returns `Ok(None)` if the questionnaire does not exist.
    async fn load_questionnaire(
        &self,
        questionnaire_id: &str,
    ) -> Result<Option<QuestionnaireSnapshot>, DatabaseError>;

    async fn get_response_set(
        &self,
        response_set_id: &str,
    ) -> Result<Option<ResponseSet>, DatabaseError>;

    /// All answers stored for a response set, including suppressed ones
    async fn load_answers(&self, response_set_id: &str) -> Result<Vec<Answer>, DatabaseError>;

    async fn get_answer(
        &self,
        response_set_id: &str,
        question_id: &str,
    ) -> Result<Option<Answer>, DatabaseError>;

    /// Look up an earlier create by its deduplication key
    async fn find_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, DatabaseError>;

    /// Apply a batch atomically
    ///
    /// # Errors
    ///
    /// - `VersionMismatch` if any expectation fails (nothing is written)
    /// - `IdempotencyConflict` if the batch's key was already recorded
    /// - `NotFound` if an order write targets a missing record
    /// - `Unavailable` if the backend cannot be reached
    async fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError>;
}
