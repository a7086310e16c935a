//! Projections returned to the request-handling layer
//!
//! These are the only shapes that leave the engine. Read projections carry no
//! rule metadata (`parent_question_id`, `visible_if_value`) and never include
//! hidden questions.

use super::answer::{AnswerValue, VisibleIfValue};
use super::question::{AnswerKind, AnswerOption, Question};
use super::questionnaire::{Questionnaire, ResponseSet, Screen};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireProjection {
    pub questionnaire_id: String,
    pub title: String,
}

impl From<&Questionnaire> for QuestionnaireProjection {
    fn from(questionnaire: &Questionnaire) -> Self {
        Self {
            questionnaire_id: questionnaire.questionnaire_id.clone(),
            title: questionnaire.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenProjection {
    pub screen_id: String,
    pub title: String,
    pub screen_order: u32,
}

impl From<&Screen> for ScreenProjection {
    fn from(screen: &Screen) -> Self {
        Self {
            screen_id: screen.screen_id.clone(),
            title: screen.title.clone(),
            screen_order: screen.screen_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionProjection {
    pub question_id: String,
    pub screen_id: String,
    pub question_text: String,
    pub answer_kind: Option<AnswerKind>,
    pub question_order: u32,
    pub parent_question_id: Option<String>,
    pub visible_if_value: Option<VisibleIfValue>,
}

impl From<&Question> for QuestionProjection {
    fn from(question: &Question) -> Self {
        Self {
            question_id: question.question_id.clone(),
            screen_id: question.screen_id.clone(),
            question_text: question.question_text.clone(),
            answer_kind: question.answer_kind,
            question_order: question.question_order,
            parent_question_id: question.parent_question_id.clone(),
            visible_if_value: question.visible_if_value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSetProjection {
    pub response_set_id: String,
    pub questionnaire_id: String,
}

impl From<&ResponseSet> for ResponseSetProjection {
    fn from(response_set: &ResponseSet) -> Self {
        Self {
            response_set_id: response_set.response_set_id.clone(),
            questionnaire_id: response_set.questionnaire_id.clone(),
        }
    }
}

/// Refreshed tokens for the entities a write actually touched.
///
/// A move reports the target screen under `screen` and the screen it left under
/// `source_screen`. Untouched entities are omitted, never sent as null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_screen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,
}

impl TokenMap {
    pub fn is_empty(&self) -> bool {
        self.question.is_none()
            && self.screen.is_none()
            && self.source_screen.is_none()
            && self.questionnaire.is_none()
    }
}

/// Result of an authoring write: one entity projection plus its token map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult<T> {
    pub entity: T,
    pub tokens: TokenMap,
    /// True when an idempotency key matched an earlier create and nothing was written
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

/// An entity together with its current concurrency token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView<T> {
    pub entity: T,
    pub etag: String,
}

/// Visibility diff produced by one answer change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityDelta {
    pub now_visible: Vec<String>,
    pub now_hidden: Vec<String>,
    /// Questions in `now_hidden` whose stored answer is retained but no longer shown
    pub suppressed: Vec<String>,
}

impl VisibilityDelta {
    pub fn is_empty(&self) -> bool {
        self.now_visible.is_empty() && self.now_hidden.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLists {
    pub now_visible: Vec<String>,
    pub now_hidden: Vec<String>,
}

/// Response envelope of an answer write.
///
/// `visibility_delta` is present only when some question changed visibility, and
/// `suppressed_answers` is present exactly when `visibility_delta` is. Identical
/// inputs therefore always produce identical key sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerWriteResult {
    pub saved: bool,
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_delta: Option<DeltaLists>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_answers: Option<Vec<String>>,
}

impl AnswerWriteResult {
    pub fn from_delta(etag: String, delta: VisibilityDelta) -> Self {
        if delta.is_empty() {
            return Self {
                saved: true,
                etag,
                visibility_delta: None,
                suppressed_answers: None,
            };
        }
        Self {
            saved: true,
            etag,
            visibility_delta: Some(DeltaLists {
                now_visible: delta.now_visible,
                now_hidden: delta.now_hidden,
            }),
            suppressed_answers: Some(delta.suppressed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionView {
    pub option_id: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl From<&AnswerOption> for OptionView {
    fn from(option: &AnswerOption) -> Self {
        Self {
            option_id: option.option_id.clone(),
            value: option.value.clone(),
            label: option.label.clone(),
        }
    }
}

/// A visible question on a screen read, with its current answer attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleQuestion {
    pub question_id: String,
    pub question_text: String,
    pub answer_kind: Option<AnswerKind>,
    pub question_order: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRead {
    pub screen_id: String,
    pub title: String,
    pub screen_order: u32,
    pub questions: Vec<VisibleQuestion>,
}
