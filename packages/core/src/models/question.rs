//! Question and AnswerOption records

use super::answer::VisibleIfValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of answer kinds.
///
/// A question's kind is set at most once; scaffold questions carry `None` until
/// their first placeholder allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    ShortString,
    LongText,
    Boolean,
    Number,
    EnumSingle,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerKind::ShortString => "short_string",
            AnswerKind::LongText => "long_text",
            AnswerKind::Boolean => "boolean",
            AnswerKind::Number => "number",
            AnswerKind::EnumSingle => "enum_single",
        }
    }
}

impl fmt::Display for AnswerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_string" => Ok(AnswerKind::ShortString),
            "long_text" => Ok(AnswerKind::LongText),
            "boolean" => Ok(AnswerKind::Boolean),
            "number" => Ok(AnswerKind::Number),
            "enum_single" => Ok(AnswerKind::EnumSingle),
            other => Err(format!("unknown answer kind '{}'", other)),
        }
    }
}

/// A question on a screen.
///
/// # Fields
///
/// - `question_order`: 1-based position within `screen_id`, owned by the screen's sequence
/// - `parent_question_id`: optional visibility parent (same questionnaire, acyclic)
/// - `visible_if_value`: canonical value(s) of the parent that make this question visible;
///   present iff `parent_question_id` is present
/// - `version`: optimistic concurrency counter, bumped on every persisted change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub questionnaire_id: String,
    pub screen_id: String,
    pub question_text: String,
    pub answer_kind: Option<AnswerKind>,
    pub question_order: u32,
    pub parent_question_id: Option<String>,
    pub visible_if_value: Option<VisibleIfValue>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Question {
    pub fn new(
        questionnaire_id: String,
        screen_id: String,
        question_text: String,
        answer_kind: Option<AnswerKind>,
        question_order: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            question_id: Uuid::new_v4().to_string(),
            questionnaire_id,
            screen_id,
            question_text,
            answer_kind,
            question_order,
            parent_question_id: None,
            visible_if_value: None,
            version: 1,
            created_at: now,
            modified_at: now,
        }
    }

    /// Root questions (no parent) are always visible
    pub fn is_root(&self) -> bool {
        self.parent_question_id.is_none()
    }

    /// Scaffold questions have not received an answer kind yet
    pub fn is_scaffold(&self) -> bool {
        self.answer_kind.is_none()
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.modified_at = Utc::now();
    }
}

/// Selectable option of an `enum_single` question.
///
/// `value` is the canonical token compared by visibility rules; it is unique per question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub option_id: String,
    pub question_id: String,
    pub value: String,
    pub label: Option<String>,
}

impl AnswerOption {
    pub fn new(question_id: String, value: String, label: Option<String>) -> Self {
        Self {
            option_id: Uuid::new_v4().to_string(),
            question_id,
            value,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_kind_wire_names() {
        let json = serde_json::to_string(&AnswerKind::EnumSingle).unwrap();
        assert_eq!(json, "\"enum_single\"");
        let parsed: AnswerKind = serde_json::from_str("\"long_text\"").unwrap();
        assert_eq!(parsed, AnswerKind::LongText);
    }

    #[test]
    fn test_answer_kind_from_str_rejects_unknown() {
        assert_eq!("boolean".parse::<AnswerKind>(), Ok(AnswerKind::Boolean));
        assert!("checkbox".parse::<AnswerKind>().is_err());
    }

    #[test]
    fn test_new_question_is_root_scaffold() {
        let q = Question::new(
            "qn".to_string(),
            "s1".to_string(),
            "Name?".to_string(),
            None,
            1,
        );
        assert!(q.is_root());
        assert!(q.is_scaffold());
        assert_eq!(q.version, 1);
    }
}
