//! Canonical Value Resolver
//!
//! Maps a stored answer to the single value visibility rules compare against,
//! and canonicalizes authored `visible_if_value`s into the same domain. Both
//! directions dispatch on [`AnswerKind`] with one `match`.

use crate::models::{
    Answer, AnswerKind, AnswerOption, AnswerValue, CanonicalValue, Question, VisibleIfValue,
};
use crate::operations::EngineError;
use serde_json::Value;
use thiserror::Error;

/// Why a stored answer has no canonical value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("question has no answer kind")]
    NoAnswerKind,

    #[error("expected a {expected} value, found {found}")]
    KindMismatch {
        expected: AnswerKind,
        found: &'static str,
    },

    #[error("option '{option_id}' does not belong to the question")]
    UnknownOption { option_id: String },

    #[error("number is not finite")]
    NonFinite,
}

/// Result of resolving a question's stored answer
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(CanonicalValue),
    Unanswered,
}

fn value_shape(value: &AnswerValue) -> &'static str {
    match value {
        AnswerValue::OptionId(_) => "option_id",
        AnswerValue::Bool(_) => "value_bool",
        AnswerValue::Number(_) => "value_number",
        AnswerValue::Text(_) => "value_text",
    }
}

/// Resolve `answer` (if any) for `question` to its canonical value.
///
/// No stored answer is `Unanswered`, not an error.
pub fn resolve(
    question: &Question,
    options: &[&AnswerOption],
    answer: Option<&Answer>,
) -> Result<Resolved, ResolutionError> {
    let Some(answer) = answer else {
        return Ok(Resolved::Unanswered);
    };
    let kind = question.answer_kind.ok_or(ResolutionError::NoAnswerKind)?;

    let canonical = match (kind, &answer.value) {
        (AnswerKind::EnumSingle, AnswerValue::OptionId(option_id)) => {
            let option = options
                .iter()
                .find(|o| &o.option_id == option_id && o.question_id == question.question_id)
                .ok_or_else(|| ResolutionError::UnknownOption {
                    option_id: option_id.clone(),
                })?;
            CanonicalValue::Text(option.value.clone())
        }
        (AnswerKind::Boolean, AnswerValue::Bool(b)) => CanonicalValue::Bool(*b),
        (AnswerKind::Number, AnswerValue::Number(n)) => {
            if !n.is_finite() {
                return Err(ResolutionError::NonFinite);
            }
            CanonicalValue::Number(*n)
        }
        (AnswerKind::ShortString | AnswerKind::LongText, AnswerValue::Text(text)) => {
            CanonicalValue::Text(text.trim().to_string())
        }
        (expected, other) => {
            return Err(ResolutionError::KindMismatch {
                expected,
                found: value_shape(other),
            })
        }
    };
    Ok(Resolved::Value(canonical))
}

/// Canonicalize an authored `visible_if_value` against the parent's domain.
///
/// Accepts a scalar or a non-empty array. Booleans take `true`/`false` (or the
/// strings `"true"`/`"false"`), numbers take any finite number or numeric
/// string, `enum_single` takes an existing option value, text kinds take any
/// non-blank string (trimmed). Duplicates in an array collapse.
pub fn canonicalize_visible_if(
    parent: &Question,
    parent_options: &[&AnswerOption],
    raw: &Value,
) -> Result<VisibleIfValue, EngineError> {
    let kind = parent.answer_kind.ok_or_else(|| {
        EngineError::non_canonical(format!(
            "parent question '{}' has no answer kind yet",
            parent.question_id
        ))
    })?;

    match raw {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(EngineError::non_canonical("value set is empty"));
            }
            let mut values: Vec<CanonicalValue> = Vec::with_capacity(items.len());
            for item in items {
                let value = canonical_scalar(kind, parent_options, item)?;
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            Ok(VisibleIfValue::AnyOf(values))
        }
        scalar => Ok(VisibleIfValue::One(canonical_scalar(
            kind,
            parent_options,
            scalar,
        )?)),
    }
}

fn canonical_scalar(
    kind: AnswerKind,
    options: &[&AnswerOption],
    raw: &Value,
) -> Result<CanonicalValue, EngineError> {
    match (kind, raw) {
        (AnswerKind::Boolean, Value::Bool(b)) => Ok(CanonicalValue::Bool(*b)),
        (AnswerKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Ok(CanonicalValue::Bool(true)),
            "false" => Ok(CanonicalValue::Bool(false)),
            _ => Err(EngineError::non_canonical(format!(
                "'{}' is not a boolean",
                s
            ))),
        },
        (AnswerKind::Number, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(CanonicalValue::Number)
            .ok_or_else(|| EngineError::non_canonical(format!("{} is not a finite number", n))),
        (AnswerKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(CanonicalValue::Number)
            .ok_or_else(|| EngineError::non_canonical(format!("'{}' is not a finite number", s))),
        (AnswerKind::EnumSingle, Value::String(s)) => {
            if options.iter().any(|o| &o.value == s) {
                Ok(CanonicalValue::Text(s.clone()))
            } else {
                Err(EngineError::non_canonical(format!(
                    "'{}' is not an option value of the parent",
                    s
                )))
            }
        }
        (AnswerKind::ShortString | AnswerKind::LongText, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(EngineError::non_canonical("text value is blank"));
            }
            Ok(CanonicalValue::Text(trimmed.to_string()))
        }
        (kind, other) => Err(EngineError::non_canonical(format!(
            "{} is not a valid {} value",
            other, kind
        ))),
    }
}
