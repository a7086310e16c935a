//! Answers and canonical comparison values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed value held by a stored answer.
///
/// Serialized externally tagged with the storage column names, e.g.
/// `{"value_bool": true}` or `{"option_id": "opt-1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnswerValue {
    #[serde(rename = "option_id")]
    OptionId(String),
    #[serde(rename = "value_bool")]
    Bool(bool),
    #[serde(rename = "value_number")]
    Number(f64),
    #[serde(rename = "value_text")]
    Text(String),
}

/// One answer per (response set, question)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response_set_id: String,
    pub question_id: String,
    pub value: AnswerValue,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Answer {
    pub fn new(response_set_id: String, question_id: String, value: AnswerValue) -> Self {
        Self {
            response_set_id,
            question_id,
            value,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Identifier used for version tokens and event payloads
    pub fn answer_key(&self) -> String {
        format!("{}/{}", self.response_set_id, self.question_id)
    }
}

/// Normalized comparison value derived from a stored answer.
///
/// Equality is strict per variant: booleans compare as booleans, numbers with
/// IEEE-754 `==` (so `10` equals `10.0`), text case-sensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalValue::Bool(b) => write!(f, "{}", b),
            CanonicalValue::Number(n) => write!(f, "{}", n),
            CanonicalValue::Text(t) => write!(f, "{:?}", t),
        }
    }
}

/// Visibility condition: a single canonical value or an unordered set of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisibleIfValue {
    One(CanonicalValue),
    AnyOf(Vec<CanonicalValue>),
}

impl VisibleIfValue {
    /// All accepted values; a scalar is a singleton set
    pub fn values(&self) -> &[CanonicalValue] {
        match self {
            VisibleIfValue::One(value) => std::slice::from_ref(value),
            VisibleIfValue::AnyOf(values) => values,
        }
    }

    /// Set membership, order irrelevant
    pub fn contains(&self, value: &CanonicalValue) -> bool {
        self.values().iter().any(|candidate| candidate == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_value_uses_column_names() {
        let value = serde_json::to_value(AnswerValue::Bool(true)).unwrap();
        assert_eq!(value, json!({"value_bool": true}));

        let parsed: AnswerValue = serde_json::from_value(json!({"option_id": "opt-9"})).unwrap();
        assert_eq!(parsed, AnswerValue::OptionId("opt-9".to_string()));
    }

    #[test]
    fn test_visible_if_scalar_is_singleton() {
        let rule: VisibleIfValue = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(rule, VisibleIfValue::One(CanonicalValue::Bool(true)));
        assert!(rule.contains(&CanonicalValue::Bool(true)));
        assert!(!rule.contains(&CanonicalValue::Bool(false)));
    }

    #[test]
    fn test_visible_if_set_membership_ignores_order() {
        let rule: VisibleIfValue = serde_json::from_value(json!(["b", "a"])).unwrap();
        assert!(rule.contains(&CanonicalValue::Text("a".to_string())));
        assert!(rule.contains(&CanonicalValue::Text("b".to_string())));
        assert!(!rule.contains(&CanonicalValue::Text("A".to_string())));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let rule: VisibleIfValue = serde_json::from_value(json!(10)).unwrap();
        assert!(rule.contains(&CanonicalValue::Number(10.0)));
        assert!(!rule.contains(&CanonicalValue::Text("10".to_string())));
    }
}
