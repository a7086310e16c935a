//! Questionnaire, Screen and ResponseSet records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for request fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid identifier format: {0}")]
    InvalidId(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Update contains no changes")]
    EmptyUpdate,
}

/// Trim `value` and reject it if nothing is left.
pub fn validate_non_empty(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Check an identifier supplied by a caller.
///
/// Identifiers are opaque but never blank and never contain whitespace or
/// control characters.
pub fn validate_id<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidId(format!("{} '{}'", field, value)));
    }
    Ok(value)
}

/// Top-level container for screens.
///
/// Its version is bumped whenever the screen list changes (create, rename,
/// reposition), so the questionnaire token guards `screen_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub questionnaire_id: String,
    pub title: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Questionnaire {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            questionnaire_id: Uuid::new_v4().to_string(),
            title,
            version: 1,
            created_at: now,
            modified_at: now,
        }
    }

    /// Record a persisted mutation: bump the version and the modification time
    pub fn touch(&mut self) {
        self.version += 1;
        self.modified_at = Utc::now();
    }
}

/// A screen within a questionnaire.
///
/// `screen_order` is owned by the questionnaire's sequence: the store never lets a
/// plain screen upsert change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub screen_id: String,
    pub questionnaire_id: String,
    pub title: String,
    pub screen_order: u32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Screen {
    pub fn new(questionnaire_id: String, title: String, screen_order: u32) -> Self {
        let now = Utc::now();
        Self {
            screen_id: Uuid::new_v4().to_string(),
            questionnaire_id,
            title,
            screen_order,
            version: 1,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.modified_at = Utc::now();
    }
}

/// A respondent's answer sheet for one questionnaire
///
/// Every answer write bumps `version`, so answer writes within one response set
/// commit one at a time against the answers they read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSet {
    pub response_set_id: String,
    pub questionnaire_id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ResponseSet {
    pub fn new(questionnaire_id: String) -> Self {
        let now = Utc::now();
        Self {
            response_set_id: Uuid::new_v4().to_string(),
            questionnaire_id,
            version: 1,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.modified_at = Utc::now();
    }
}
