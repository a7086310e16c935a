//! Concurrency tokens
//!
//! A token is the first 128 bits of `SHA-256(kind | id | version)`, hex
//! encoded. Every persisted mutation bumps the entity's version, so two
//! consecutive writes never share a token, and the same persisted state always
//! yields the same token.

use crate::db::EntityRef;
use crate::models::{Answer, Question, Questionnaire, ResponseSet, Screen};
use crate::operations::EngineError;
use sha2::{Digest, Sha256};
use thiserror::Error;

const TOKEN_HEX_LEN: usize = 32;

/// Why a supplied token was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token missing")]
    Missing,
    #[error("token malformed")]
    Malformed,
    #[error("token stale")]
    Stale,
}

impl TokenError {
    /// Attach the entity the token was checked against
    pub fn for_entity(self, entity: &EntityRef) -> EngineError {
        match self {
            TokenError::Missing => EngineError::missing_token(entity.kind(), entity.key()),
            TokenError::Malformed => EngineError::malformed_token(entity.kind(), entity.key()),
            TokenError::Stale => EngineError::stale_token(entity.kind(), entity.key()),
        }
    }
}

/// Entities that carry a concurrency token
pub trait Versioned {
    fn entity_ref(&self) -> EntityRef;
    fn version(&self) -> i64;
}

impl Versioned for Questionnaire {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::questionnaire(&self.questionnaire_id)
    }

    fn version(&self) -> i64 {
        self.version
    }
}

impl Versioned for Screen {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::screen(&self.screen_id)
    }

    fn version(&self) -> i64 {
        self.version
    }
}

impl Versioned for Question {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::question(&self.question_id)
    }

    fn version(&self) -> i64 {
        self.version
    }
}

impl Versioned for ResponseSet {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::response_set(&self.response_set_id)
    }

    fn version(&self) -> i64 {
        self.version
    }
}

impl Versioned for Answer {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::answer(&self.response_set_id, &self.question_id)
    }

    fn version(&self) -> i64 {
        self.version
    }
}

/// Computes and checks tokens
pub struct TokenManager;

impl TokenManager {
    pub fn token_for<E: Versioned>(entity: &E) -> String {
        Self::token_for_ref(&entity.entity_ref(), entity.version())
    }

    pub fn token_for_ref(entity: &EntityRef, version: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entity.kind().as_bytes());
        hasher.update(b"|");
        hasher.update(entity.key().as_bytes());
        hasher.update(b"|");
        hasher.update(version.to_be_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..TOKEN_HEX_LEN].to_string()
    }

    /// Check a client token against the current one.
    ///
    /// Accepts the bare token or an `If-Match` style quoted form (`"…"`, `W/"…"`).
    pub fn validate_precondition(supplied: Option<&str>, current: &str) -> Result<(), TokenError> {
        let supplied = match supplied.map(str::trim) {
            None | Some("") => return Err(TokenError::Missing),
            Some(raw) => Self::normalize(raw).ok_or(TokenError::Malformed)?,
        };
        if supplied != current {
            return Err(TokenError::Stale);
        }
        Ok(())
    }

    /// Validate `supplied` against the current token of `entity`
    pub fn require<E: Versioned>(supplied: Option<&str>, entity: &E) -> Result<(), EngineError> {
        let current = Self::token_for(entity);
        Self::validate_precondition(supplied, &current).map_err(|err| {
            let entity = entity.entity_ref();
            tracing::warn!("Rejected {} for {}", err, entity);
            err.for_entity(&entity)
        })
    }

    fn normalize(raw: &str) -> Option<&str> {
        let unweak = raw.strip_prefix("W/").unwrap_or(raw);
        let bare = unweak
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(unweak);
        let well_formed = bare.len() == TOKEN_HEX_LEN
            && bare
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then_some(bare)
    }
}
