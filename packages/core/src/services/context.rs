//! Shared plumbing for the engine services

use crate::config::EngineConfig;
use crate::db::{DomainEvent, EntityRef, QuestionnaireSnapshot, QuestionnaireStore};
use crate::models::validate_id;
use crate::operations::{EngineError, Precondition};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Store, configuration and event channel shared by the services
///
/// Cloning is cheap; clones publish to the same event channel.
#[derive(Clone)]
pub struct ServiceContext {
    store: Arc<dyn QuestionnaireStore>,
    config: Arc<EngineConfig>,
    event_tx: broadcast::Sender<DomainEvent>,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn QuestionnaireStore>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            store,
            config: Arc::new(config),
            event_tx,
        }
    }

    pub fn store(&self) -> &dyn QuestionnaireStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every [`DomainEvent`] emitted after this call
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors; having no subscribers is normal.
    pub(crate) fn emit_event(&self, event: DomainEvent) {
        tracing::debug!("Emitting {}", event.event_type());
        let _ = self.event_tx.send(event);
    }

    pub(crate) async fn load_snapshot(
        &self,
        questionnaire_id: &str,
    ) -> Result<QuestionnaireSnapshot, EngineError> {
        validate_id("questionnaire_id", questionnaire_id)?;
        self.store
            .load_questionnaire(questionnaire_id)
            .await?
            .ok_or_else(|| EngineError::not_found("questionnaire", questionnaire_id))
    }

    /// The create's deduplication key, trimmed.
    ///
    /// Errors when the key is required by configuration and absent.
    pub(crate) fn dedup_key(
        &self,
        operation: &str,
        precondition: &Precondition,
    ) -> Result<Option<String>, EngineError> {
        let key = precondition
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if key.is_none() && self.config.require_idempotency_key {
            return Err(EngineError::missing_idempotency_key(operation));
        }
        Ok(key)
    }

    /// Entity created by an earlier request carrying the same key
    pub(crate) async fn earlier_create(
        &self,
        key: Option<&str>,
    ) -> Result<Option<EntityRef>, EngineError> {
        let Some(key) = key else {
            return Ok(None);
        };
        let record = self.store.find_idempotency_key(key).await?;
        Ok(record.map(|r| r.entity))
    }
}

/// Reject a replayed key that points at a different kind of record
pub(crate) fn key_reused(key: Option<&str>) -> EngineError {
    EngineError::IdempotencyKeyReused {
        key: key.unwrap_or_default().to_string(),
    }
}
