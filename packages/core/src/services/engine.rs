//! Engine facade

use crate::config::EngineConfig;
use crate::db::{DomainEvent, QuestionnaireStore};
use crate::services::{AuthoringService, ResponseService, ServiceContext};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Authoring and response services wired to one store and event channel
///
/// # Examples
///
/// ```rust
/// # use questionnaire_core::{EngineConfig, InMemoryStore, QuestionnaireEngine};
/// # use std::sync::Arc;
/// let engine = QuestionnaireEngine::new(Arc::new(InMemoryStore::new()), EngineConfig::default());
/// let mut events = engine.subscribe_to_events();
/// # let _ = &mut events;
/// ```
#[derive(Clone)]
pub struct QuestionnaireEngine {
    pub authoring: AuthoringService,
    pub responses: ResponseService,
    ctx: ServiceContext,
}

impl QuestionnaireEngine {
    pub fn new(store: Arc<dyn QuestionnaireStore>, config: EngineConfig) -> Self {
        let ctx = ServiceContext::new(store, config);
        Self {
            authoring: AuthoringService::new(ctx.clone()),
            responses: ResponseService::new(ctx.clone()),
            ctx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.ctx.config()
    }

    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.ctx.subscribe_to_events()
    }
}
