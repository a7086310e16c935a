//! Domain Events
//!
//! Events are emitted by the services after a batch has committed, never
//! before, using tokio's broadcast channel so several subscribers (a
//! live-update forwarder, an audit log) can observe changes without coupling to
//! the store.

use crate::models::{
    QuestionProjection, QuestionnaireProjection, ScreenProjection, VisibilityDelta,
};
use serde::{Deserialize, Serialize};

/// Change notifications for committed writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    QuestionnaireCreated {
        questionnaire: QuestionnaireProjection,
    },
    ScreenCreated {
        questionnaire_id: String,
        screen: ScreenProjection,
    },
    ScreenUpdated {
        questionnaire_id: String,
        screen: ScreenProjection,
    },
    QuestionCreated {
        questionnaire_id: String,
        question: QuestionProjection,
    },
    QuestionUpdated {
        questionnaire_id: String,
        question: QuestionProjection,
    },
    QuestionMoved {
        questionnaire_id: String,
        from_screen_id: String,
        question: QuestionProjection,
    },
    AnswerSaved {
        response_set_id: String,
        question_id: String,
        delta: VisibilityDelta,
    },
}

impl DomainEvent {
    /// String form of the event type, for logging
    pub fn event_type(&self) -> &str {
        match self {
            DomainEvent::QuestionnaireCreated { .. } => "questionnaire:created",
            DomainEvent::ScreenCreated { .. } => "screen:created",
            DomainEvent::ScreenUpdated { .. } => "screen:updated",
            DomainEvent::QuestionCreated { .. } => "question:created",
            DomainEvent::QuestionUpdated { .. } => "question:updated",
            DomainEvent::QuestionMoved { .. } => "question:moved",
            DomainEvent::AnswerSaved { .. } => "answer:saved",
        }
    }
}
