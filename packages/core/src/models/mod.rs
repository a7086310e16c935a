//! Data Models
//!
//! This module contains the core data structures used throughout the engine:
//!
//! - `Questionnaire` / `Screen` - the container and its ordered screens
//! - `Question` / `AnswerOption` - ordered questions with optional visibility links
//! - `Answer` / `AnswerValue` - stored responses, one per (response set, question)
//! - `CanonicalValue` / `VisibleIfValue` - normalized comparison values
//! - Projections returned to the request-handling layer
//!
//! Models are plain records. Order integers and version counters are only ever
//! changed by the services layer.

mod answer;
mod projection;
mod question;
mod questionnaire;

pub use answer::{Answer, AnswerValue, CanonicalValue, VisibleIfValue};
pub use projection::{
    AnswerWriteResult, DeltaLists, EntityView, OptionView, QuestionProjection,
    QuestionnaireProjection, ResponseSetProjection, ScreenProjection, ScreenRead, TokenMap,
    VisibilityDelta, VisibleQuestion, WriteResult,
};
pub use question::{AnswerKind, AnswerOption, Question};
pub use questionnaire::{
    validate_id, validate_non_empty, Questionnaire, ResponseSet, Screen, ValidationError,
};
