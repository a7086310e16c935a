//! Engine Services
//!
//! - `resolver` - canonical value of a stored answer
//! - `visibility` - visibility rule, dependency graph, subtree delta
//! - `tokens` - concurrency tokens
//! - `pipeline` - mutation state machine
//! - `AuthoringService` - structural writes (screens, questions, options, links)
//! - `ResponseService` - answer writes and filtered screen reads
//!
//! Services read through and commit to a [`crate::db::QuestionnaireStore`];
//! they hold no state of their own beyond the shared [`ServiceContext`].

pub mod authoring_service;
mod context;
mod engine;
pub mod pipeline;
pub mod resolver;
pub mod response_service;
pub mod tokens;
pub mod visibility;

pub use authoring_service::AuthoringService;
pub use context::ServiceContext;
pub use engine::QuestionnaireEngine;
pub use pipeline::{MutationPipeline, PipelineState};
pub use resolver::{canonicalize_visible_if, resolve, ResolutionError, Resolved};
pub use response_service::ResponseService;
pub use tokens::{TokenError, TokenManager, Versioned};
pub use visibility::{
    check_parent_link, index_answers, is_visible, recompute_subtree, AnswerIndex, QuestionGraph,
    VisibilityEvaluator,
};
