//! Questionnaire Consistency Engine
//!
//! Keeps an authored questionnaire and its responses consistent under
//! concurrent edits: screen and question orders stay contiguous, conditional
//! questions appear and disappear as their parents are answered, and every
//! write is guarded by an optimistic-concurrency token.
//!
//! # Architecture
//!
//! - **Snapshot in, batch out**: each operation reads one questionnaire
//!   snapshot and commits one atomic `WriteBatch` with version expectations
//! - **Single source of order integers**: only the `SequenceAllocator` computes
//!   positions
//! - **Explicit dependency graph**: parent/child links live in an adjacency
//!   index built per operation, not in object references
//! - **Pluggable persistence**: anything implementing `QuestionnaireStore`
//!
//! # Modules
//!
//! - [`models`] - Entities, answer values and projections
//! - [`db`] - Store boundary, in-memory backend, sequence allocator, events
//! - [`operations`] - Request parameters, preconditions and `EngineError`
//! - [`services`] - Resolver, visibility, tokens, pipeline and the services
//! - [`config`] - `EngineConfig`
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::{DomainEvent, InMemoryStore, QuestionnaireStore};
pub use models::*;
pub use operations::{EngineError, ErrorClass, Precondition};
pub use services::{AuthoringService, QuestionnaireEngine, ResponseService};
