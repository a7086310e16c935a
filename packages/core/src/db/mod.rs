//! Database Layer
//!
//! This module is the boundary to the persistence collaborator:
//!
//! - [`QuestionnaireStore`] - async trait the engine reads and commits through
//! - [`WriteBatch`] - atomic unit of work with commit-time version expectations
//! - [`InMemoryStore`] - reference backend
//! - [`SequenceAllocator`] - the only source of order integers
//! - [`DomainEvent`] - change notifications emitted after commit
//!
//! Storage technology is out of scope; any backend that can apply a
//! `WriteBatch` atomically can implement the trait.

mod error;
pub mod events;
mod memory_store;
pub mod sequence;
mod store;

pub use error::DatabaseError;
pub use events::DomainEvent;
pub use memory_store::InMemoryStore;
pub use sequence::{
    MovePlacement, OrderAssignment, OrderingError, Placement, SequenceAllocator, SequenceMember,
};
pub use store::{
    EntityRef, IdempotencyRecord, QuestionnaireSnapshot, QuestionnaireStore, RecordWrite,
    VersionExpectation, WriteBatch,
};
