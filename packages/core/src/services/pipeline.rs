//! Mutation Orchestrator
//!
//! Every engine write walks the same state machine:
//!
//! ```text
//! Validated -> Persisted -> [Reindexed] -> [Reevaluated] -> Tokenized -> Responded
//!      \___________\______________\______________\______________\______-> Aborted
//! ```
//!
//! Steps before `Responded` only stage rows into a [`WriteBatch`]; the store
//! sees nothing until the final transition commits the whole batch. A failing
//! step therefore leaves no trace in storage, and a commit that loses a
//! version race aborts as a stale token.

use crate::db::{QuestionnaireStore, WriteBatch};
use crate::operations::EngineError;
use std::fmt;
use tracing::{debug, info, warn};

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Validated,
    Persisted,
    Reindexed,
    Reevaluated,
    Tokenized,
    Responded,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Validated => "validated",
            PipelineState::Persisted => "persisted",
            PipelineState::Reindexed => "reindexed",
            PipelineState::Reevaluated => "reevaluated",
            PipelineState::Tokenized => "tokenized",
            PipelineState::Responded => "responded",
            PipelineState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Responded | PipelineState::Aborted)
    }

    /// Forward edges of the state machine; `Aborted` is handled separately
    fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Validated, Persisted)
                | (Persisted, Reindexed)
                | (Persisted, Reevaluated)
                | (Persisted, Tokenized)
                | (Reindexed, Reevaluated)
                | (Reindexed, Tokenized)
                | (Reevaluated, Tokenized)
                | (Tokenized, Responded)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight mutation
#[derive(Debug)]
pub struct MutationPipeline {
    operation: &'static str,
    state: PipelineState,
    batch: WriteBatch,
    trail: Vec<PipelineState>,
}

impl MutationPipeline {
    /// Enter the machine with a request whose schema, tokens and keys are
    /// already checked
    pub fn validated(operation: &'static str) -> Self {
        debug!("{}: entering pipeline as validated", operation);
        Self {
            operation,
            state: PipelineState::Validated,
            batch: WriteBatch::new(),
            trail: vec![PipelineState::Validated],
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// States visited so far, in order
    pub fn trail(&self) -> &[PipelineState] {
        &self.trail
    }

    /// Rows staged so far
    pub fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Stage the primary writes
    pub fn persist<T, F>(&mut self, stage: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut WriteBatch) -> Result<T, EngineError>,
    {
        self.step(PipelineState::Persisted, stage)
    }

    /// Stage order assignments produced by the allocator
    pub fn reindex<T, F>(&mut self, stage: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut WriteBatch) -> Result<T, EngineError>,
    {
        self.step(PipelineState::Reindexed, stage)
    }

    /// Re-derive visibility against the staged state
    pub fn reevaluate<T, F>(&mut self, evaluate: F) -> Result<T, EngineError>
    where
        F: FnOnce(&WriteBatch) -> Result<T, EngineError>,
    {
        self.step(PipelineState::Reevaluated, |batch| evaluate(batch))
    }

    /// Compute the tokens the response will carry
    pub fn tokenize<T, F>(&mut self, compute: F) -> Result<T, EngineError>
    where
        F: FnOnce(&WriteBatch) -> Result<T, EngineError>,
    {
        self.step(PipelineState::Tokenized, |batch| compute(batch))
    }

    /// Commit the staged batch and finish
    pub async fn respond(&mut self, store: &dyn QuestionnaireStore) -> Result<(), EngineError> {
        self.enter(PipelineState::Responded)?;

        let batch = std::mem::take(&mut self.batch);
        let writes = batch.writes.len();
        if let Err(err) = store.commit(batch).await {
            return Err(self.abort(EngineError::from(err)));
        }

        self.mark(PipelineState::Responded);
        info!("{}: committed {} write(s)", self.operation, writes);
        Ok(())
    }

    /// Move to `Aborted`, dropping anything staged, and hand the cause back
    pub fn abort(&mut self, cause: EngineError) -> EngineError {
        if self.state != PipelineState::Aborted {
            warn!(
                "{}: aborted in state {} ({:?}): {}",
                self.operation,
                self.state,
                cause.class(),
                cause
            );
            self.batch = WriteBatch::new();
            self.mark(PipelineState::Aborted);
        }
        cause
    }

    fn step<T, F>(&mut self, next: PipelineState, action: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut WriteBatch) -> Result<T, EngineError>,
    {
        self.enter(next)?;
        match action(&mut self.batch) {
            Ok(value) => {
                self.mark(next);
                Ok(value)
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    fn enter(&mut self, next: PipelineState) -> Result<(), EngineError> {
        if !self.state.can_advance_to(next) {
            let err = EngineError::internal(format!(
                "{}: illegal transition {} -> {}",
                self.operation, self.state, next
            ));
            return Err(self.abort(err));
        }
        Ok(())
    }

    fn mark(&mut self, next: PipelineState) {
        debug!("{}: {} -> {}", self.operation, self.state, next);
        self.state = next;
        self.trail.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EntityRef, InMemoryStore, RecordWrite};
    use crate::models::Questionnaire;

    fn stage_questionnaire(batch: &mut WriteBatch) -> Result<String, EngineError> {
        let questionnaire = Questionnaire::new("Survey".to_string());
        let id = questionnaire.questionnaire_id.clone();
        batch
            .expect(EntityRef::questionnaire(&id), 0)
            .put(RecordWrite::Questionnaire(questionnaire));
        Ok(id)
    }

    #[tokio::test]
    async fn test_full_path_commits_once() {
        let store = InMemoryStore::new();
        let mut pipeline = MutationPipeline::validated("create_questionnaire");

        let id = pipeline.persist(stage_questionnaire).unwrap();
        pipeline.tokenize(|_| Ok(())).unwrap();
        pipeline.respond(&store).await.unwrap();

        assert_eq!(
            pipeline.trail(),
            &[
                PipelineState::Validated,
                PipelineState::Persisted,
                PipelineState::Tokenized,
                PipelineState::Responded
            ]
        );
        assert!(store.load_questionnaire(&id).await.unwrap().is_some());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_aborts_without_writes() {
        let store = InMemoryStore::new();
        let mut pipeline = MutationPipeline::validated("create_screen");

        pipeline.persist(stage_questionnaire).unwrap();
        let err = pipeline
            .reindex::<(), _>(|_| Err(EngineError::Reindex("boom".to_string())))
            .unwrap_err();

        assert!(matches!(err, EngineError::Reindex(_)));
        assert_eq!(pipeline.state(), PipelineState::Aborted);
        assert!(pipeline.batch().is_empty());

        // Nothing after an abort is attempted
        assert!(pipeline.tokenize(|_| Ok(())).is_err());
        assert!(pipeline.respond(&store).await.is_err());
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn test_illegal_transition_is_internal_error() {
        let mut pipeline = MutationPipeline::validated("update_question");
        let err = pipeline.tokenize(|_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
        assert_eq!(pipeline.state(), PipelineState::Aborted);
    }

    #[test]
    fn test_conditional_steps_may_be_skipped() {
        assert!(PipelineState::Persisted.can_advance_to(PipelineState::Tokenized));
        assert!(PipelineState::Persisted.can_advance_to(PipelineState::Reevaluated));
        assert!(PipelineState::Reindexed.can_advance_to(PipelineState::Tokenized));
        assert!(!PipelineState::Reevaluated.can_advance_to(PipelineState::Reindexed));
        assert!(!PipelineState::Validated.can_advance_to(PipelineState::Responded));
        assert!(!PipelineState::Responded.can_advance_to(PipelineState::Tokenized));
    }

    #[tokio::test]
    async fn test_commit_failure_aborts() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let mut pipeline = MutationPipeline::validated("create_questionnaire");

        pipeline.persist(stage_questionnaire).unwrap();
        pipeline.tokenize(|_| Ok(())).unwrap();
        let err = pipeline.respond(&store).await.unwrap_err();

        assert!(matches!(err, EngineError::Environment(_)));
        assert_eq!(pipeline.state(), PipelineState::Aborted);
    }
}
