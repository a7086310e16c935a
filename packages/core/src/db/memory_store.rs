//! In-memory QuestionnaireStore
//!
//! Reference backend used by tests, benchmarks and embedders that keep state
//! elsewhere. All state sits behind one `tokio::sync::RwLock`; `commit` holds
//! the write lock for the whole validate-then-apply pass, which is what makes a
//! batch atomic.

use crate::db::store::{
    EntityRef, IdempotencyRecord, QuestionnaireSnapshot, QuestionnaireStore, RecordWrite,
    WriteBatch,
};
use crate::db::DatabaseError;
use crate::models::{Answer, AnswerOption, Question, Questionnaire, ResponseSet, Screen};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    questionnaires: HashMap<String, Questionnaire>,
    screens: HashMap<String, Screen>,
    questions: HashMap<String, Question>,
    options: HashMap<String, AnswerOption>,
    response_sets: HashMap<String, ResponseSet>,
    answers: HashMap<(String, String), Answer>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

impl StoreState {
    fn current_version(&self, entity: &EntityRef) -> i64 {
        match entity {
            EntityRef::Questionnaire { id } => {
                self.questionnaires.get(id).map_or(0, |q| q.version)
            }
            EntityRef::Screen { id } => self.screens.get(id).map_or(0, |s| s.version),
            EntityRef::Question { id } => self.questions.get(id).map_or(0, |q| q.version),
            // Options are immutable once created
            EntityRef::AnswerOption { id } => i64::from(self.options.contains_key(id)),
            EntityRef::ResponseSet { id } => {
                self.response_sets.get(id).map_or(0, |r| r.version)
            }
            EntityRef::Answer {
                response_set_id,
                question_id,
            } => self
                .answers
                .get(&(response_set_id.clone(), question_id.clone()))
                .map_or(0, |a| a.version),
        }
    }

    fn validate(&self, batch: &WriteBatch) -> Result<(), DatabaseError> {
        if let Some(record) = &batch.idempotency {
            if self.idempotency.contains_key(&record.key) {
                return Err(DatabaseError::IdempotencyConflict {
                    key: record.key.clone(),
                });
            }
        }

        for expectation in &batch.expectations {
            let actual = self.current_version(&expectation.entity);
            if actual != expectation.version {
                return Err(DatabaseError::version_mismatch(
                    expectation.entity.kind(),
                    expectation.entity.key(),
                    expectation.version,
                    actual,
                ));
            }
        }

        let mut new_screens = HashSet::new();
        let mut new_questions = HashSet::new();
        for write in &batch.writes {
            match write {
                RecordWrite::Screen(screen) => {
                    new_screens.insert(screen.screen_id.as_str());
                }
                RecordWrite::Question(question) => {
                    new_questions.insert(question.question_id.as_str());
                }
                RecordWrite::ScreenOrder { screen_id, .. } => {
                    if !self.screens.contains_key(screen_id)
                        && !new_screens.contains(screen_id.as_str())
                    {
                        return Err(DatabaseError::not_found("screen", screen_id.clone()));
                    }
                }
                RecordWrite::QuestionOrder {
                    question_id,
                    screen_id,
                    ..
                } => {
                    if !self.questions.contains_key(question_id)
                        && !new_questions.contains(question_id.as_str())
                    {
                        return Err(DatabaseError::not_found("question", question_id.clone()));
                    }
                    if !self.screens.contains_key(screen_id)
                        && !new_screens.contains(screen_id.as_str())
                    {
                        return Err(DatabaseError::not_found("screen", screen_id.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) {
        for write in batch.writes {
            match write {
                RecordWrite::Questionnaire(questionnaire) => {
                    self.questionnaires
                        .insert(questionnaire.questionnaire_id.clone(), questionnaire);
                }
                RecordWrite::Screen(mut screen) => {
                    if let Some(existing) = self.screens.get(&screen.screen_id) {
                        screen.screen_order = existing.screen_order;
                    }
                    self.screens.insert(screen.screen_id.clone(), screen);
                }
                RecordWrite::ScreenOrder {
                    screen_id,
                    screen_order,
                } => {
                    if let Some(screen) = self.screens.get_mut(&screen_id) {
                        screen.screen_order = screen_order;
                    }
                }
                RecordWrite::Question(mut question) => {
                    if let Some(existing) = self.questions.get(&question.question_id) {
                        question.screen_id = existing.screen_id.clone();
                        question.question_order = existing.question_order;
                    }
                    self.questions
                        .insert(question.question_id.clone(), question);
                }
                RecordWrite::QuestionOrder {
                    question_id,
                    screen_id,
                    question_order,
                } => {
                    if let Some(question) = self.questions.get_mut(&question_id) {
                        question.screen_id = screen_id;
                        question.question_order = question_order;
                    }
                }
                RecordWrite::AnswerOption(option) => {
                    self.options.insert(option.option_id.clone(), option);
                }
                RecordWrite::ResponseSet(response_set) => {
                    self.response_sets
                        .insert(response_set.response_set_id.clone(), response_set);
                }
                RecordWrite::Answer(answer) => {
                    self.answers.insert(
                        (answer.response_set_id.clone(), answer.question_id.clone()),
                        answer,
                    );
                }
            }
        }

        if let Some(record) = batch.idempotency {
            self.idempotency.insert(record.key.clone(), record);
        }
    }
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
    commits: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend for every subsequent call
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `commit` fail after all reads have succeeded
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successfully applied batches
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DatabaseError::unavailable("in-memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl QuestionnaireStore for InMemoryStore {
    async fn load_questionnaire(
        &self,
        questionnaire_id: &str,
    ) -> Result<Option<QuestionnaireSnapshot>, DatabaseError> {
        self.check_available()?;
        let state = self.state.read().await;

        let Some(questionnaire) = state.questionnaires.get(questionnaire_id) else {
            return Ok(None);
        };

        let screens: Vec<Screen> = state
            .screens
            .values()
            .filter(|s| s.questionnaire_id == questionnaire_id)
            .cloned()
            .collect();
        let questions: Vec<Question> = state
            .questions
            .values()
            .filter(|q| q.questionnaire_id == questionnaire_id)
            .cloned()
            .collect();
        let question_ids: HashSet<&str> =
            questions.iter().map(|q| q.question_id.as_str()).collect();
        let options: Vec<AnswerOption> = state
            .options
            .values()
            .filter(|o| question_ids.contains(o.question_id.as_str()))
            .cloned()
            .collect();

        Ok(Some(QuestionnaireSnapshot {
            questionnaire: questionnaire.clone(),
            screens,
            questions,
            options,
        }))
    }

    async fn get_response_set(
        &self,
        response_set_id: &str,
    ) -> Result<Option<ResponseSet>, DatabaseError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.response_sets.get(response_set_id).cloned())
    }

    async fn load_answers(&self, response_set_id: &str) -> Result<Vec<Answer>, DatabaseError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .answers
            .values()
            .filter(|a| a.response_set_id == response_set_id)
            .cloned()
            .collect())
    }

    async fn get_answer(
        &self,
        response_set_id: &str,
        question_id: &str,
    ) -> Result<Option<Answer>, DatabaseError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .answers
            .get(&(response_set_id.to_string(), question_id.to_string()))
            .cloned())
    }

    async fn find_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, DatabaseError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.idempotency.get(key).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        self.check_available()?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::unavailable("injected commit failure"));
        }

        let mut state = self.state.write().await;
        state.validate(&batch)?;
        state.apply(batch);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
