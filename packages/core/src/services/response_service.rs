//! Response Service
//!
//! Runtime path: response sets, answer writes with their visibility delta,
//! and the filtered screen read.

use crate::db::{DomainEvent, EntityRef, RecordWrite};
use crate::models::{
    validate_id, Answer, AnswerValue, AnswerWriteResult, EntityView, OptionView, ResponseSet,
    ResponseSetProjection, ScreenRead, TokenMap, VisibleQuestion, WriteResult,
};
use crate::operations::{EngineError, Precondition, WriteAnswerParams};
use crate::services::context::{key_reused, ServiceContext};
use crate::services::pipeline::MutationPipeline;
use crate::services::resolver::resolve;
use crate::services::tokens::{TokenError, TokenManager, Versioned};
use crate::services::visibility::{
    index_answers, recompute_subtree, QuestionGraph, VisibilityEvaluator,
};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ResponseService {
    ctx: ServiceContext,
}

impl ResponseService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Open a new, empty response set for a questionnaire
    pub async fn create_response_set(
        &self,
        questionnaire_id: &str,
        precondition: &Precondition,
    ) -> Result<WriteResult<ResponseSetProjection>, EngineError> {
        const OPERATION: &str = "create_response_set";

        let key = self.ctx.dedup_key(OPERATION, precondition)?;
        if let Some(entity) = self.ctx.earlier_create(key.as_deref()).await? {
            let EntityRef::ResponseSet { id } = entity else {
                return Err(key_reused(key.as_deref()));
            };
            let response_set = self.load_response_set(&id).await?;
            if response_set.questionnaire_id != questionnaire_id {
                return Err(key_reused(key.as_deref()));
            }
            return Ok(WriteResult {
                entity: ResponseSetProjection::from(&response_set),
                tokens: TokenMap::default(),
                replayed: true,
            });
        }

        // Existence check only; the snapshot itself is not needed
        self.ctx.load_snapshot(questionnaire_id).await?;
        let response_set = ResponseSet::new(questionnaire_id.to_string());
        let entity = EntityRef::response_set(&response_set.response_set_id);

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(entity.clone(), 0)
                .put(RecordWrite::ResponseSet(response_set.clone()));
            if let Some(key) = &key {
                batch.record_idempotency(key.clone(), entity.clone());
            }
            Ok(())
        })?;
        pipeline.tokenize(|_| Ok(()))?;
        pipeline.respond(self.ctx.store()).await?;

        Ok(WriteResult {
            entity: ResponseSetProjection::from(&response_set),
            tokens: TokenMap::default(),
            replayed: false,
        })
    }

    /// Save one answer and report which dependents changed visibility
    ///
    /// The first answer to a question must be written without a token; every
    /// later write must carry the answer's current etag. Answers of questions
    /// that become hidden stay stored and are listed as suppressed.
    pub async fn write_answer(
        &self,
        params: WriteAnswerParams,
        precondition: &Precondition,
    ) -> Result<AnswerWriteResult, EngineError> {
        const OPERATION: &str = "write_answer";
        let max_depth = self.ctx.config().max_ancestor_depth;
        let response_set_id = params.response_set_id.as_str();
        let question_id = params.question_id.as_str();

        let response_set = self.load_response_set(response_set_id).await?;
        let snapshot = self.ctx.load_snapshot(&response_set.questionnaire_id).await?;
        let question = snapshot
            .question(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;

        let prior_answers = self.ctx.store().load_answers(response_set_id).await?;
        let existing = prior_answers.iter().find(|a| a.question_id == question_id);
        check_answer_token(precondition.if_match.as_deref(), response_set_id, question_id, existing)?;

        let mut answer = Answer::new(
            response_set_id.to_string(),
            question_id.to_string(),
            params.value,
        );
        if let Some(existing) = existing {
            answer.version = existing.version + 1;
        }
        let expected_version = existing.map_or(0, |a| a.version);

        let options = snapshot.options_for(question_id);
        resolve(question, &options, Some(&answer))
            .map_err(|err| EngineError::incompatible_answer(question_id, err.to_string()))?;

        let mut next_response_set = response_set.clone();
        next_response_set.touch();

        let next_answers: Vec<Answer> = prior_answers
            .iter()
            .filter(|a| a.question_id != question_id)
            .cloned()
            .chain(std::iter::once(answer.clone()))
            .collect();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        // The delta below is computed from `prior_answers`; the response set
        // version pins them until commit.
        pipeline.persist(|batch| {
            batch
                .expect(answer.entity_ref(), expected_version)
                .expect(response_set.entity_ref(), response_set.version)
                .put(RecordWrite::Answer(answer.clone()))
                .put(RecordWrite::ResponseSet(next_response_set.clone()));
            Ok(())
        })?;
        let delta = pipeline.reevaluate(|_| {
            let graph = QuestionGraph::build(&snapshot);
            recompute_subtree(
                &graph,
                question_id,
                &index_answers(&prior_answers),
                &index_answers(&next_answers),
                max_depth,
            )
        })?;
        let etag = pipeline.tokenize(|_| Ok(TokenManager::token_for(&answer)))?;
        pipeline.respond(self.ctx.store()).await?;

        debug!(
            "Saved answer {}: {} now visible, {} now hidden, {} suppressed",
            answer.answer_key(),
            delta.now_visible.len(),
            delta.now_hidden.len(),
            delta.suppressed.len()
        );
        self.ctx.emit_event(DomainEvent::AnswerSaved {
            response_set_id: response_set_id.to_string(),
            question_id: question_id.to_string(),
            delta: delta.clone(),
        });

        Ok(AnswerWriteResult::from_delta(etag, delta))
    }

    /// The visible questions of one screen, in order, with their answers
    ///
    /// Hidden questions are omitted together with their (retained) answers.
    pub async fn read_screen(
        &self,
        response_set_id: &str,
        screen_id: &str,
    ) -> Result<ScreenRead, EngineError> {
        let response_set = self.load_response_set(response_set_id).await?;
        let snapshot = self.ctx.load_snapshot(&response_set.questionnaire_id).await?;
        let screen = snapshot
            .screen(screen_id)
            .ok_or_else(|| EngineError::not_found("screen", screen_id))?;
        let answers = self.ctx.store().load_answers(response_set_id).await?;

        let graph = QuestionGraph::build(&snapshot);
        let index = index_answers(&answers);
        let mut evaluator =
            VisibilityEvaluator::new(&graph, &index, self.ctx.config().max_ancestor_depth);

        let mut questions = Vec::new();
        for question in snapshot.questions_on(screen_id) {
            if !evaluator.is_visible(&question.question_id)? {
                continue;
            }
            questions.push(VisibleQuestion {
                question_id: question.question_id.clone(),
                question_text: question.question_text.clone(),
                answer_kind: question.answer_kind,
                question_order: question.question_order,
                options: graph
                    .options_for(&question.question_id)
                    .iter()
                    .map(|option| OptionView::from(*option))
                    .collect(),
                answer: index
                    .get(question.question_id.as_str())
                    .map(|answer| answer.value.clone()),
            });
        }

        Ok(ScreenRead {
            screen_id: screen.screen_id.clone(),
            title: screen.title.clone(),
            screen_order: screen.screen_order,
            questions,
        })
    }

    /// The stored answer regardless of visibility, with its etag
    pub async fn get_stored_answer(
        &self,
        response_set_id: &str,
        question_id: &str,
    ) -> Result<Option<EntityView<AnswerValue>>, EngineError> {
        self.load_response_set(response_set_id).await?;
        let answer = self
            .ctx
            .store()
            .get_answer(response_set_id, question_id)
            .await?;
        Ok(answer.map(|answer| EntityView {
            etag: TokenManager::token_for(&answer),
            entity: answer.value,
        }))
    }

    async fn load_response_set(&self, response_set_id: &str) -> Result<ResponseSet, EngineError> {
        validate_id("response_set_id", response_set_id)?;
        self.ctx
            .store()
            .get_response_set(response_set_id)
            .await?
            .ok_or_else(|| EngineError::not_found("response_set", response_set_id))
    }
}

/// First writes carry no token; overwrites must carry the current one
fn check_answer_token(
    supplied: Option<&str>,
    response_set_id: &str,
    question_id: &str,
    existing: Option<&Answer>,
) -> Result<(), EngineError> {
    match existing {
        Some(answer) => TokenManager::require(supplied, answer),
        None => {
            if supplied.map_or(false, |token| !token.trim().is_empty()) {
                let entity = EntityRef::answer(response_set_id, question_id);
                warn!("Token supplied for {} which has no stored answer", entity);
                return Err(TokenError::Stale.for_entity(&entity));
            }
            Ok(())
        }
    }
}
