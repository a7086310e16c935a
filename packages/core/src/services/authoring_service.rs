//! Authoring Service
//!
//! Creates and edits the questionnaire structure: screens, questions, answer
//! options and visibility links. Every write follows the same outline:
//!
//! 1. Precondition checks (schema, token or deduplication key, position hint,
//!    parent link) against one snapshot read. Nothing is staged yet.
//! 2. A [`MutationPipeline`] stages the entity writes, then any order
//!    assignments from the [`SequenceAllocator`], re-validates the dependency
//!    graph when a visibility link changed, and computes the refreshed tokens.
//! 3. The staged batch commits atomically with version expectations on every
//!    touched entity, so a concurrent writer that read the same versions loses
//!    with a stale-token error and leaves nothing behind.
//! 4. A [`DomainEvent`] is broadcast.

use crate::db::{
    DomainEvent, EntityRef, OrderAssignment, Placement, QuestionnaireSnapshot, RecordWrite,
    SequenceAllocator, SequenceMember, WriteBatch,
};
use crate::models::{
    validate_id, validate_non_empty, AnswerKind, AnswerOption, EntityView, OptionView, Question,
    QuestionProjection, Questionnaire, QuestionnaireProjection, Screen, ScreenProjection,
    TokenMap, ValidationError, WriteResult,
};
use crate::operations::{
    AddAnswerOptionParams, CreateQuestionParams, CreateQuestionnaireParams, CreateScreenParams,
    EngineError, MoveQuestionParams, Precondition, SetVisibilityParams, UpdateQuestionParams,
    UpdateScreenParams,
};
use crate::services::context::{key_reused, ServiceContext};
use crate::services::pipeline::MutationPipeline;
use crate::services::resolver::canonicalize_visible_if;
use crate::services::tokens::{TokenManager, Versioned};
use crate::services::visibility::{check_parent_link, QuestionGraph};
use std::collections::HashMap;
use tracing::info;

/// Authoring writes and the structural reads that go with them
#[derive(Clone)]
pub struct AuthoringService {
    ctx: ServiceContext,
}

impl AuthoringService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    // ------------------------------------------------------------------
    // Questionnaire
    // ------------------------------------------------------------------

    /// Create an empty questionnaire
    pub async fn create_questionnaire(
        &self,
        params: CreateQuestionnaireParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionnaireProjection>, EngineError> {
        const OPERATION: &str = "create_questionnaire";

        let title = validate_non_empty("title", &params.title)?;
        let key = self.ctx.dedup_key(OPERATION, precondition)?;
        if let Some(entity) = self.ctx.earlier_create(key.as_deref()).await? {
            return self.replay_questionnaire(key.as_deref(), entity).await;
        }

        let questionnaire = Questionnaire::new(title);

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(questionnaire.entity_ref(), 0)
                .put(RecordWrite::Questionnaire(questionnaire.clone()));
            record_key(batch, &key, questionnaire.entity_ref());
            Ok(())
        })?;
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                questionnaire: Some(TokenManager::token_for(&questionnaire)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionnaireProjection::from(&questionnaire);
        info!("Created questionnaire '{}'", questionnaire.questionnaire_id);
        self.ctx.emit_event(DomainEvent::QuestionnaireCreated {
            questionnaire: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    pub async fn get_questionnaire(
        &self,
        questionnaire_id: &str,
    ) -> Result<EntityView<QuestionnaireProjection>, EngineError> {
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        Ok(EntityView {
            entity: QuestionnaireProjection::from(&snapshot.questionnaire),
            etag: TokenManager::token_for(&snapshot.questionnaire),
        })
    }

    async fn replay_questionnaire(
        &self,
        key: Option<&str>,
        entity: EntityRef,
    ) -> Result<WriteResult<QuestionnaireProjection>, EngineError> {
        let EntityRef::Questionnaire { id } = entity else {
            return Err(key_reused(key));
        };
        let snapshot = self.ctx.load_snapshot(&id).await?;
        Ok(WriteResult {
            entity: QuestionnaireProjection::from(&snapshot.questionnaire),
            tokens: TokenMap {
                questionnaire: Some(TokenManager::token_for(&snapshot.questionnaire)),
                ..Default::default()
            },
            replayed: true,
        })
    }

    // ------------------------------------------------------------------
    // Screens
    // ------------------------------------------------------------------

    /// Create a screen, appending it or inserting it at `proposed_position`
    pub async fn create_screen(
        &self,
        questionnaire_id: &str,
        params: CreateScreenParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<ScreenProjection>, EngineError> {
        const OPERATION: &str = "create_screen";

        let title = validate_non_empty("title", &params.title)?;
        let key = self.ctx.dedup_key(OPERATION, precondition)?;
        if let Some(entity) = self.ctx.earlier_create(key.as_deref()).await? {
            return self
                .replay_screen(questionnaire_id, key.as_deref(), entity)
                .await;
        }

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        ensure_unique_title(&snapshot, &title, None)?;

        let mut screen = Screen::new(questionnaire_id.to_string(), title, 0);
        let members = screen_members(&snapshot);
        let placement = SequenceAllocator::assign_on_create(
            &members,
            &screen.screen_id,
            params.proposed_position,
        )?;
        screen.screen_order = placement.final_position;

        let mut questionnaire = snapshot.questionnaire.clone();
        questionnaire.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(screen.entity_ref(), 0)
                .expect(
                    snapshot.questionnaire.entity_ref(),
                    snapshot.questionnaire.version,
                )
                .put(RecordWrite::Screen(screen.clone()))
                .put(RecordWrite::Questionnaire(questionnaire.clone()));
            record_key(batch, &key, screen.entity_ref());
            Ok(())
        })?;
        pipeline.reindex(|batch| stage_screen_orders(batch, &members, &placement))?;
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                screen: Some(TokenManager::token_for(&screen)),
                questionnaire: Some(TokenManager::token_for(&questionnaire)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = ScreenProjection::from(&screen);
        info!(
            "Created screen '{}' at position {} in questionnaire '{}'",
            screen.screen_id, screen.screen_order, questionnaire_id
        );
        self.ctx.emit_event(DomainEvent::ScreenCreated {
            questionnaire_id: questionnaire_id.to_string(),
            screen: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Rename and/or reposition a screen
    ///
    /// Touches the screen and the questionnaire, whose version guards the
    /// screen collection (order and title uniqueness).
    pub async fn update_screen(
        &self,
        questionnaire_id: &str,
        screen_id: &str,
        params: UpdateScreenParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<ScreenProjection>, EngineError> {
        const OPERATION: &str = "update_screen";

        if params.title.is_none() && params.proposed_position.is_none() {
            return Err(ValidationError::EmptyUpdate.into());
        }

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = snapshot
            .screen(screen_id)
            .ok_or_else(|| EngineError::not_found("screen", screen_id))?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let mut screen = current.clone();
        if let Some(title) = &params.title {
            let title = validate_non_empty("title", title)?;
            if title != screen.title {
                ensure_unique_title(&snapshot, &title, Some(screen_id))?;
                screen.title = title;
            }
        }

        let members = screen_members(&snapshot);
        let placement = params
            .proposed_position
            .map(|proposed| SequenceAllocator::reposition(&members, screen_id, proposed))
            .transpose()?;
        if let Some(placement) = &placement {
            screen.screen_order = placement.final_position;
        }
        screen.touch();

        let mut questionnaire = snapshot.questionnaire.clone();
        questionnaire.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(current.entity_ref(), current.version)
                .expect(
                    snapshot.questionnaire.entity_ref(),
                    snapshot.questionnaire.version,
                )
                .put(RecordWrite::Screen(screen.clone()))
                .put(RecordWrite::Questionnaire(questionnaire.clone()));
            Ok(())
        })?;
        if let Some(placement) = &placement {
            pipeline.reindex(|batch| stage_screen_orders(batch, &members, placement))?;
        }
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                screen: Some(TokenManager::token_for(&screen)),
                questionnaire: Some(TokenManager::token_for(&questionnaire)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = ScreenProjection::from(&screen);
        self.ctx.emit_event(DomainEvent::ScreenUpdated {
            questionnaire_id: questionnaire_id.to_string(),
            screen: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Screens in `screen_order`, each with its current token
    pub async fn list_screens(
        &self,
        questionnaire_id: &str,
    ) -> Result<Vec<EntityView<ScreenProjection>>, EngineError> {
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        Ok(snapshot
            .ordered_screens()
            .into_iter()
            .map(|screen| EntityView {
                entity: ScreenProjection::from(screen),
                etag: TokenManager::token_for(screen),
            })
            .collect())
    }

    pub async fn get_screen(
        &self,
        questionnaire_id: &str,
        screen_id: &str,
    ) -> Result<EntityView<ScreenProjection>, EngineError> {
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let screen = snapshot
            .screen(screen_id)
            .ok_or_else(|| EngineError::not_found("screen", screen_id))?;
        Ok(EntityView {
            entity: ScreenProjection::from(screen),
            etag: TokenManager::token_for(screen),
        })
    }

    async fn replay_screen(
        &self,
        questionnaire_id: &str,
        key: Option<&str>,
        entity: EntityRef,
    ) -> Result<WriteResult<ScreenProjection>, EngineError> {
        let EntityRef::Screen { id } = entity else {
            return Err(key_reused(key));
        };
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let screen = snapshot.screen(&id).ok_or_else(|| key_reused(key))?;
        Ok(WriteResult {
            entity: ScreenProjection::from(screen),
            tokens: TokenMap {
                screen: Some(TokenManager::token_for(screen)),
                questionnaire: Some(TokenManager::token_for(&snapshot.questionnaire)),
                ..Default::default()
            },
            replayed: true,
        })
    }

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    /// Create a question on `screen_id`
    ///
    /// `answer_kind` may be omitted to create a scaffold question.
    pub async fn create_question(
        &self,
        questionnaire_id: &str,
        screen_id: &str,
        params: CreateQuestionParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "create_question";

        let text = validate_non_empty("question_text", &params.question_text)?;
        let key = self.ctx.dedup_key(OPERATION, precondition)?;
        if let Some(entity) = self.ctx.earlier_create(key.as_deref()).await? {
            return self
                .replay_question(questionnaire_id, key.as_deref(), entity)
                .await;
        }

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current_screen = snapshot
            .screen(screen_id)
            .ok_or_else(|| EngineError::not_found("screen", screen_id))?;

        let mut question = Question::new(
            questionnaire_id.to_string(),
            screen_id.to_string(),
            text,
            params.answer_kind,
            0,
        );
        let members = question_members(&snapshot, screen_id);
        let placement = SequenceAllocator::assign_on_create(
            &members,
            &question.question_id,
            params.proposed_position,
        )?;
        question.question_order = placement.final_position;

        let mut screen = current_screen.clone();
        screen.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(question.entity_ref(), 0)
                .expect(current_screen.entity_ref(), current_screen.version)
                .put(RecordWrite::Question(question.clone()))
                .put(RecordWrite::Screen(screen.clone()));
            record_key(batch, &key, question.entity_ref());
            Ok(())
        })?;
        pipeline.reindex(|batch| stage_question_orders(batch, screen_id, &members, &placement))?;
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                question: Some(TokenManager::token_for(&question)),
                screen: Some(TokenManager::token_for(&screen)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionProjection::from(&question);
        info!(
            "Created question '{}' at position {} on screen '{}'",
            question.question_id, question.question_order, screen_id
        );
        self.ctx.emit_event(DomainEvent::QuestionCreated {
            questionnaire_id: questionnaire_id.to_string(),
            question: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Edit question text and/or allocate the answer kind of a scaffold question
    ///
    /// Once set, `answer_kind` never changes.
    pub async fn update_question(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        params: UpdateQuestionParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "update_question";

        if params.is_empty() {
            return Err(ValidationError::EmptyUpdate.into());
        }

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let mut question = current.clone();
        if let Some(text) = &params.question_text {
            question.question_text = validate_non_empty("question_text", text)?;
        }
        if let Some(kind) = params.answer_kind {
            question.answer_kind = Some(allocate_answer_kind(current, kind)?);
        }
        question.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(current.entity_ref(), current.version)
                .put(RecordWrite::Question(question.clone()));
            Ok(())
        })?;
        let tokens = pipeline.tokenize(|_| Ok(question_tokens(&question)))?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionProjection::from(&question);
        self.ctx.emit_event(DomainEvent::QuestionUpdated {
            questionnaire_id: questionnaire_id.to_string(),
            question: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Move a question to `proposed_position` within its own screen
    pub async fn reposition_question(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        proposed_position: i64,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "reposition_question";

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let screen_id = current.screen_id.as_str();
        let current_screen = snapshot
            .screen(screen_id)
            .ok_or_else(|| EngineError::not_found("screen", screen_id))?;
        let members = question_members(&snapshot, screen_id);
        let placement = SequenceAllocator::reposition(&members, question_id, proposed_position)?;

        let mut question = current.clone();
        question.question_order = placement.final_position;
        question.touch();
        let mut screen = current_screen.clone();
        screen.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(current.entity_ref(), current.version)
                .expect(current_screen.entity_ref(), current_screen.version)
                .put(RecordWrite::Question(question.clone()))
                .put(RecordWrite::Screen(screen.clone()));
            Ok(())
        })?;
        pipeline.reindex(|batch| stage_question_orders(batch, screen_id, &members, &placement))?;
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                question: Some(TokenManager::token_for(&question)),
                screen: Some(TokenManager::token_for(&screen)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionProjection::from(&question);
        self.ctx.emit_event(DomainEvent::QuestionMoved {
            questionnaire_id: questionnaire_id.to_string(),
            from_screen_id: screen_id.to_string(),
            question: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Move a question to another screen, closing the gap it leaves behind
    ///
    /// A move onto the question's own screen is a reposition (to the end when
    /// no position is proposed).
    pub async fn move_question(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        params: MoveQuestionParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "move_question";

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let source_id = current.screen_id.as_str();
        let target_id = params.target_screen_id.as_str();
        let target_screen = snapshot
            .screen(target_id)
            .ok_or_else(|| EngineError::not_found("screen", target_id))?;
        if source_id == target_id {
            let last = question_members(&snapshot, source_id).len() as i64;
            return self
                .reposition_question(
                    questionnaire_id,
                    question_id,
                    params.proposed_position.unwrap_or(last),
                    precondition,
                )
                .await;
        }
        let source_screen = snapshot
            .screen(source_id)
            .ok_or_else(|| EngineError::not_found("screen", source_id))?;

        let source_members = question_members(&snapshot, source_id);
        let target_members = question_members(&snapshot, target_id);
        let placement = SequenceAllocator::move_between(
            &source_members,
            &target_members,
            question_id,
            params.proposed_position,
        )?;

        let mut question = current.clone();
        question.screen_id = target_id.to_string();
        question.question_order = placement.final_position;
        question.touch();
        let mut source = source_screen.clone();
        source.touch();
        let mut target = target_screen.clone();
        target.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(current.entity_ref(), current.version)
                .expect(source_screen.entity_ref(), source_screen.version)
                .expect(target_screen.entity_ref(), target_screen.version)
                .put(RecordWrite::Question(question.clone()))
                .put(RecordWrite::Screen(source.clone()))
                .put(RecordWrite::Screen(target.clone()));
            Ok(())
        })?;
        pipeline.reindex(|batch| {
            stage_question_orders(batch, source_id, &source_members, &placement.source)?;
            stage_question_orders(batch, target_id, &target_members, &placement.target)
        })?;
        let tokens = pipeline.tokenize(|_| {
            Ok(TokenMap {
                question: Some(TokenManager::token_for(&question)),
                screen: Some(TokenManager::token_for(&target)),
                source_screen: Some(TokenManager::token_for(&source)),
                ..Default::default()
            })
        })?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionProjection::from(&question);
        info!(
            "Moved question '{}' from screen '{}' to '{}' at position {}",
            question_id, source_id, target_id, question.question_order
        );
        self.ctx.emit_event(DomainEvent::QuestionMoved {
            questionnaire_id: questionnaire_id.to_string(),
            from_screen_id: source_id.to_string(),
            question: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Make a question conditional on `parent_question_id`
    pub async fn set_visibility(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        params: SetVisibilityParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "set_visibility";
        let max_depth = self.ctx.config().max_ancestor_depth;

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let parent_id = validate_id("parent_question_id", &params.parent_question_id)?;
        // The proposed parent and its ancestors must be unchanged at commit;
        // a concurrent link among them could otherwise close a cycle.
        let chain_guards = {
            let graph = QuestionGraph::build(&snapshot);
            check_parent_link(&graph, question_id, parent_id, max_depth)?;
            let mut chain = vec![parent_id];
            chain.extend(
                graph
                    .ancestors(parent_id, max_depth)
                    .map_err(|_| EngineError::CycleDetected {
                        question_id: question_id.to_string(),
                        parent_id: parent_id.to_string(),
                    })?,
            );
            chain
                .into_iter()
                .filter_map(|id| snapshot.question(id))
                .map(|q| (q.entity_ref(), q.version))
                .collect::<Vec<_>>()
        };
        let parent = find_question(&snapshot, parent_id)?;
        let rule = canonicalize_visible_if(
            parent,
            &snapshot.options_for(parent_id),
            &params.visible_if_value,
        )?;

        let mut question = current.clone();
        question.parent_question_id = Some(parent_id.to_string());
        question.visible_if_value = Some(rule);
        question.touch();

        self.commit_link_change(
            OPERATION,
            questionnaire_id,
            &snapshot,
            current,
            question,
            chain_guards,
        )
        .await
    }

    /// Make a question unconditional again
    pub async fn clear_visibility(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        precondition: &Precondition,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        const OPERATION: &str = "clear_visibility";

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        TokenManager::require(precondition.if_match.as_deref(), current)?;

        let mut question = current.clone();
        question.parent_question_id = None;
        question.visible_if_value = None;
        question.touch();

        self.commit_link_change(
            OPERATION,
            questionnaire_id,
            &snapshot,
            current,
            question,
            Vec::new(),
        )
        .await
    }

    async fn commit_link_change(
        &self,
        operation: &'static str,
        questionnaire_id: &str,
        snapshot: &QuestionnaireSnapshot,
        current: &Question,
        question: Question,
        chain_guards: Vec<(EntityRef, i64)>,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        let max_depth = self.ctx.config().max_ancestor_depth;

        let mut pipeline = MutationPipeline::validated(operation);
        pipeline.persist(|batch| {
            batch
                .expect(current.entity_ref(), current.version)
                .put(RecordWrite::Question(question.clone()));
            for (entity, version) in chain_guards {
                batch.expect(entity, version);
            }
            Ok(())
        })?;
        pipeline.reevaluate(|_| verify_dependency_graph(snapshot, &question, max_depth))?;
        let tokens = pipeline.tokenize(|_| Ok(question_tokens(&question)))?;
        pipeline.respond(self.ctx.store()).await?;

        let projection = QuestionProjection::from(&question);
        self.ctx.emit_event(DomainEvent::QuestionUpdated {
            questionnaire_id: questionnaire_id.to_string(),
            question: projection.clone(),
        });

        Ok(WriteResult {
            entity: projection,
            tokens,
            replayed: false,
        })
    }

    /// Add a selectable option to an `enum_single` question
    pub async fn add_answer_option(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        params: AddAnswerOptionParams,
        precondition: &Precondition,
    ) -> Result<WriteResult<OptionView>, EngineError> {
        const OPERATION: &str = "add_answer_option";

        let value = validate_non_empty("value", &params.value)?;
        let key = self.ctx.dedup_key(OPERATION, precondition)?;
        if let Some(entity) = self.ctx.earlier_create(key.as_deref()).await? {
            return self
                .replay_option(questionnaire_id, question_id, key.as_deref(), entity)
                .await;
        }

        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let current = find_question(&snapshot, question_id)?;
        if current.answer_kind != Some(AnswerKind::EnumSingle) {
            return Err(ValidationError::InvalidValue {
                field: "answer_kind".to_string(),
                reason: format!("question '{}' is not enum_single", question_id),
            }
            .into());
        }
        if snapshot
            .options_for(question_id)
            .iter()
            .any(|option| option.value == value)
        {
            return Err(EngineError::DuplicateOption {
                question_id: question_id.to_string(),
                value,
            });
        }

        let label = params
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        let option = AnswerOption::new(question_id.to_string(), value, label);
        let mut question = current.clone();
        question.touch();

        let mut pipeline = MutationPipeline::validated(OPERATION);
        pipeline.persist(|batch| {
            batch
                .expect(EntityRef::answer_option(&option.option_id), 0)
                .expect(current.entity_ref(), current.version)
                .put(RecordWrite::AnswerOption(option.clone()))
                .put(RecordWrite::Question(question.clone()));
            record_key(batch, &key, EntityRef::answer_option(&option.option_id));
            Ok(())
        })?;
        let tokens = pipeline.tokenize(|_| Ok(question_tokens(&question)))?;
        pipeline.respond(self.ctx.store()).await?;

        self.ctx.emit_event(DomainEvent::QuestionUpdated {
            questionnaire_id: questionnaire_id.to_string(),
            question: QuestionProjection::from(&question),
        });

        Ok(WriteResult {
            entity: OptionView::from(&option),
            tokens,
            replayed: false,
        })
    }

    /// Authoring view of one question, rule metadata included
    pub async fn get_question(
        &self,
        questionnaire_id: &str,
        question_id: &str,
    ) -> Result<EntityView<QuestionProjection>, EngineError> {
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let question = find_question(&snapshot, question_id)?;
        Ok(EntityView {
            entity: QuestionProjection::from(question),
            etag: TokenManager::token_for(question),
        })
    }

    /// Every question of a screen in `question_order`, hidden ones included
    pub async fn list_questions(
        &self,
        questionnaire_id: &str,
        screen_id: &str,
    ) -> Result<Vec<EntityView<QuestionProjection>>, EngineError> {
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        if snapshot.screen(screen_id).is_none() {
            return Err(EngineError::not_found("screen", screen_id));
        }
        Ok(snapshot
            .questions_on(screen_id)
            .into_iter()
            .map(|question| EntityView {
                entity: QuestionProjection::from(question),
                etag: TokenManager::token_for(question),
            })
            .collect())
    }

    async fn replay_question(
        &self,
        questionnaire_id: &str,
        key: Option<&str>,
        entity: EntityRef,
    ) -> Result<WriteResult<QuestionProjection>, EngineError> {
        let EntityRef::Question { id } = entity else {
            return Err(key_reused(key));
        };
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let question = snapshot.question(&id).ok_or_else(|| key_reused(key))?;
        let screen = snapshot
            .screen(&question.screen_id)
            .ok_or_else(|| EngineError::not_found("screen", &question.screen_id))?;
        Ok(WriteResult {
            entity: QuestionProjection::from(question),
            tokens: TokenMap {
                question: Some(TokenManager::token_for(question)),
                screen: Some(TokenManager::token_for(screen)),
                ..Default::default()
            },
            replayed: true,
        })
    }

    async fn replay_option(
        &self,
        questionnaire_id: &str,
        question_id: &str,
        key: Option<&str>,
        entity: EntityRef,
    ) -> Result<WriteResult<OptionView>, EngineError> {
        let EntityRef::AnswerOption { id } = entity else {
            return Err(key_reused(key));
        };
        let snapshot = self.ctx.load_snapshot(questionnaire_id).await?;
        let question = find_question(&snapshot, question_id)?;
        let option = snapshot
            .options_for(question_id)
            .into_iter()
            .find(|option| option.option_id == id)
            .ok_or_else(|| key_reused(key))?;
        Ok(WriteResult {
            entity: OptionView::from(option),
            tokens: question_tokens(question),
            replayed: true,
        })
    }
}

fn record_key(batch: &mut WriteBatch, key: &Option<String>, entity: EntityRef) {
    if let Some(key) = key {
        batch.record_idempotency(key.clone(), entity);
    }
}

fn question_tokens(question: &Question) -> TokenMap {
    TokenMap {
        question: Some(TokenManager::token_for(question)),
        ..Default::default()
    }
}

fn find_question<'a>(
    snapshot: &'a QuestionnaireSnapshot,
    question_id: &str,
) -> Result<&'a Question, EngineError> {
    snapshot
        .question(question_id)
        .ok_or_else(|| EngineError::not_found("question", question_id))
}

fn ensure_unique_title(
    snapshot: &QuestionnaireSnapshot,
    title: &str,
    except_screen: Option<&str>,
) -> Result<(), EngineError> {
    let taken = snapshot
        .screens
        .iter()
        .filter(|s| Some(s.screen_id.as_str()) != except_screen)
        .any(|s| s.title == title);
    if taken {
        return Err(EngineError::DuplicateTitle {
            title: title.to_string(),
        });
    }
    Ok(())
}

/// Scaffold questions take a kind once; typed questions keep theirs
fn allocate_answer_kind(current: &Question, requested: AnswerKind) -> Result<AnswerKind, EngineError> {
    match current.answer_kind {
        None => Ok(requested),
        Some(existing) if existing == requested => Ok(existing),
        Some(existing) => Err(EngineError::AnswerKindLocked {
            question_id: current.question_id.clone(),
            current: existing.to_string(),
        }),
    }
}

fn screen_members(snapshot: &QuestionnaireSnapshot) -> Vec<SequenceMember> {
    snapshot
        .screens
        .iter()
        .map(|s| SequenceMember::new(&s.screen_id, s.screen_order))
        .collect()
}

fn question_members(snapshot: &QuestionnaireSnapshot, screen_id: &str) -> Vec<SequenceMember> {
    snapshot
        .questions
        .iter()
        .filter(|q| q.screen_id == screen_id)
        .map(|q| SequenceMember::new(&q.question_id, q.question_order))
        .collect()
}

/// Positions the collection will hold once `placement` is applied must be `1..=N`
fn ensure_contiguous(
    collection: &str,
    members: &[SequenceMember],
    placement: &Placement,
) -> Result<(), EngineError> {
    let mut positions: HashMap<&str, u32> = members
        .iter()
        .map(|m| (m.id.as_str(), m.position))
        .collect();
    for assignment in &placement.assignments {
        positions.insert(assignment.id.as_str(), assignment.position);
    }

    let mut after = Vec::with_capacity(placement.len());
    for id in &placement.sequence {
        let position = positions.get(id.as_str()).copied().ok_or_else(|| {
            EngineError::Reindex(format!("{} member '{}' has no position", collection, id))
        })?;
        after.push(position);
    }
    if !SequenceAllocator::is_contiguous(after) {
        return Err(EngineError::Reindex(format!(
            "{} would not be numbered 1..={}",
            collection,
            placement.len()
        )));
    }
    Ok(())
}

fn stage_screen_orders(
    batch: &mut WriteBatch,
    members: &[SequenceMember],
    placement: &Placement,
) -> Result<(), EngineError> {
    ensure_contiguous("screen list", members, placement)?;
    for OrderAssignment { id, position } in &placement.assignments {
        batch.put(RecordWrite::ScreenOrder {
            screen_id: id.clone(),
            screen_order: *position,
        });
    }
    Ok(())
}

fn stage_question_orders(
    batch: &mut WriteBatch,
    screen_id: &str,
    members: &[SequenceMember],
    placement: &Placement,
) -> Result<(), EngineError> {
    ensure_contiguous("question list", members, placement)?;
    for OrderAssignment { id, position } in &placement.assignments {
        batch.put(RecordWrite::QuestionOrder {
            question_id: id.clone(),
            screen_id: screen_id.to_string(),
            question_order: *position,
        });
    }
    Ok(())
}

/// Walk the edited question's ancestor chain in the post-write graph
fn verify_dependency_graph(
    snapshot: &QuestionnaireSnapshot,
    edited: &Question,
    max_depth: usize,
) -> Result<(), EngineError> {
    let mut staged = snapshot.clone();
    if let Some(slot) = staged
        .questions
        .iter_mut()
        .find(|q| q.question_id == edited.question_id)
    {
        *slot = edited.clone();
    }
    let graph = QuestionGraph::build(&staged);
    graph
        .ancestors(&edited.question_id, max_depth)
        .map(|_| ())
        .map_err(|_| EngineError::CycleDetected {
            question_id: edited.question_id.clone(),
            parent_id: edited.parent_question_id.clone().unwrap_or_default(),
        })
}
