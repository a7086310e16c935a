//! Performance benchmarks for the questionnaire engine
//!
//! Run with: `cargo bench -p questionnaire-core`
//!
//! These benchmarks measure the hot paths:
//! - Sequence reindexing on large collections
//! - Subtree visibility recomputation over deep dependency chains
//! - End-to-end answer writes through the mutation pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use questionnaire_core::db::{QuestionnaireSnapshot, SequenceAllocator, SequenceMember};
use questionnaire_core::operations::{
    CreateQuestionParams, CreateQuestionnaireParams, CreateScreenParams, WriteAnswerParams,
};
use questionnaire_core::services::{index_answers, recompute_subtree, QuestionGraph};
use questionnaire_core::{
    Answer, AnswerKind, AnswerValue, CanonicalValue, EngineConfig, InMemoryStore, Precondition,
    Question, Questionnaire, QuestionnaireEngine, Screen, VisibleIfValue,
};
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

fn members(count: u32) -> Vec<SequenceMember> {
    (1..=count)
        .map(|position| SequenceMember::new(format!("m{}", position), position))
        .collect()
}

/// Boolean questions where each one is shown only when the previous is `true`
fn chain_snapshot(length: usize) -> QuestionnaireSnapshot {
    let questionnaire = Questionnaire::new("Bench".to_string());
    let screen = Screen::new(questionnaire.questionnaire_id.clone(), "Main".to_string(), 1);

    let mut questions: Vec<Question> = Vec::with_capacity(length);
    for i in 0..length {
        let mut question = Question::new(
            questionnaire.questionnaire_id.clone(),
            screen.screen_id.clone(),
            format!("Step {}", i + 1),
            Some(AnswerKind::Boolean),
            i as u32 + 1,
        );
        if let Some(previous) = questions.last() {
            question.parent_question_id = Some(previous.question_id.clone());
            question.visible_if_value = Some(VisibleIfValue::One(CanonicalValue::Bool(true)));
        }
        questions.push(question);
    }

    QuestionnaireSnapshot {
        questionnaire,
        screens: vec![screen],
        questions,
        options: Vec::new(),
    }
}

/// Benchmark reindexing after a reposition or a hinted insert
fn bench_sequence_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_allocator");

    for size in [10u32, 100, 1000] {
        let collection = members(size);
        let last = format!("m{}", size);

        group.bench_with_input(BenchmarkId::new("reposition_last_to_first", size), &size, |b, _| {
            b.iter(|| {
                black_box(SequenceAllocator::reposition(&collection, &last, 1).unwrap());
            })
        });
        group.bench_with_input(BenchmarkId::new("insert_at_front", size), &size, |b, _| {
            b.iter(|| {
                black_box(SequenceAllocator::assign_on_create(&collection, "new", Some(1)).unwrap());
            })
        });
    }

    group.finish();
}

/// Benchmark the delta for a root answer that reveals a whole chain
fn bench_recompute_subtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute_subtree");

    for length in [10usize, 100, 500] {
        let snapshot = chain_snapshot(length);
        let graph = QuestionGraph::build(&snapshot);
        let root = snapshot.questions[0].question_id.clone();
        let rs = Uuid::new_v4().to_string();

        let prior: Vec<Answer> = Vec::new();
        let next: Vec<Answer> = snapshot
            .questions
            .iter()
            .map(|q| Answer::new(rs.clone(), q.question_id.clone(), AnswerValue::Bool(true)))
            .collect();

        group.bench_with_input(BenchmarkId::new("chain", length), &length, |b, _| {
            b.iter(|| {
                let delta = recompute_subtree(
                    &graph,
                    &root,
                    &index_answers(&prior),
                    &index_answers(&next),
                    length + 1,
                )
                .unwrap();
                black_box(delta);
            })
        });
    }

    group.finish();
}

/// Benchmark answer writes end to end against the in-memory store
fn bench_write_answer(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let key = || Precondition::idempotency_key(Uuid::new_v4().to_string());

    c.bench_function("write_answer", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine = QuestionnaireEngine::new(
                    Arc::new(InMemoryStore::new()),
                    EngineConfig::default(),
                );
                let qn = engine
                    .authoring
                    .create_questionnaire(
                        CreateQuestionnaireParams {
                            title: "Bench".to_string(),
                        },
                        &key(),
                    )
                    .await
                    .unwrap()
                    .entity
                    .questionnaire_id;
                let screen = engine
                    .authoring
                    .create_screen(
                        &qn,
                        CreateScreenParams {
                            title: "Main".to_string(),
                            proposed_position: None,
                        },
                        &key(),
                    )
                    .await
                    .unwrap()
                    .entity
                    .screen_id;
                let question = engine
                    .authoring
                    .create_question(
                        &qn,
                        &screen,
                        CreateQuestionParams {
                            question_text: "Count".to_string(),
                            answer_kind: Some(AnswerKind::Number),
                            proposed_position: None,
                        },
                        &key(),
                    )
                    .await
                    .unwrap()
                    .entity
                    .question_id;
                let rs = engine
                    .responses
                    .create_response_set(&qn, &key())
                    .await
                    .unwrap()
                    .entity
                    .response_set_id;

                let mut precondition = Precondition::none();
                let start = std::time::Instant::now();
                for i in 0..iters {
                    let saved = engine
                        .responses
                        .write_answer(
                            WriteAnswerParams {
                                response_set_id: rs.clone(),
                                question_id: question.clone(),
                                value: AnswerValue::Number(i as f64),
                            },
                            &precondition,
                        )
                        .await
                        .unwrap();
                    precondition = Precondition::if_match(saved.etag);
                }
                start.elapsed()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_sequence_allocator,
    bench_recompute_subtree,
    bench_write_answer
);
criterion_main!(benches);
