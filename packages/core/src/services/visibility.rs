//! Visibility Evaluation
//!
//! The parent/child relation between questions is held as an explicit
//! adjacency index ([`QuestionGraph`]) built once per operation from a
//! snapshot; no question owns another.
//!
//! A question is visible when it has no parent, or when its parent's canonical
//! value is a member of its `visible_if_value`. A hidden parent counts as
//! unanswered, so hiding propagates down the chain while the hidden answers
//! themselves stay in storage.

use crate::db::QuestionnaireSnapshot;
use crate::models::{Answer, AnswerOption, Question, VisibilityDelta};
use crate::operations::EngineError;
use crate::services::resolver::{resolve, Resolved};
use std::collections::{HashMap, HashSet, VecDeque};

/// Answers keyed by question id
pub type AnswerIndex<'a> = HashMap<&'a str, &'a Answer>;

/// Build an [`AnswerIndex`] over a response set's stored answers
pub fn index_answers(answers: &[Answer]) -> AnswerIndex<'_> {
    answers
        .iter()
        .map(|answer| (answer.question_id.as_str(), answer))
        .collect()
}

/// Decide visibility from the parent's (effective) resolution. Pure.
pub fn is_visible(question: &Question, parent: &Resolved) -> bool {
    if question.parent_question_id.is_none() {
        return true;
    }
    match (parent, &question.visible_if_value) {
        (Resolved::Unanswered, _) => false,
        (Resolved::Value(value), Some(rule)) => rule.contains(value),
        // A parent link without a rule never matches
        (Resolved::Value(_), None) => false,
    }
}

/// Adjacency index over one questionnaire's questions
pub struct QuestionGraph<'a> {
    questions: HashMap<&'a str, &'a Question>,
    children: HashMap<&'a str, Vec<&'a str>>,
    options: HashMap<&'a str, Vec<&'a AnswerOption>>,
}

impl<'a> QuestionGraph<'a> {
    /// Index a snapshot; children are kept in screen order, then question order
    pub fn build(snapshot: &'a QuestionnaireSnapshot) -> Self {
        let screen_order: HashMap<&str, u32> = snapshot
            .screens
            .iter()
            .map(|s| (s.screen_id.as_str(), s.screen_order))
            .collect();

        let questions: HashMap<&'a str, &'a Question> = snapshot
            .questions
            .iter()
            .map(|q| (q.question_id.as_str(), q))
            .collect();

        let mut children: HashMap<&'a str, Vec<&'a Question>> = HashMap::new();
        for question in &snapshot.questions {
            if let Some(parent_id) = question.parent_question_id.as_deref() {
                children.entry(parent_id).or_default().push(question);
            }
        }
        let children = children
            .into_iter()
            .map(|(parent, mut kids)| {
                let rank = |q: &Question| {
                    screen_order
                        .get(q.screen_id.as_str())
                        .copied()
                        .unwrap_or(u32::MAX)
                };
                kids.sort_by(|a, b| {
                    rank(*a)
                        .cmp(&rank(*b))
                        .then_with(|| a.question_order.cmp(&b.question_order))
                        .then_with(|| a.question_id.cmp(&b.question_id))
                });
                (parent, kids.into_iter().map(|q| q.question_id.as_str()).collect())
            })
            .collect();

        let mut options: HashMap<&'a str, Vec<&'a AnswerOption>> = HashMap::new();
        for option in &snapshot.options {
            options
                .entry(option.question_id.as_str())
                .or_default()
                .push(option);
        }

        Self {
            questions,
            children,
            options,
        }
    }

    pub fn question(&self, question_id: &str) -> Option<&'a Question> {
        self.questions.get(question_id).copied()
    }

    pub fn children_of(&self, question_id: &str) -> &[&'a str] {
        self.children
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn options_for(&self, question_id: &str) -> &[&'a AnswerOption] {
        self.options
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ancestors of `question_id`, nearest first.
    ///
    /// Stops with an error on a cycle, a dangling parent or a chain longer than
    /// `max_depth`.
    pub fn ancestors(&self, question_id: &str, max_depth: usize) -> Result<Vec<&'a str>, String> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = self
            .question(question_id)
            .ok_or_else(|| format!("question '{}' not in graph", question_id))?;
        seen.insert(current.question_id.as_str());

        while let Some(parent_id) = current.parent_question_id.as_deref() {
            if chain.len() >= max_depth {
                return Err(format!("ancestor chain exceeds {} levels", max_depth));
            }
            let parent = self
                .question(parent_id)
                .ok_or_else(|| format!("parent '{}' does not exist", parent_id))?;
            if !seen.insert(parent.question_id.as_str()) {
                return Err(format!("cycle through '{}'", parent_id));
            }
            chain.push(parent.question_id.as_str());
            current = parent;
        }
        Ok(chain)
    }
}

/// Reject a parent link that is reflexive or would close a cycle.
///
/// Walks from the proposed parent toward the root (bounded by `max_depth`); if
/// the subject shows up on the way, the link is rejected.
pub fn check_parent_link(
    graph: &QuestionGraph<'_>,
    question_id: &str,
    parent_id: &str,
    max_depth: usize,
) -> Result<(), EngineError> {
    if question_id == parent_id {
        return Err(EngineError::SelfReference {
            question_id: question_id.to_string(),
        });
    }
    if graph.question(parent_id).is_none() {
        return Err(EngineError::not_found("question", parent_id));
    }

    let cycle = || EngineError::CycleDetected {
        question_id: question_id.to_string(),
        parent_id: parent_id.to_string(),
    };
    let ancestors = graph.ancestors(parent_id, max_depth).map_err(|_| cycle())?;
    if ancestors.iter().any(|id| *id == question_id) {
        return Err(cycle());
    }
    Ok(())
}

/// Memoizing evaluator of effective visibility under one answer set
pub struct VisibilityEvaluator<'g, 'a> {
    graph: &'g QuestionGraph<'a>,
    answers: &'g AnswerIndex<'a>,
    max_depth: usize,
    memo: HashMap<&'a str, bool>,
}

impl<'g, 'a> VisibilityEvaluator<'g, 'a> {
    pub fn new(graph: &'g QuestionGraph<'a>, answers: &'g AnswerIndex<'a>, max_depth: usize) -> Self {
        Self {
            graph,
            answers,
            max_depth,
            memo: HashMap::new(),
        }
    }

    /// Effective visibility of `question_id`.
    ///
    /// Walks up only until it reaches a question already evaluated, then
    /// evaluates back down, so a top-down traversal costs one step per node.
    pub fn is_visible(&mut self, question_id: &str) -> Result<bool, EngineError> {
        if let Some(known) = self.memo.get(question_id) {
            return Ok(*known);
        }

        let mut pending: Vec<&'a Question> = Vec::new();
        let mut current = self
            .graph
            .question(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;
        loop {
            if self.memo.contains_key(current.question_id.as_str()) {
                break;
            }
            if pending.len() > self.max_depth {
                return Err(EngineError::resolution(
                    question_id,
                    format!("dependency chain exceeds {} levels", self.max_depth),
                ));
            }
            pending.push(current);
            match current.parent_question_id.as_deref() {
                None => break,
                Some(parent_id) => {
                    current = self.graph.question(parent_id).ok_or_else(|| {
                        EngineError::resolution(
                            question_id,
                            format!("parent '{}' does not exist", parent_id),
                        )
                    })?;
                }
            }
        }

        for question in pending.into_iter().rev() {
            let visible = match question.parent_question_id.as_deref() {
                None => true,
                Some(parent_id) => {
                    let parent_visible = *self.memo.get(parent_id).ok_or_else(|| {
                        EngineError::resolution(
                            question.question_id.as_str(),
                            format!("cycle through '{}'", parent_id),
                        )
                    })?;
                    let parent_value = if parent_visible {
                        self.resolve(parent_id)?
                    } else {
                        Resolved::Unanswered
                    };
                    is_visible(question, &parent_value)
                }
            };
            self.memo.insert(question.question_id.as_str(), visible);
        }

        self.memo
            .get(question_id)
            .copied()
            .ok_or_else(|| EngineError::internal("visibility memo missing evaluated question"))
    }

    fn resolve(&self, question_id: &str) -> Result<Resolved, EngineError> {
        let question = self
            .graph
            .question(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;
        let answer = self.answers.get(question_id).copied();
        resolve(question, self.graph.options_for(question_id), answer)
            .map_err(|err| EngineError::resolution(question_id, err.to_string()))
    }
}

/// Diff the visibility of every transitive dependent of `changed_id` between
/// `prior` and `next` answers.
///
/// Breadth-first from the direct children; each descendant is visited once.
/// Questions outside that subtree are never evaluated as outputs. Hidden
/// questions that still have a stored answer in `next` are reported as
/// suppressed.
pub fn recompute_subtree(
    graph: &QuestionGraph<'_>,
    changed_id: &str,
    prior: &AnswerIndex<'_>,
    next: &AnswerIndex<'_>,
    max_depth: usize,
) -> Result<VisibilityDelta, EngineError> {
    if graph.question(changed_id).is_none() {
        return Err(EngineError::not_found("question", changed_id));
    }

    let mut before = VisibilityEvaluator::new(graph, prior, max_depth);
    let mut after = VisibilityEvaluator::new(graph, next, max_depth);
    let mut delta = VisibilityDelta::default();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = graph.children_of(changed_id).iter().copied().collect();

    while let Some(question_id) = queue.pop_front() {
        if !visited.insert(question_id) {
            continue;
        }
        let was_visible = before.is_visible(question_id)?;
        let now_visible = after.is_visible(question_id)?;

        match (was_visible, now_visible) {
            (false, true) => delta.now_visible.push(question_id.to_string()),
            (true, false) => {
                delta.now_hidden.push(question_id.to_string());
                if next.contains_key(question_id) {
                    delta.suppressed.push(question_id.to_string());
                }
            }
            _ => {}
        }

        queue.extend(graph.children_of(question_id).iter().copied());
    }

    tracing::debug!(
        "Recomputed subtree of '{}': {} visited, {} now visible, {} now hidden",
        changed_id,
        visited.len(),
        delta.now_visible.len(),
        delta.now_hidden.len()
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerKind, AnswerValue, CanonicalValue, Questionnaire, Screen, VisibleIfValue};

    const DEPTH: usize = 64;

    fn question(id: &str, order: u32, kind: AnswerKind) -> Question {
        let mut q = Question::new(
            "qn".to_string(),
            "s1".to_string(),
            format!("Question {}", id),
            Some(kind),
            order,
        );
        q.question_id = id.to_string();
        q
    }

    fn child_of(id: &str, order: u32, parent: &str, rule: CanonicalValue) -> Question {
        let mut q = question(id, order, AnswerKind::ShortString);
        q.parent_question_id = Some(parent.to_string());
        q.visible_if_value = Some(VisibleIfValue::One(rule));
        q
    }

    fn snapshot(questions: Vec<Question>) -> QuestionnaireSnapshot {
        let questionnaire = Questionnaire::new("Survey".to_string());
        let mut screen = Screen::new("qn".to_string(), "One".to_string(), 1);
        screen.screen_id = "s1".to_string();
        QuestionnaireSnapshot {
            questionnaire,
            screens: vec![screen],
            questions,
            options: vec![],
        }
    }

    fn answer(question_id: &str, value: AnswerValue) -> Answer {
        Answer::new("rs".to_string(), question_id.to_string(), value)
    }

    /// q1 (boolean) -> q2 (text, visible if q1 == true) -> q3 (visible if q2 == "x")
    fn chain() -> QuestionnaireSnapshot {
        snapshot(vec![
            question("q1", 1, AnswerKind::Boolean),
            child_of("q2", 2, "q1", CanonicalValue::Bool(true)),
            child_of("q3", 3, "q2", CanonicalValue::Text("x".to_string())),
        ])
    }

    #[test]
    fn test_is_visible_rules() {
        let root = question("q1", 1, AnswerKind::Boolean);
        assert!(is_visible(&root, &Resolved::Unanswered));

        let child = child_of("q2", 2, "q1", CanonicalValue::Bool(true));
        assert!(!is_visible(&child, &Resolved::Unanswered));
        assert!(is_visible(&child, &Resolved::Value(CanonicalValue::Bool(true))));
        assert!(!is_visible(&child, &Resolved::Value(CanonicalValue::Bool(false))));
    }

    #[test]
    fn test_unanswered_parent_hides_child() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);
        let answers = AnswerIndex::new();
        let mut evaluator = VisibilityEvaluator::new(&graph, &answers, DEPTH);
        assert!(evaluator.is_visible("q1").unwrap());
        assert!(!evaluator.is_visible("q2").unwrap());
    }

    #[test]
    fn test_hidden_parent_counts_as_unanswered() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);
        // q2 answered "x" but q1 says false: q2 hidden, so q3 hidden too
        let stored = vec![
            answer("q1", AnswerValue::Bool(false)),
            answer("q2", AnswerValue::Text("x".to_string())),
        ];
        let answers = index_answers(&stored);
        let mut evaluator = VisibilityEvaluator::new(&graph, &answers, DEPTH);
        assert!(!evaluator.is_visible("q2").unwrap());
        assert!(!evaluator.is_visible("q3").unwrap());
    }

    #[test]
    fn test_subtree_delta_reports_newly_visible() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);
        let prior_answers: Vec<Answer> = vec![];
        let next_answers = vec![answer("q1", AnswerValue::Bool(true))];

        let delta = recompute_subtree(
            &graph,
            "q1",
            &index_answers(&prior_answers),
            &index_answers(&next_answers),
            DEPTH,
        )
        .unwrap();

        assert_eq!(delta.now_visible, vec!["q2"]);
        assert!(delta.now_hidden.is_empty());
        assert!(delta.suppressed.is_empty());
    }

    #[test]
    fn test_subtree_delta_cascades_and_suppresses() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);
        let prior_answers = vec![
            answer("q1", AnswerValue::Bool(true)),
            answer("q2", AnswerValue::Text("x".to_string())),
        ];
        let next_answers = vec![
            answer("q1", AnswerValue::Bool(false)),
            answer("q2", AnswerValue::Text("x".to_string())),
        ];

        let delta = recompute_subtree(
            &graph,
            "q1",
            &index_answers(&prior_answers),
            &index_answers(&next_answers),
            DEPTH,
        )
        .unwrap();

        assert_eq!(delta.now_hidden, vec!["q2", "q3"]);
        // q3 was never answered, so only q2's answer is suppressed
        assert_eq!(delta.suppressed, vec!["q2"]);
    }

    #[test]
    fn test_subtree_delta_excludes_unchanged_nodes() {
        let snap = snapshot(vec![
            question("q1", 1, AnswerKind::Number),
            child_of("a", 2, "q1", CanonicalValue::Number(1.0)),
            child_of("b", 3, "q1", CanonicalValue::Number(2.0)),
        ]);
        let graph = QuestionGraph::build(&snap);
        let prior_answers = vec![answer("q1", AnswerValue::Number(1.0))];
        let next_answers = vec![answer("q1", AnswerValue::Number(1.0))];

        let delta = recompute_subtree(
            &graph,
            "q1",
            &index_answers(&prior_answers),
            &index_answers(&next_answers),
            DEPTH,
        )
        .unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_subtree_never_touches_other_branches() {
        // Two independent roots; changing r1 must not report r2's child
        let snap = snapshot(vec![
            question("r1", 1, AnswerKind::Boolean),
            question("r2", 2, AnswerKind::Boolean),
            child_of("c1", 3, "r1", CanonicalValue::Bool(true)),
            child_of("c2", 4, "r2", CanonicalValue::Bool(true)),
        ]);
        let graph = QuestionGraph::build(&snap);
        let prior_answers: Vec<Answer> = vec![];
        let next_answers = vec![answer("r1", AnswerValue::Bool(true))];

        let delta = recompute_subtree(
            &graph,
            "r1",
            &index_answers(&prior_answers),
            &index_answers(&next_answers),
            DEPTH,
        )
        .unwrap();
        assert_eq!(delta.now_visible, vec!["c1"]);
    }

    #[test]
    fn test_check_parent_link_rejects_self_and_cycles() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);

        assert!(matches!(
            check_parent_link(&graph, "q2", "q2", DEPTH),
            Err(EngineError::SelfReference { .. })
        ));
        // q1 -> q3 would close q1 <- q2 <- q3 <- q1
        assert!(matches!(
            check_parent_link(&graph, "q1", "q3", DEPTH),
            Err(EngineError::CycleDetected { .. })
        ));
        assert!(matches!(
            check_parent_link(&graph, "q3", "missing", DEPTH),
            Err(EngineError::NotFound { .. })
        ));
        assert!(check_parent_link(&graph, "q3", "q1", DEPTH).is_ok());
    }

    #[test]
    fn test_check_parent_link_is_bounded() {
        let snap = chain();
        let graph = QuestionGraph::build(&snap);
        // q3's chain is two levels deep; a bound of one trips the guard
        assert!(matches!(
            check_parent_link(&graph, "other", "q3", 1),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_children_follow_question_order() {
        let snap = snapshot(vec![
            question("p", 1, AnswerKind::Boolean),
            child_of("late", 3, "p", CanonicalValue::Bool(true)),
            child_of("early", 2, "p", CanonicalValue::Bool(true)),
        ]);
        let graph = QuestionGraph::build(&snap);
        assert_eq!(graph.children_of("p"), &["early", "late"]);
        assert!(graph.children_of("late").is_empty());
    }
}
