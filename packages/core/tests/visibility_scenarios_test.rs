//! Visibility Scenario Tests
//!
//! End-to-end checks of conditional questions through the public services:
//! filtered screen reads, visibility deltas on answer writes, suppression
//! retention and bounded blast radius.

#[cfg(test)]
mod visibility_scenario_tests {
    use anyhow::Result;
    use questionnaire_core::operations::{
        AddAnswerOptionParams, CreateQuestionParams, CreateQuestionnaireParams,
        CreateScreenParams, SetVisibilityParams, WriteAnswerParams,
    };
    use questionnaire_core::{
        AnswerKind, AnswerValue, EngineConfig, EngineError, InMemoryStore, Precondition,
        QuestionnaireEngine,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        engine: QuestionnaireEngine,
        questionnaire_id: String,
        screen_id: String,
        response_set_id: String,
    }

    fn key() -> Precondition {
        Precondition::idempotency_key(Uuid::new_v4().to_string())
    }

    /// Helper: questionnaire with one screen and an empty response set
    async fn fixture() -> Result<Fixture> {
        let engine =
            QuestionnaireEngine::new(Arc::new(InMemoryStore::new()), EngineConfig::default());
        let questionnaire = engine
            .authoring
            .create_questionnaire(
                CreateQuestionnaireParams {
                    title: "Health survey".to_string(),
                },
                &key(),
            )
            .await?;
        let questionnaire_id = questionnaire.entity.questionnaire_id;
        let screen = engine
            .authoring
            .create_screen(
                &questionnaire_id,
                CreateScreenParams {
                    title: "Habits".to_string(),
                    proposed_position: None,
                },
                &key(),
            )
            .await?;
        let response_set = engine
            .responses
            .create_response_set(&questionnaire_id, &key())
            .await?;

        Ok(Fixture {
            engine,
            questionnaire_id,
            screen_id: screen.entity.screen_id,
            response_set_id: response_set.entity.response_set_id,
        })
    }

    impl Fixture {
        async fn question(&self, text: &str, kind: AnswerKind) -> Result<String> {
            let created = self
                .engine
                .authoring
                .create_question(
                    &self.questionnaire_id,
                    &self.screen_id,
                    CreateQuestionParams {
                        question_text: text.to_string(),
                        answer_kind: Some(kind),
                        proposed_position: None,
                    },
                    &key(),
                )
                .await?;
            Ok(created.entity.question_id)
        }

        async fn link(&self, child: &str, parent: &str, rule: Value) -> Result<()> {
            let view = self
                .engine
                .authoring
                .get_question(&self.questionnaire_id, child)
                .await?;
            self.engine
                .authoring
                .set_visibility(
                    &self.questionnaire_id,
                    child,
                    SetVisibilityParams {
                        parent_question_id: parent.to_string(),
                        visible_if_value: rule,
                    },
                    &Precondition::if_match(view.etag),
                )
                .await?;
            Ok(())
        }

        /// Write an answer, supplying the current etag when one exists
        async fn answer(
            &self,
            question_id: &str,
            value: AnswerValue,
        ) -> Result<questionnaire_core::AnswerWriteResult, EngineError> {
            let existing = self
                .engine
                .responses
                .get_stored_answer(&self.response_set_id, question_id)
                .await?;
            let precondition = match existing {
                Some(view) => Precondition::if_match(view.etag),
                None => Precondition::none(),
            };
            self.engine
                .responses
                .write_answer(
                    WriteAnswerParams {
                        response_set_id: self.response_set_id.clone(),
                        question_id: question_id.to_string(),
                        value,
                    },
                    &precondition,
                )
                .await
        }

        async fn visible_ids(&self) -> Result<Vec<String>> {
            let read = self
                .engine
                .responses
                .read_screen(&self.response_set_id, &self.screen_id)
                .await?;
            Ok(read.questions.into_iter().map(|q| q.question_id).collect())
        }
    }

    #[tokio::test]
    async fn test_child_absent_while_parent_unanswered() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!("true")).await?;

        assert_eq!(f.visible_ids().await?, vec![q1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_answering_parent_reveals_child() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!("true")).await?;

        let result = f.answer(&q1, AnswerValue::Bool(true)).await?;

        assert!(result.saved);
        let delta = result.visibility_delta.expect("delta should be present");
        assert_eq!(delta.now_visible, vec![q2.clone()]);
        assert!(delta.now_hidden.is_empty());
        assert_eq!(result.suppressed_answers, Some(vec![]));
        assert_eq!(f.visible_ids().await?, vec![q1, q2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_hiding_child_suppresses_but_retains_answer() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!(true)).await?;

        f.answer(&q1, AnswerValue::Bool(true)).await?;
        f.answer(&q2, AnswerValue::Text("x".to_string())).await?;
        let result = f.answer(&q1, AnswerValue::Bool(false)).await?;

        let delta = result.visibility_delta.expect("delta should be present");
        assert_eq!(delta.now_hidden, vec![q2.clone()]);
        assert!(delta.now_visible.is_empty());
        assert_eq!(result.suppressed_answers, Some(vec![q2.clone()]));

        // Suppressed, not deleted
        let stored = f
            .engine
            .responses
            .get_stored_answer(&f.response_set_id, &q2)
            .await?
            .expect("answer should be retained");
        assert_eq!(stored.entity, AnswerValue::Text("x".to_string()));

        // ...and absent from the read
        assert_eq!(f.visible_ids().await?, vec![q1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_hiding_cascades_through_grandchildren() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Employed?", AnswerKind::Boolean).await?;
        let q2 = f.question("Sector", AnswerKind::ShortString).await?;
        let q3 = f.question("Years in public sector", AnswerKind::Number).await?;
        f.link(&q2, &q1, json!(true)).await?;
        f.link(&q3, &q2, json!("public")).await?;

        f.answer(&q1, AnswerValue::Bool(true)).await?;
        let revealed = f.answer(&q2, AnswerValue::Text("  public ".to_string())).await?;
        assert_eq!(
            revealed.visibility_delta.map(|d| d.now_visible),
            Some(vec![q3.clone()])
        );

        let hidden = f.answer(&q1, AnswerValue::Bool(false)).await?;
        let delta = hidden.visibility_delta.expect("delta should be present");
        assert_eq!(delta.now_hidden, vec![q2.clone(), q3.clone()]);
        // q3 was never answered
        assert_eq!(hidden.suppressed_answers, Some(vec![q2.clone()]));

        // Retained answers bring the whole chain back
        let shown = f.answer(&q1, AnswerValue::Bool(true)).await?;
        assert_eq!(
            shown.visibility_delta.map(|d| d.now_visible),
            Some(vec![q2, q3])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_visibility_omits_delta() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!(true)).await?;

        f.answer(&q1, AnswerValue::Bool(true)).await?;
        let again = f.answer(&q1, AnswerValue::Bool(true)).await?;

        assert!(again.visibility_delta.is_none());
        assert!(again.suppressed_answers.is_none());
        let value = serde_json::to_value(&again)?;
        assert_eq!(value.as_object().map(|o| o.len()), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_answer_never_touches_unrelated_branch() -> Result<()> {
        let f = fixture().await?;
        let a = f.question("Branch A root", AnswerKind::Boolean).await?;
        let b = f.question("Branch B root", AnswerKind::Boolean).await?;
        let a_child = f.question("A detail", AnswerKind::LongText).await?;
        let b_child = f.question("B detail", AnswerKind::LongText).await?;
        f.link(&a_child, &a, json!(true)).await?;
        f.link(&b_child, &b, json!(true)).await?;

        f.answer(&b, AnswerValue::Bool(true)).await?;
        let result = f.answer(&a, AnswerValue::Bool(true)).await?;

        let delta = result.visibility_delta.expect("delta should be present");
        assert_eq!(delta.now_visible, vec![a_child]);
        assert!(!delta.now_hidden.contains(&b_child));
        Ok(())
    }

    #[tokio::test]
    async fn test_enum_parent_matches_option_value() -> Result<()> {
        let f = fixture().await?;
        let diet = f.question("Diet", AnswerKind::EnumSingle).await?;
        let mut option_ids = Vec::new();
        for value in ["omnivore", "vegan"] {
            let option = f
                .engine
                .authoring
                .add_answer_option(
                    &f.questionnaire_id,
                    &diet,
                    AddAnswerOptionParams {
                        value: value.to_string(),
                        label: None,
                    },
                    &key(),
                )
                .await?;
            option_ids.push(option.entity.option_id);
        }
        let b12 = f.question("Do you take B12?", AnswerKind::Boolean).await?;
        f.link(&b12, &diet, json!(["vegan"])).await?;

        let omnivore = f
            .answer(&diet, AnswerValue::OptionId(option_ids[0].clone()))
            .await?;
        assert!(omnivore.visibility_delta.is_none());

        let vegan = f
            .answer(&diet, AnswerValue::OptionId(option_ids[1].clone()))
            .await?;
        assert_eq!(
            vegan.visibility_delta.map(|d| d.now_visible),
            Some(vec![b12.clone()])
        );

        let read = f
            .engine
            .responses
            .read_screen(&f.response_set_id, &f.screen_id)
            .await?;
        let diet_view = read
            .questions
            .iter()
            .find(|q| q.question_id == diet)
            .expect("diet should be visible");
        assert_eq!(diet_view.options.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_number_rule_uses_numeric_equality() -> Result<()> {
        let f = fixture().await?;
        let count = f.question("Household size", AnswerKind::Number).await?;
        let follow = f.question("Living alone?", AnswerKind::Boolean).await?;
        f.link(&follow, &count, json!("1")).await?;

        let result = f.answer(&count, AnswerValue::Number(1.0)).await?;
        assert_eq!(
            result.visibility_delta.map(|d| d.now_visible),
            Some(vec![follow.clone()])
        );

        // No ordering semantics: 2 is not "at least 1"
        let result = f.answer(&count, AnswerValue::Number(2.0)).await?;
        assert_eq!(
            result.visibility_delta.map(|d| d.now_hidden),
            Some(vec![follow])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_incompatible_answer_is_rejected() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Age", AnswerKind::Number).await?;

        let err = f
            .answer(&q1, AnswerValue::Text("forty".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompatibleAnswer { .. }));

        let err = f
            .answer(&q1, AnswerValue::Number(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompatibleAnswer { .. }));

        assert!(f
            .engine
            .responses
            .get_stored_answer(&f.response_set_id, &q1)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_consecutive_reads_are_identical() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!(true)).await?;
        f.answer(&q1, AnswerValue::Bool(true)).await?;

        let first = f
            .engine
            .responses
            .read_screen(&f.response_set_id, &f.screen_id)
            .await?;
        let second = f
            .engine
            .responses
            .read_screen(&f.response_set_id, &f.screen_id)
            .await?;
        assert_eq!(first, second);
        assert_eq!(first.questions[0].answer, Some(AnswerValue::Bool(true)));
        assert_eq!(first.questions[1].answer, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_omits_rule_metadata() -> Result<()> {
        let f = fixture().await?;
        let q1 = f.question("Do you smoke?", AnswerKind::Boolean).await?;
        let q2 = f.question("How many per day?", AnswerKind::ShortString).await?;
        f.link(&q2, &q1, json!(true)).await?;
        f.answer(&q1, AnswerValue::Bool(true)).await?;

        let read = f
            .engine
            .responses
            .read_screen(&f.response_set_id, &f.screen_id)
            .await?;
        let value = serde_json::to_value(&read)?;
        let text = value.to_string();
        assert!(!text.contains("parent_question_id"));
        assert!(!text.contains("visible_if_value"));
        Ok(())
    }
}
