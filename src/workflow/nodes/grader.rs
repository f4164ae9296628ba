//! Answer-quality gate: score the answer against the original query on
//! four dimensions; failures feed the synthesizer's improved mode.

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::schemas::AnswerGradeResult;
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::QualityReport;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

/// Every dimension must clear this floor regardless of the overall score.
const DIMENSION_FLOOR: f32 = 0.5;

pub struct AnswerGrader {
    model: Arc<dyn ChatModel>,
    threshold: f32,
}

impl AnswerGrader {
    pub fn new(model: Arc<dyn ChatModel>, threshold: f32) -> Self {
        Self { model, threshold }
    }
}

#[async_trait]
impl WorkflowNode for AnswerGrader {
    fn name(&self) -> &'static str {
        "answer_grader"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let Some(answer) = state
            .intermediate_answer
            .as_deref()
            .or(state.final_answer.as_deref())
        else {
            return StateDelta {
                grade_report: Some(QualityReport {
                    is_valid: false,
                    score: 0.0,
                    reasons: vec!["no answer to grade".to_string()],
                    suggestions: vec!["generate an answer first".to_string()],
                    needs_retry: false,
                }),
                ..Default::default()
            }
            .with_warning("No answer available for grading");
        };

        let prompt = format!(
            "You are a quality evaluator for a document question-answering \
             system. Score the answer against the query on four dimensions, \
             each 0.0-1.0:\n\
             - completeness: does it address every aspect of the query?\n\
             - relevance: does it answer what was actually asked?\n\
             - clarity: is it well structured and easy to follow?\n\
             - accuracy: are statements precise and properly cited with [n] \
             references?\n\n\
             Identify missing aspects and give concrete improvement \
             suggestions; note strengths worth keeping.\n\n\
             Original Query: {query}\n\n\
             Generated Answer:\n{answer}\n\n\
             Return fields: completeness, relevance, clarity, accuracy, \
             missing_aspects, improvement_suggestions, strengths, reasoning.",
            query = sanitize_for_prompt(state.effective_query()),
            answer = sanitize_for_prompt(answer),
        );

        match generate_structured::<AnswerGradeResult>(self.model.as_ref(), &prompt, 0.0).await {
            Ok(grade) => {
                let overall = grade.overall().clamp(0.0, 1.0);
                let all_dimensions_pass =
                    grade.dimensions().iter().all(|d| *d >= DIMENSION_FLOOR);
                let is_valid = overall >= self.threshold && all_dimensions_pass;
                tracing::info!(
                    "Answer grade: overall {overall:.2} \
                     (c {:.2} / r {:.2} / cl {:.2} / a {:.2}) -> {}",
                    grade.completeness,
                    grade.relevance,
                    grade.clarity,
                    grade.accuracy,
                    if is_valid { "accept" } else { "retry" }
                );

                StateDelta {
                    grade_report: Some(QualityReport {
                        is_valid,
                        score: overall,
                        reasons: grade.missing_aspects.clone(),
                        suggestions: grade.improvement_suggestions.clone(),
                        needs_retry: !is_valid,
                    }),
                    ..Default::default()
                }
                .with_metadata(
                    "answer_grade",
                    serde_json::json!({
                        "overall": overall,
                        "completeness": grade.completeness,
                        "relevance": grade.relevance,
                        "clarity": grade.clarity,
                        "accuracy": grade.accuracy,
                        "strengths": grade.strengths,
                        "reasoning": grade.reasoning,
                    }),
                )
            }
            Err(err) => StateDelta::failure(self.name(), format!("answer grading failed: {err}")),
        }
    }
}
