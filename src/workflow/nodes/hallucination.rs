//! Hallucination gate: decompose the answer into claims and check each one
//! against the retrieved documents. Entity annotations and human-verified
//! text count as ground truth.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::schemas::HallucinationVerdict;
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::{Document, QualityReport};
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

pub struct HallucinationChecker {
    model: Arc<dyn ChatModel>,
    threshold: f32,
    embedded_entity_types: Vec<String>,
}

impl HallucinationChecker {
    pub fn new(
        model: Arc<dyn ChatModel>,
        threshold: f32,
        embedded_entity_types: Vec<String>,
    ) -> Self {
        Self {
            model,
            threshold,
            embedded_entity_types,
        }
    }

    /// Ground-truth rendering: full content plus any structured evidence
    /// (human verification, entity fields) the checker may rely on.
    fn format_documents(&self, documents: &[Document]) -> String {
        let mut text = String::new();
        for (idx, doc) in documents.iter().enumerate() {
            let _ = write!(
                text,
                "Document {}:\n- Source: {}\n- Page: {}\n- Category: {}\n",
                idx + 1,
                doc.metadata.source,
                doc.metadata.page,
                doc.metadata.category
            );
            if let Some(feedback) = &doc.metadata.human_feedback {
                if !feedback.trim().is_empty() {
                    let _ = writeln!(text, "- Human Verified Content: {feedback}");
                }
            }
            if let Some(entity) = &doc.metadata.entity {
                let label = if self.embedded_entity_types.contains(&entity.entity_type) {
                    format!("Embedded Document ({})", entity.entity_type)
                } else {
                    format!("Entity ({})", entity.entity_type)
                };
                let _ = writeln!(text, "- {label}:");
                if let Some(title) = &entity.title {
                    let _ = writeln!(text, "  Title: {title}");
                }
                if let Some(details) = &entity.details {
                    let _ = writeln!(text, "  Details: {details}");
                }
                if !entity.keywords.is_empty() {
                    let _ = writeln!(text, "  Keywords: {}", entity.keywords.join(", "));
                }
            }
            if let Some(caption) = &doc.metadata.caption {
                if !caption.is_empty() {
                    let _ = writeln!(text, "- Caption: {caption}");
                }
            }
            let _ = writeln!(text, "- Full Content:\n{}\n---", sanitize_for_prompt(&doc.content));
        }
        text
    }
}

#[async_trait]
impl WorkflowNode for HallucinationChecker {
    fn name(&self) -> &'static str {
        "hallucination_checker"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let Some(answer) = state.final_answer.as_deref() else {
            return StateDelta::failure(self.name(), "no answer to check");
        };

        if state.documents.is_empty() {
            // No ground truth to check against: fatal, not retriable.
            return StateDelta {
                hallucination_report: Some(QualityReport {
                    is_valid: false,
                    score: 1.0,
                    reasons: vec!["no supporting documents available".to_string()],
                    suggestions: vec![],
                    needs_retry: false,
                }),
                ..Default::default()
            }
            .with_warning("Hallucination check impossible: no documents");
        }

        let prompt = format!(
            "You are a strict fact-checker. Verify whether the generated \
             answer is fully grounded in the source documents.\n\n\
             NOT hallucinations: statements that information is absent from \
             the documents, citation markers like [1], a References section, \
             and conservative hedging. These are grounded behavior.\n\n\
             Process: extract every factual claim from the answer, check each \
             against the documents (entity fields and human-verified content \
             are ground truth too), and list unsupported claims.\n\n\
             Score: 0.0 = every claim supported; 0.4-0.6 = some unsupported \
             side details; 0.7-0.9 = major unsupported claims; 1.0 = \
             fabricated. Numbers, procedures and specifications must match \
             exactly.\n\n\
             Original Query: {query}\n\n\
             Generated Answer:\n{answer}\n\n\
             Source Documents:\n{documents}\n\n\
             Return fields: is_grounded, hallucination_score, \
             problematic_claims, supported_claims, reasoning.",
            query = sanitize_for_prompt(state.effective_query()),
            answer = sanitize_for_prompt(answer),
            documents = self.format_documents(&state.documents),
        );

        match generate_structured::<HallucinationVerdict>(self.model.as_ref(), &prompt, 0.0).await {
            Ok(verdict) => {
                let score = verdict.hallucination_score.clamp(0.0, 1.0);
                let is_valid = score <= self.threshold;
                tracing::info!(
                    "Hallucination check: score {score:.2} (threshold {:.2}) -> {}",
                    self.threshold,
                    if is_valid { "valid" } else { "retry" }
                );

                let suggestions = verdict
                    .problematic_claims
                    .iter()
                    .map(|claim| format!("Remove or ground this claim: {claim}"))
                    .collect();

                StateDelta {
                    hallucination_report: Some(QualityReport {
                        is_valid,
                        score,
                        reasons: verdict.problematic_claims,
                        suggestions,
                        needs_retry: !is_valid,
                    }),
                    ..Default::default()
                }
                .with_metadata(
                    "hallucination_check",
                    serde_json::json!({
                        "score": score,
                        "is_grounded": verdict.is_grounded,
                        "supported_claims": verdict.supported_claims,
                        "reasoning": verdict.reasoning,
                    }),
                )
            }
            Err(err) => StateDelta::failure(self.name(), format!("hallucination check failed: {err}")),
        }
    }
}
