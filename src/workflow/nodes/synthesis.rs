//! Answer synthesis: one schema-constrained model call over the prepared
//! document context, with a corrective mode for hallucination retries and
//! an improved mode for grading retries. The synthesizer is the only node
//! that increments `retry_count`, exactly once per retry invocation.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::schemas::SynthesisResult;
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::{ChatMessage, Document, QualityReport};
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

/// Prompt size ceiling before the truncated-document fallback kicks in.
const MAX_PROMPT_CHARS: usize = 24_000;
/// Per-document content cap in the truncated fallback.
const TRUNCATED_CONTENT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SynthesisMode {
    Initial,
    Corrective,
    Improved,
}

pub struct Synthesizer {
    model: Arc<dyn ChatModel>,
    /// Entity types (from the runtime-discovered vocabulary) that mark
    /// documents embedded inside other documents; configured, not coded.
    embedded_entity_types: Vec<String>,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn ChatModel>, embedded_entity_types: Vec<String>) -> Self {
        Self {
            model,
            embedded_entity_types,
        }
    }

    fn is_embedded_type(&self, entity_type: &str) -> bool {
        self.embedded_entity_types.iter().any(|t| t == entity_type)
    }

    /// Stable preparation order: human-verified documents lead, entity
    /// documents follow, plain content last. First occurrence wins — a
    /// document appears exactly once under its strongest role.
    fn prepare_order<'a>(&self, documents: &'a [Document]) -> Vec<&'a Document> {
        let mut ordered: Vec<&Document> = Vec::with_capacity(documents.len());
        for doc in documents {
            if doc.metadata.human_feedback.as_deref().is_some_and(|f| !f.trim().is_empty()) {
                ordered.push(doc);
            }
        }
        for doc in documents {
            if doc.metadata.entity.is_some()
                && !ordered.iter().any(|d| d.id == doc.id)
            {
                ordered.push(doc);
            }
        }
        for doc in documents {
            if !ordered.iter().any(|d| d.id == doc.id) {
                ordered.push(doc);
            }
        }
        ordered
    }

    fn format_document(&self, idx: usize, doc: &Document, truncate: bool) -> String {
        let mut text = format!(
            "[{idx}] Document Reference:\n- Source: {}\n- Page: {}\n- Category: {}\n",
            doc.metadata.source, doc.metadata.page, doc.metadata.category
        );

        if let Some(feedback) = &doc.metadata.human_feedback {
            if !feedback.trim().is_empty() {
                let _ = writeln!(text, "- Human Verified Content: {feedback}");
            }
        }

        if let Some(entity) = &doc.metadata.entity {
            let label = if self.is_embedded_type(&entity.entity_type) {
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
            if !entity.hypothetical_questions.is_empty() {
                let questions: Vec<&str> = entity
                    .hypothetical_questions
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect();
                let _ = writeln!(text, "  Can Answer: {}", questions.join("; "));
            }
        }

        if let Some(caption) = &doc.metadata.caption {
            if !caption.is_empty() {
                let _ = writeln!(text, "- Caption: {caption}");
            }
        }

        let content = sanitize_for_prompt(&doc.content);
        let content = if truncate {
            content.chars().take(TRUNCATED_CONTENT_CHARS).collect::<String>()
        } else {
            content
        };
        let _ = writeln!(text, "- Content:\n{content}\n---");
        let _ = writeln!(text, "Cite this document as [{idx}].");
        text
    }

    fn format_documents(&self, documents: &[Document], truncate: bool) -> String {
        let ordered = self.prepare_order(documents);
        ordered
            .iter()
            .enumerate()
            .map(|(i, doc)| self.format_document(i + 1, doc, truncate))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn base_instructions(&self, has_embedded: bool) -> String {
        let mut instructions = String::from(
            "You are an expert assistant for a document question-answering \
             system. Generate a comprehensive, accurate answer based ONLY on \
             the provided documents.\n\
             Guidelines:\n\
             1. If information is not in the documents, say so clearly.\n\
             2. Cite sources inline with reference numbers [1], [2], etc., \
             placed right after the statement they support.\n\
             3. Keep the same reference number for the same document \
             throughout.\n\
             4. Include concrete details: numbers, procedures, specifications.\n\
             5. Answer in the language of the query.\n",
        );
        if has_embedded {
            instructions.push_str(
                "6. Some documents are embedded documents (a document carried \
                 inside another document). When you cite one, explicitly say it \
                 is an embedded document and give its title.\n",
            );
        }
        instructions.push_str(
            "\nReturn fields: answer (with inline citations), confidence \
             (0.0-1.0), sources_used (e.g. [\"[1]\", \"[2]\"]), key_points, \
             references_table (markdown table: reference | source | page | \
             summary), warnings, entity_references, human_feedback_used.",
        );
        instructions
    }

    fn mode_preamble(mode: SynthesisMode, state: &TurnState) -> String {
        match mode {
            SynthesisMode::Initial => String::new(),
            SynthesisMode::Corrective => {
                let report = state.hallucination_report.as_ref();
                let flagged = report
                    .map(|r| r.reasons.join("\n  - "))
                    .unwrap_or_default();
                format!(
                    "CRITICAL: this is a RETRY because the previous answer \
                     contained claims the documents do not support.\n\
                     Claims to avoid or ground explicitly:\n  - {flagged}\n\
                     Be extremely conservative: state only what the documents \
                     explicitly say, cite a reference number for EVERY factual \
                     sentence, and where detail is missing write that the \
                     documents do not specify it.\n\n"
                )
            }
            SynthesisMode::Improved => {
                let report = state.grade_report.as_ref();
                let suggestions = report
                    .map(|r| r.suggestions.join("\n  - "))
                    .unwrap_or_default();
                format!(
                    "IMPORTANT: this is a RETRY to improve answer quality.\n\
                     Apply these improvement suggestions:\n  - {suggestions}\n\
                     Keep the parts that were already correct, address every \
                     missing aspect, and structure the answer clearly.\n\n"
                )
            }
        }
    }

    async fn generate(
        &self,
        query: &str,
        documents: &[Document],
        mode: SynthesisMode,
        state: &TurnState,
    ) -> anyhow::Result<SynthesisResult> {
        let has_embedded = documents.iter().any(|d| {
            d.metadata
                .entity
                .as_ref()
                .is_some_and(|e| self.is_embedded_type(&e.entity_type))
        });
        let temperature = match mode {
            SynthesisMode::Corrective => 0.0,
            _ => 0.1,
        };

        let build_prompt = |docs_block: &str| {
            format!(
                "{preamble}{instructions}\n\nQuery: {query}\n\nRetrieved Documents:\n{docs_block}",
                preamble = Self::mode_preamble(mode, state),
                instructions = self.base_instructions(has_embedded),
                query = sanitize_for_prompt(query),
            )
        };

        let prompt = build_prompt(&self.format_documents(documents, false));
        let prompt = if prompt.chars().count() > MAX_PROMPT_CHARS {
            tracing::warn!(
                "Synthesis prompt over budget ({} chars); truncating document content",
                prompt.chars().count()
            );
            build_prompt(&self.format_documents(documents, true))
        } else {
            prompt
        };

        generate_structured::<SynthesisResult>(self.model.as_ref(), &prompt, temperature).await
    }
}

fn detect_mode(
    hallucination: Option<&QualityReport>,
    grade: Option<&QualityReport>,
) -> SynthesisMode {
    if hallucination.is_some_and(|r| r.needs_retry) {
        SynthesisMode::Corrective
    } else if grade.is_some_and(|r| r.needs_retry) {
        SynthesisMode::Improved
    } else {
        SynthesisMode::Initial
    }
}

#[async_trait]
impl WorkflowNode for Synthesizer {
    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let query = state.effective_query().to_string();
        let documents = &state.documents;

        if documents.is_empty() {
            return StateDelta::failure(self.name(), "no documents available for synthesis");
        }

        let mode = detect_mode(
            state.hallucination_report.as_ref(),
            state.grade_report.as_ref(),
        );
        let retry_count = match mode {
            SynthesisMode::Initial => state.retry_count,
            _ => state.retry_count + 1,
        };
        if mode != SynthesisMode::Initial {
            tracing::info!("Synthesis retry {retry_count} in {mode:?} mode");
        }

        match self.generate(&query, documents, mode, state).await {
            Ok(result) => {
                let mut answer = result.answer.clone();
                if !result.references_table.trim().is_empty()
                    && !answer.contains("References")
                {
                    answer = format!("{answer}\n\n## References\n{}", result.references_table);
                }
                tracing::info!(
                    "Answer synthesized with confidence {:.2} using {} source(s)",
                    result.confidence,
                    result.sources_used.len()
                );

                StateDelta {
                    final_answer: Some(answer.clone()),
                    intermediate_answer: Some(result.answer.clone()),
                    confidence: Some(result.confidence.clamp(0.0, 1.0)),
                    retry_count: Some(retry_count),
                    messages: vec![ChatMessage::assistant(answer)],
                    warnings: result.warnings.clone(),
                    ..Default::default()
                }
                .with_metadata(
                    "synthesis",
                    serde_json::json!({
                        "documents_used": documents.len(),
                        "sources": result.sources_used,
                        "key_points": result.key_points,
                        "entity_references": result.entity_references,
                        "human_feedback_used": result.human_feedback_used,
                        "mode": format!("{mode:?}").to_lowercase(),
                    }),
                )
            }
            Err(err) => StateDelta {
                retry_count: Some(retry_count),
                ..StateDelta::failure(self.name(), format!("synthesis failed: {err}"))
            },
        }
    }
}
