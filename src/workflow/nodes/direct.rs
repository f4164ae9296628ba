//! Direct response for simple queries: one model call, no retrieval.
//! Explicitly time-sensitive questions may pull in a web search first.

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{sanitize_for_prompt, ChatModel};
use crate::models::{ChatMessage, WorkflowStatus};
use crate::web::WebSearchTool;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

const DIRECT_TEMPERATURE: f32 = 0.7;
const TIME_SENSITIVE_CUES: &[&str] = &[
    "today", "latest", "current", "recent", "news", "now", "this year", "오늘", "최신", "현재",
    "요즘", "올해",
];

pub struct DirectResponder {
    model: Arc<dyn ChatModel>,
    web: Option<Arc<dyn WebSearchTool>>,
    web_max_results: usize,
}

impl DirectResponder {
    pub fn new(
        model: Arc<dyn ChatModel>,
        web: Option<Arc<dyn WebSearchTool>>,
        web_max_results: usize,
    ) -> Self {
        Self {
            model,
            web,
            web_max_results,
        }
    }
}

fn is_time_sensitive(query: &str) -> bool {
    let lower = query.to_lowercase();
    TIME_SENSITIVE_CUES.iter().any(|cue| lower.contains(cue))
}

#[async_trait]
impl WorkflowNode for DirectResponder {
    fn name(&self) -> &'static str {
        "direct_responder"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let query = sanitize_for_prompt(&state.query);

        let mut web_context = String::new();
        if let Some(web) = &self.web {
            if is_time_sensitive(&query) {
                match web.search(&query, self.web_max_results).await {
                    Ok(results) if !results.is_empty() => {
                        tracing::info!(
                            "Time-sensitive query; attached {} web snippets",
                            results.len()
                        );
                        let snippets: Vec<String> = results
                            .iter()
                            .map(|d| format!("- {} ({})", d.content, d.metadata.source))
                            .collect();
                        web_context = format!(
                            "\n\nCurrent information from a web search:\n{}",
                            snippets.join("\n")
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!("Web lookup for direct response failed: {err}");
                    }
                }
            }
        }

        let prompt = format!(
            "You are a helpful assistant for a document question-answering \
             service. Answer the user's query directly and naturally. If asked \
             about the indexed documentation, mention that detailed technical \
             questions can be answered from the document corpus. Keep the \
             response concise and respond in the same language as the \
             query.{web_context}\n\nQuery: {query}"
        );

        match self.model.generate(&prompt, DIRECT_TEMPERATURE).await {
            Ok(answer) => StateDelta {
                final_answer: Some(answer.clone()),
                confidence: Some(0.9),
                workflow_status: Some(WorkflowStatus::Completed),
                messages: vec![ChatMessage::assistant(answer)],
                ..Default::default()
            },
            Err(err) => StateDelta::failure(self.name(), format!("Direct response failed: {err}")),
        }
    }
}
