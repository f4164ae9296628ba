//! Web fallback node: when local retrieval comes up sparse, search the web
//! for the active subtask's query. One found document is enough to clear a
//! lingering retrieval error and put the turn back on the running path.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{ChatMessage, WorkflowStatus};
use crate::web::WebSearchTool;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

pub struct WebSearchNode {
    tool: Arc<dyn WebSearchTool>,
    max_results: usize,
}

impl WebSearchNode {
    pub fn new(tool: Arc<dyn WebSearchTool>, max_results: usize) -> Self {
        Self { tool, max_results }
    }
}

#[async_trait]
impl WorkflowNode for WebSearchNode {
    fn name(&self) -> &'static str {
        "web_fallback"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        // Prefer the active subtask's focused query over the raw turn query.
        let query = state
            .current_subtask()
            .map(|s| s.query.clone())
            .unwrap_or_else(|| state.effective_query().to_string());

        tracing::info!("Web fallback searching for '{query}'");
        // The guarded tool degrades failures to empty results itself.
        let documents = self.tool.search(&query, self.max_results).await.unwrap_or_default();

        if documents.is_empty() {
            tracing::warn!("Web fallback found nothing for '{query}'");
            return StateDelta::default()
                .with_warning(format!("Web search returned no results for '{query}'"))
                .with_metadata(
                    "web_search",
                    serde_json::json!({"query": query, "results": 0}),
                );
        }

        tracing::info!("Web fallback found {} document(s)", documents.len());
        StateDelta {
            documents: documents.clone(),
            // A successful fallback supersedes the empty-retrieval error.
            clear_error: true,
            workflow_status: Some(WorkflowStatus::Running),
            messages: vec![ChatMessage::assistant(format!(
                "Supplemented with {} web result(s) for '{query}'",
                documents.len()
            ))],
            ..Default::default()
        }
        .with_metadata(
            "web_search",
            serde_json::json!({"query": query, "results": documents.len()}),
        )
    }
}
