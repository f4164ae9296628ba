//! Query routing: classify each turn as simple / rag_required /
//! history_required, and resolve history references into a self-contained
//! query when needed.

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::schemas::{QueryClassification, ResolvedQuery};
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::QueryType;
use crate::workflow::nodes::{recent_messages, WorkflowNode};
use crate::workflow::state::{StateDelta, TurnState};

const HISTORY_WINDOW: usize = 10;

pub struct QueryRouter {
    model: Arc<dyn ChatModel>,
}

impl QueryRouter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn classification_prompt(state: &TurnState) -> String {
        format!(
            "You are a query classifier for a document question-answering system. \
             Decide how the query should be handled, using reasoning rather than \
             keyword matching.\n\n\
             Types:\n\
             1. \"simple\": answerable with general knowledge or social conversation; \
             no document search needed.\n\
             2. \"rag_required\": needs information from the indexed document corpus \
             (specifications, procedures, standards, domain facts).\n\
             3. \"history_required\": contains unresolved references to earlier turns \
             (\"it\", \"that one\", \"이전에\", \"아까\") and must be rewritten before \
             retrieval.\n\n\
             Query: {query}\n\n\
             Recent messages (for context):\n{messages}\n\n\
             Return fields: type, confidence (0.0-1.0), reasoning.",
            query = sanitize_for_prompt(&state.query),
            messages = recent_messages(state, HISTORY_WINDOW),
        )
    }
}

#[async_trait]
impl WorkflowNode for QueryRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let prompt = Self::classification_prompt(state);

        match generate_structured::<QueryClassification>(self.model.as_ref(), &prompt, 0.0).await {
            Ok(classification) => {
                tracing::info!(
                    "Query classified as {:?} (confidence {:.2})",
                    classification.query_type,
                    classification.confidence
                );
                StateDelta {
                    query_type: Some(classification.query_type),
                    ..Default::default()
                }
                .with_metadata(
                    "query_classification",
                    serde_json::json!({
                        "type": classification.query_type,
                        "confidence": classification.confidence,
                        "reasoning": classification.reasoning,
                    }),
                )
            }
            Err(err) => {
                // Classifier failure takes the safe path: retrieval.
                tracing::warn!("Query classification failed: {err}; defaulting to rag_required");
                StateDelta {
                    query_type: Some(QueryType::RagRequired),
                    ..Default::default()
                }
                .with_warning(format!("Query classification failed: {err}"))
            }
        }
    }
}

/// Rewrites a history-dependent query into a self-contained one by
/// substituting referents with their antecedents from the conversation.
pub struct ContextResolver {
    model: Arc<dyn ChatModel>,
}

impl ContextResolver {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl WorkflowNode for ContextResolver {
    fn name(&self) -> &'static str {
        "context_resolver"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let prompt = format!(
            "Rewrite the query so it is fully self-contained: replace every \
             pronoun or reference to earlier conversation with the thing it \
             refers to. Keep the query's language and intent unchanged. Do not \
             answer the query.\n\n\
             Conversation:\n{messages}\n\n\
             Query: {query}\n\n\
             Return fields: rewritten_query, reasoning.",
            messages = recent_messages(state, HISTORY_WINDOW),
            query = sanitize_for_prompt(&state.query),
        );

        match generate_structured::<ResolvedQuery>(self.model.as_ref(), &prompt, 0.0).await {
            Ok(resolved) if !resolved.rewritten_query.trim().is_empty() => {
                tracing::info!("Query resolved to: '{}'", resolved.rewritten_query);
                StateDelta {
                    enhanced_query: Some(resolved.rewritten_query),
                    ..Default::default()
                }
            }
            Ok(_) => StateDelta::default()
                .with_warning("Context resolution produced an empty rewrite; using original query"),
            Err(err) => {
                tracing::warn!("Context resolution failed: {err}; using original query");
                StateDelta::default()
                    .with_warning(format!("Context resolution failed: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::ChatMessage;

    #[tokio::test]
    async fn test_router_classifies_simple() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"{"type": "simple", "confidence": 0.95, "reasoning": "greeting"}"#,
        ]));
        let router = QueryRouter::new(model);
        let state = TurnState::new("hello", 3);

        let delta = router.run(&state).await;
        assert_eq!(delta.query_type, Some(QueryType::Simple));
        assert!(delta.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_router_failure_defaults_to_rag() {
        // Both attempts return garbage -> structured call fails.
        let model = Arc::new(ScriptedModel::new(vec!["not json", "still not json"]));
        let router = QueryRouter::new(model);
        let state = TurnState::new("what is the oil interval", 3);

        let delta = router.run(&state).await;
        assert_eq!(delta.query_type, Some(QueryType::RagRequired));
        assert_eq!(delta.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_context_resolver_sets_enhanced_query() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"{"rewritten_query": "what is the engine oil change interval", "reasoning": "it = interval"}"#,
        ]));
        let resolver = ContextResolver::new(model);
        let mut state = TurnState::new("what about it", 3);
        state.messages.push(ChatMessage::user("tell me about engine oil"));

        let delta = resolver.run(&state).await;
        assert_eq!(
            delta.enhanced_query.as_deref(),
            Some("what is the engine oil change interval")
        );
    }

    #[tokio::test]
    async fn test_context_resolver_failure_keeps_original() {
        let model = Arc::new(ScriptedModel::new(vec!["??", "??"]));
        let resolver = ContextResolver::new(model);
        let state = TurnState::new("what about it", 3);

        let delta = resolver.run(&state).await;
        assert!(delta.enhanced_query.is_none());
        assert_eq!(delta.warnings.len(), 1);
    }
}
