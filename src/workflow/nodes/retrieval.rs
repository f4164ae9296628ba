//! Retrieval node: run the hybrid retriever for the active subtask and
//! fold the results into the turn state. Zero documents is not a crash —
//! it raises the error state so the web fallback or the failure path can
//! take over.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{SubtaskStatus, WorkflowStatus};
use crate::retriever::HybridRetriever;
use crate::workflow::metadata::MetadataCache;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

pub const EMPTY_RETRIEVAL_ERROR: &str = "retrieval returned no documents";

pub struct RetrievalNode {
    retriever: Arc<HybridRetriever>,
    metadata: Arc<MetadataCache>,
}

impl RetrievalNode {
    pub fn new(retriever: Arc<HybridRetriever>, metadata: Arc<MetadataCache>) -> Self {
        Self {
            retriever,
            metadata,
        }
    }
}

/// Search confidence: mean dense similarity over the strongest hits.
fn retrieval_confidence(documents: &[crate::models::Document]) -> f32 {
    let similarities: Vec<f32> = documents
        .iter()
        .take(5)
        .filter_map(|d| d.similarity)
        .collect();
    if similarities.is_empty() {
        return 0.0;
    }
    (similarities.iter().sum::<f32>() / similarities.len() as f32).min(1.0)
}

#[async_trait]
impl WorkflowNode for RetrievalNode {
    fn name(&self) -> &'static str {
        "retriever"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let mut subtasks = state.subtasks.clone();
        let idx = state.current_subtask_idx;

        let Some(subtask) = subtasks.get_mut(idx) else {
            return StateDelta::failure(self.name(), format!("no subtask at index {idx}"));
        };
        if subtask.variations.is_empty() {
            return StateDelta::failure(
                self.name(),
                format!("subtask '{}' has no query variations", subtask.query),
            );
        }

        let entity_categories = match self.metadata.get().await {
            Ok(metadata) => metadata.entity_categories,
            Err(err) => {
                tracing::warn!("Metadata unavailable for entity pass: {err}");
                Vec::new()
            }
        };

        tracing::info!(
            "Retrieving for subtask {idx} ('{}') with {} variation(s)",
            subtask.query,
            subtask.variations.len()
        );
        let outcome = self
            .retriever
            .retrieve(&subtask.variations, &subtask.filter, &entity_categories)
            .await;

        for (i, doc) in outcome.documents.iter().take(3).enumerate() {
            tracing::info!(
                "Doc {}: {}:p{}:{} rrf={:.4}",
                i + 1,
                doc.metadata.source,
                doc.metadata.page,
                doc.metadata.category,
                doc.rrf_score.unwrap_or(0.0)
            );
        }

        let confidence = retrieval_confidence(&outcome.documents);
        subtask.documents = outcome.documents.clone();
        subtask.status = SubtaskStatus::Completed;
        let subtask_query = subtask.query.clone();

        let mut delta = StateDelta {
            subtasks: Some(subtasks),
            documents: outcome.documents.clone(),
            confidence: Some(confidence),
            workflow_status: Some(WorkflowStatus::Running),
            warnings: outcome.warnings,
            ..Default::default()
        }
        .with_metadata(
            format!("retrieval_{idx}"),
            serde_json::json!({
                "query": subtask_query,
                "documents": outcome.documents.len(),
                "lists_searched": outcome.lists_searched,
                "filter_relaxed": outcome.filter_relaxed,
                "confidence": confidence,
            }),
        );

        if outcome.documents.is_empty() {
            // Raise the error state; the web fallback clears it on success,
            // otherwise the advance predicate fails the turn.
            delta.error = Some(EMPTY_RETRIEVAL_ERROR.to_string());
            delta = delta.with_warning(format!(
                "No documents retrieved for subtask '{subtask_query}'"
            ));
        }

        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::filter::SearchFilter;
    use crate::llm::embeddings::EmbeddingModel;
    use crate::models::{DocMetadata, Language, QueryVariation, Subtask};
    use crate::store::memory::{MemoryStore, StoredDocument};
    use anyhow::Result;
    use std::time::Duration;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed(&self, _text: &str, _language: Language) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn node_with_corpus(docs: Vec<StoredDocument>) -> RetrievalNode {
        let store = Arc::new(MemoryStore::new().unwrap());
        store.add_documents(docs).unwrap();
        let retriever = Arc::new(HybridRetriever::new(
            store.clone(),
            Arc::new(FixedEmbedder),
            SearchConfig::default(),
        ));
        let cache = Arc::new(MetadataCache::new(store, Duration::from_secs(300)));
        RetrievalNode::new(retriever, cache)
    }

    fn corpus_doc(id: &str, content: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            content: content.to_string(),
            metadata: DocMetadata {
                source: "manual.pdf".to_string(),
                page: 1,
                category: "paragraph".to_string(),
                caption: None,
                entity: None,
                human_feedback: None,
                image_path: None,
            },
            embedding_korean: Some(vec![1.0, 0.0]),
            embedding_english: Some(vec![1.0, 0.0]),
        }
    }

    fn prepared_state(query: &str) -> TurnState {
        let mut state = TurnState::new(query, 3);
        let mut subtask = Subtask::new(query, 1);
        subtask.status = SubtaskStatus::Executing;
        subtask.variations = vec![QueryVariation {
            text: query.to_string(),
            language: Language::English,
        }];
        subtask.filter = SearchFilter::default();
        state.subtasks = vec![subtask];
        state
    }

    #[tokio::test]
    async fn test_retrieval_completes_subtask_and_accumulates() {
        let node = node_with_corpus(vec![
            corpus_doc("d1", "engine oil interval details"),
            corpus_doc("d2", "unrelated brake content"),
        ]);
        let state = prepared_state("engine oil interval");

        let delta = node.run(&state).await;
        assert!(!delta.documents.is_empty());
        let subtasks = delta.subtasks.unwrap();
        assert_eq!(subtasks[0].status, SubtaskStatus::Completed);
        assert!(!subtasks[0].documents.is_empty());
        assert!(delta.error.is_none());
        assert!(delta.confidence.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_empty_retrieval_raises_error_state_not_failure() {
        let node = node_with_corpus(vec![]);
        let state = prepared_state("anything at all");

        let delta = node.run(&state).await;
        assert!(delta.documents.is_empty());
        assert_eq!(delta.error.as_deref(), Some(EMPTY_RETRIEVAL_ERROR));
        // Not a terminal failure: the web fallback may still recover.
        assert_eq!(delta.workflow_status, Some(WorkflowStatus::Running));
        assert!(!delta.warnings.is_empty());
        // Subtask itself still completes (empty result, not a crash).
        assert_eq!(delta.subtasks.unwrap()[0].status, SubtaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unprepared_subtask_is_a_failure() {
        let node = node_with_corpus(vec![corpus_doc("d1", "text")]);
        let mut state = TurnState::new("q", 3);
        state.subtasks = vec![Subtask::new("q", 1)]; // no variations

        let delta = node.run(&state).await;
        assert_eq!(delta.workflow_status, Some(WorkflowStatus::Failed));
    }
}
