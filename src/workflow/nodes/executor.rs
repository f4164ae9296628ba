//! Subtask execution prep: advance past finished subtasks, then equip the
//! active one with query variations, an extraction hint, a validated
//! filter, and per-variation language labels before handing control to the
//! retriever.

use async_trait::async_trait;
use std::sync::Arc;

use crate::lang;
use crate::llm::schemas::{LanguageDetection, QueryExtraction, QueryVariations};
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::models::{Language, QueryVariation, SubtaskStatus, WorkflowStatus};
use crate::store::StoreMetadata;
use crate::workflow::metadata::MetadataCache;
use crate::workflow::nodes::filter_gen::FilterGenerator;
use crate::workflow::nodes::WorkflowNode;
use crate::workflow::state::{StateDelta, TurnState};

/// Variation set bounds, original query included.
const MIN_VARIATIONS: usize = 3;
const MAX_VARIATIONS: usize = 5;

pub struct SubtaskExecutor {
    model: Arc<dyn ChatModel>,
    filter_gen: FilterGenerator,
    metadata: Arc<MetadataCache>,
}

impl SubtaskExecutor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        filter_gen: FilterGenerator,
        metadata: Arc<MetadataCache>,
    ) -> Self {
        Self {
            model,
            filter_gen,
            metadata,
        }
    }

    /// 3-5 distinct queries, the original always first. Returns None when
    /// the model cannot produce a single usable rewrite.
    async fn generate_variations(&self, query: &str) -> Option<Vec<String>> {
        let prompt = format!(
            "You are a query expansion expert for a document retrieval system. \
             Generate 3 rewrites of the query that preserve its intent while \
             varying phrasing and vocabulary. Include both Korean and English \
             phrasings when the topic allows it; keep each rewrite focused and \
             searchable.\n\n\
             Query: {}\n\n\
             Return fields: variations (list of 3 strings), reasoning.",
            sanitize_for_prompt(query)
        );

        let rewrites =
            match generate_structured::<QueryVariations>(self.model.as_ref(), &prompt, 0.3).await {
                Ok(result) => result.variations,
                Err(err) => {
                    tracing::warn!("Query variation failed for '{query}': {err}");
                    Vec::new()
                }
            };

        let mut variations = vec![query.to_string()];
        for rewrite in rewrites {
            let rewrite = rewrite.trim().to_string();
            if rewrite.is_empty() {
                continue;
            }
            if variations
                .iter()
                .any(|v| v.to_lowercase() == rewrite.to_lowercase())
            {
                continue;
            }
            variations.push(rewrite);
            if variations.len() >= MAX_VARIATIONS {
                break;
            }
        }

        if variations.len() == 1 {
            // The model produced nothing usable.
            return None;
        }

        // Pad to the floor with a deterministic keyword restatement.
        if variations.len() < MIN_VARIATIONS {
            let language = lang::fallback_language(query);
            let keywords = lang::extract_keywords(query, language);
            let joined = keywords.join(" ");
            if !joined.is_empty()
                && !variations
                    .iter()
                    .any(|v| v.to_lowercase() == joined.to_lowercase())
            {
                variations.push(joined);
            }
        }

        (variations.len() >= MIN_VARIATIONS).then_some(variations)
    }

    async fn extract_hints(&self, query: &str, metadata: &StoreMetadata) -> QueryExtraction {
        let prompt = format!(
            "You are a query analyzer for a document retrieval system. Extract \
             filtering information ONLY when it is explicitly present in the \
             query; when in doubt, extract nothing.\n\n\
             Rules:\n\
             1. page_numbers: only explicit mentions (\"page 10\", \"p.45\", \
             \"50페이지\").\n\
             2. categories_mentioned: map structural cues onto these exact \
             category tags: {categories}. (e.g. 표/테이블 -> table, \
             그림/사진/diagram -> figure, 차트/그래프 -> chart)\n\
             3. entity_type: only when one of these exact types is named or \
             clearly implied: {entity_types}.\n\
             4. source_mentioned: only when a document artifact word appears \
             (manual, guide, handbook, 매뉴얼, 설명서, 문서). A product or \
             model name alone is NOT a source mention.\n\
             5. keywords: the salient content words.\n\n\
             Query: {query}\n\n\
             Return fields: page_numbers, categories_mentioned, entity_type, \
             source_mentioned, keywords.",
            categories = metadata.categories.join(", "),
            entity_types = metadata.entity_types.join(", "),
            query = sanitize_for_prompt(query),
        );

        let mut extraction =
            match generate_structured::<QueryExtraction>(self.model.as_ref(), &prompt, 0.0).await {
                Ok(extraction) => extraction,
                Err(err) => {
                    tracing::warn!("Query extraction failed for '{query}': {err}");
                    QueryExtraction::default()
                }
            };

        // Entity types outside the live vocabulary are dropped here, before
        // filter generation ever sees them.
        if let Some(entity_type) = &extraction.entity_type {
            if !metadata.entity_types.contains(entity_type) {
                tracing::debug!("Dropping unknown entity type '{entity_type}'");
                extraction.entity_type = None;
            }
        }
        extraction.categories_mentioned.retain(|c| metadata.categories.contains(c));
        extraction
    }

    /// Label one variation: script heuristic first, model on ambiguity,
    /// script presence as the last resort.
    async fn detect_language(&self, text: &str) -> Language {
        if let Some(language) = lang::detect_language(text) {
            return language;
        }
        let prompt = format!(
            "Detect the primary language of this search query. Korean \
             characters make it korean unless the text is overwhelmingly \
             English.\n\nQuery: {}\n\n\
             Return fields: language (korean|english), confidence, reason.",
            sanitize_for_prompt(text)
        );
        match generate_structured::<LanguageDetection>(self.model.as_ref(), &prompt, 0.0).await {
            Ok(detection) => detection.language,
            Err(err) => {
                tracing::warn!("Language detection failed for '{text}': {err}");
                lang::fallback_language(text)
            }
        }
    }
}

#[async_trait]
impl WorkflowNode for SubtaskExecutor {
    fn name(&self) -> &'static str {
        "subtask_executor"
    }

    async fn run(&self, state: &TurnState) -> StateDelta {
        let mut subtasks = state.subtasks.clone();
        let mut idx = state.current_subtask_idx;

        if subtasks.is_empty() || idx >= subtasks.len() {
            // The advance predicate routes to synthesis from here.
            tracing::info!("No more subtasks to process ({idx}/{})", subtasks.len());
            return StateDelta::default();
        }

        match subtasks[idx].status {
            SubtaskStatus::Completed => {
                // Retrieval finished this one; move on.
                idx += 1;
                if idx >= subtasks.len() {
                    tracing::info!("All {} subtask(s) processed", subtasks.len());
                    return StateDelta {
                        current_subtask_idx: Some(idx),
                        ..Default::default()
                    };
                }
            }
            SubtaskStatus::Executing => {
                // Already prepared; retrieval will pick it up.
                return StateDelta::default();
            }
            SubtaskStatus::Failed => {
                return StateDelta::failure(
                    self.name(),
                    format!("subtask '{}' failed", subtasks[idx].query),
                );
            }
            SubtaskStatus::Pending => {}
        }

        let subtask_query = subtasks[idx].query.clone();
        tracing::info!("Preparing subtask {idx}: '{subtask_query}'");

        let metadata = match self.metadata.get().await {
            Ok(metadata) => metadata,
            Err(err) => {
                return StateDelta::failure(
                    self.name(),
                    format!("store metadata unavailable: {err}"),
                );
            }
        };

        let Some(variation_texts) = self.generate_variations(&subtask_query).await else {
            subtasks[idx].status = SubtaskStatus::Failed;
            return StateDelta {
                subtasks: Some(subtasks),
                ..StateDelta::failure(
                    self.name(),
                    format!("no query variations produced for '{subtask_query}'"),
                )
            };
        };
        for (i, text) in variation_texts.iter().enumerate() {
            tracing::debug!("Variation {}: '{text}'", i + 1);
        }

        let extraction = self.extract_hints(&subtask_query, &metadata).await;
        let filter = self
            .filter_gen
            .generate(&subtask_query, &extraction, &metadata)
            .await;

        let mut variations = Vec::with_capacity(variation_texts.len());
        for text in variation_texts {
            let language = self.detect_language(&text).await;
            variations.push(QueryVariation { text, language });
        }

        let filter_json = serde_json::to_value(&filter).unwrap_or_default();
        subtasks[idx].variations = variations;
        subtasks[idx].filter = filter;
        subtasks[idx].status = SubtaskStatus::Executing;

        StateDelta {
            subtasks: Some(subtasks),
            current_subtask_idx: Some(idx),
            workflow_status: Some(WorkflowStatus::Running),
            ..Default::default()
        }
        .with_metadata(
            format!("subtask_{idx}"),
            serde_json::json!({
                "query": subtask_query,
                "filter": filter_json,
                "extraction": serde_json::to_value(&extraction).unwrap_or_default(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::{DocMetadata, Subtask};
    use crate::store::memory::{MemoryStore, StoredDocument};
    use std::time::Duration;

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new().unwrap();
        store
            .add_documents(vec![StoredDocument {
                id: "d1".to_string(),
                content: "engine oil interval".to_string(),
                metadata: DocMetadata {
                    source: "gv80_manual.pdf".to_string(),
                    page: 12,
                    category: "paragraph".to_string(),
                    caption: None,
                    entity: None,
                    human_feedback: None,
                    image_path: None,
                },
                embedding_korean: Some(vec![1.0]),
                embedding_english: Some(vec![1.0]),
            }])
            .unwrap();
        Arc::new(store)
    }

    fn executor(responses: Vec<&str>) -> SubtaskExecutor {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(responses));
        let cache = Arc::new(MetadataCache::new(seeded_store(), Duration::from_secs(300)));
        SubtaskExecutor::new(model.clone(), FilterGenerator::new(model), cache)
    }

    fn state_with_subtask(query: &str) -> TurnState {
        let mut state = TurnState::new(query, 3);
        state.subtasks = vec![Subtask::new(query, 1)];
        state
    }

    #[tokio::test]
    async fn test_prepares_pending_subtask() {
        let executor = executor(vec![
            // variations
            r#"{"variations": ["oil replacement interval", "엔진 오일 교체 주기", "motor oil change schedule"], "reasoning": ""}"#,
            // extraction
            r#"{"keywords": ["engine", "oil"]}"#,
            // filter generation
            r#"{"reasoning": "no explicit cues"}"#,
        ]);
        let state = state_with_subtask("engine oil change interval");

        let delta = executor.run(&state).await;
        let subtasks = delta.subtasks.unwrap();
        let prepared = &subtasks[0];

        assert_eq!(prepared.status, SubtaskStatus::Executing);
        assert!(prepared.variations.len() >= 3 && prepared.variations.len() <= 5);
        assert_eq!(prepared.variations[0].text, "engine oil change interval");
        assert_eq!(prepared.variations[0].language, Language::English);
        // The Korean rewrite got its own label.
        assert!(prepared
            .variations
            .iter()
            .any(|v| v.language == Language::Korean));
        assert!(prepared.filter.is_empty());
        assert_eq!(delta.current_subtask_idx, Some(0));
    }

    #[tokio::test]
    async fn test_completed_subtask_advances_index() {
        let executor = executor(vec![]);
        let mut state = state_with_subtask("only one");
        state.subtasks[0].status = SubtaskStatus::Completed;

        let delta = executor.run(&state).await;
        assert_eq!(delta.current_subtask_idx, Some(1));
        // Terminal success is the orchestrator's call, not this node's.
        assert!(delta.workflow_status.is_none());
    }

    #[tokio::test]
    async fn test_advances_then_prepares_next() {
        let executor = executor(vec![
            r#"{"variations": ["second topic details", "두번째 주제", "more on second topic"], "reasoning": ""}"#,
            r#"{"keywords": []}"#,
            r#"{"reasoning": ""}"#,
        ]);
        let mut state = TurnState::new("two things", 3);
        state.subtasks = vec![Subtask::new("first", 1), Subtask::new("second topic", 2)];
        state.subtasks[0].status = SubtaskStatus::Completed;

        let delta = executor.run(&state).await;
        assert_eq!(delta.current_subtask_idx, Some(1));
        let subtasks = delta.subtasks.unwrap();
        assert_eq!(subtasks[1].status, SubtaskStatus::Executing);
        assert!(subtasks[1].variations.len() >= 3);
    }

    #[tokio::test]
    async fn test_exhausted_subtasks_yield_noop() {
        let executor = executor(vec![]);
        let mut state = state_with_subtask("done");
        state.subtasks[0].status = SubtaskStatus::Completed;
        state.current_subtask_idx = 1;

        let delta = executor.run(&state).await;
        assert!(delta.workflow_status.is_none());
        assert!(delta.subtasks.is_none());
    }

    #[tokio::test]
    async fn test_zero_variations_fails_subtask() {
        let executor = executor(vec![
            // variations model failure (twice: retry of structured call)
            "broken", "still broken",
        ]);
        let state = state_with_subtask("unanswerable");

        let delta = executor.run(&state).await;
        assert_eq!(delta.workflow_status, Some(WorkflowStatus::Failed));
        assert!(delta.error.is_some());
        assert_eq!(delta.subtasks.unwrap()[0].status, SubtaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_executing_subtask_is_idempotent() {
        let executor = executor(vec![]);
        let mut state = state_with_subtask("in flight");
        state.subtasks[0].status = SubtaskStatus::Executing;

        let delta = executor.run(&state).await;
        assert!(delta.subtasks.is_none());
        assert!(delta.error.is_none());
    }

    #[tokio::test]
    async fn test_variation_floor_padded_with_keyword_restatement() {
        let executor = executor(vec![
            // Single usable rewrite -> needs padding to reach 3.
            r#"{"variations": ["oil interval guidance"], "reasoning": ""}"#,
            r#"{"keywords": []}"#,
            r#"{"reasoning": ""}"#,
        ]);
        let state = state_with_subtask("engine oil change interval");

        let delta = executor.run(&state).await;
        let prepared = &delta.subtasks.unwrap()[0];
        assert!(prepared.variations.len() >= 3, "{:?}", prepared.variations);
    }
}
