//! Hybrid retriever: fans out dense + lexical searches across query
//! variations, bounded by a fixed worker pool, and fuses everything with
//! Reciprocal Rank Fusion.

pub mod rrf;

use anyhow::Result;
use futures_util::future::{join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::SearchConfig;
use crate::filter::SearchFilter;
use crate::lang::{build_search_expression, extract_keywords};
use crate::llm::embeddings::EmbeddingModel;
use crate::models::{Document, QueryVariation, SearchPass};
use crate::store::DocumentStore;

/// Categories searched in the entity-scoped pass in addition to whatever
/// the store reports as entity-bearing.
const ENTITY_PASS_BASE_CATEGORIES: [&str; 2] = ["figure", "table"];

const STORE_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Fused, deduplicated, truncated to `top_k`.
    pub documents: Vec<Document>,
    /// Ranked lists that contributed to the fusion.
    pub lists_searched: usize,
    pub warnings: Vec<String>,
    /// True when a non-empty filter produced nothing and retrieval re-ran
    /// unfiltered.
    pub filter_relaxed: bool,
}

pub struct HybridRetriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingModel>,
    workers: Arc<Semaphore>,
    config: SearchConfig,
}

/// Run a store operation with up to three attempts and exponential backoff
/// (1 s, 2 s, 4 s) between them.
async fn with_retries<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < STORE_RETRY_ATTEMPTS => {
                tracing::warn!(
                    "{op_name} attempt {attempt}/{STORE_RETRY_ATTEMPTS} failed: {err}; \
                     retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingModel>,
        config: SearchConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            store,
            embedder,
            workers,
            config,
        }
    }

    /// Execute every (variation × leg × pass) search, merge the ranked
    /// lists, and return at most `top_k` documents. The given filter is
    /// never mutated; derived passes work on copies.
    pub async fn retrieve(
        &self,
        variations: &[QueryVariation],
        filter: &SearchFilter,
        entity_categories: &[String],
    ) -> RetrievalOutcome {
        let mut outcome = RetrievalOutcome::default();

        let passes = self.build_passes(filter, entity_categories);
        let lists = self.run_passes(variations, &passes, &mut outcome.warnings).await;
        outcome.lists_searched = lists.len();

        let mut lists = lists;
        let total: usize = lists.iter().map(Vec::len).sum();
        if total == 0 && !filter.is_empty() {
            tracing::warn!("Filtered retrieval returned nothing; relaxing filter");
            outcome.warnings.push(
                "Filtered search returned no documents; retried without filter".to_string(),
            );
            outcome.filter_relaxed = true;
            let unfiltered = [(SearchFilter::default(), SearchPass::General)];
            lists = self
                .run_passes(variations, &unfiltered, &mut outcome.warnings)
                .await;
        }

        outcome.documents = rrf::rrf_merge(&lists, self.config.rrf_k, self.config.top_k);
        tracing::info!(
            "Retrieval fused {} lists into {} documents",
            outcome.lists_searched,
            outcome.documents.len()
        );
        outcome
    }

    /// One general pass; plus an entity-scoped pass when the filter carries
    /// an entity predicate.
    fn build_passes(
        &self,
        filter: &SearchFilter,
        entity_categories: &[String],
    ) -> Vec<(SearchFilter, SearchPass)> {
        let has_entity = filter.entity.as_ref().is_some_and(|e| !e.is_empty());
        if !has_entity {
            return vec![(filter.clone(), SearchPass::General)];
        }

        let mut scoped_categories: Vec<String> = ENTITY_PASS_BASE_CATEGORIES
            .iter()
            .map(|c| c.to_string())
            .collect();
        for cat in entity_categories {
            if !scoped_categories.contains(cat) {
                scoped_categories.push(cat.clone());
            }
        }

        vec![
            (filter.without_entity(), SearchPass::General),
            (filter.scoped_to_categories(&scoped_categories), SearchPass::Entity),
        ]
    }

    async fn run_passes(
        &self,
        variations: &[QueryVariation],
        passes: &[(SearchFilter, SearchPass)],
        warnings: &mut Vec<String>,
    ) -> Vec<Vec<Document>> {
        let fetch_limit = self.config.top_k * 2;

        let mut tasks: Vec<BoxFuture<'_, std::result::Result<Vec<Document>, String>>> =
            Vec::new();
        for variation in variations {
            for (pass_filter, pass) in passes {
                tasks.push(Box::pin(self.dense_task(
                    variation,
                    pass_filter,
                    *pass,
                    fetch_limit,
                )));
                tasks.push(Box::pin(self.lexical_task(
                    variation,
                    pass_filter,
                    *pass,
                    fetch_limit,
                )));
            }
        }

        let results = join_all(tasks).await;
        let mut lists = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(list) => lists.push(list),
                Err(warning) => {
                    warnings.push(warning);
                    lists.push(Vec::new());
                }
            }
        }
        lists
    }

    async fn dense_task(
        &self,
        variation: &QueryVariation,
        filter: &SearchFilter,
        pass: SearchPass,
        limit: usize,
    ) -> std::result::Result<Vec<Document>, String> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| "search worker pool closed".to_string())?;

        let embedding = self
            .embedder
            .embed(&variation.text, variation.language)
            .await
            .map_err(|e| format!("Embedding failed for '{}': {e}", variation.text))?;

        let docs = with_retries("dense_search", || {
            self.store
                .dense_search(variation.language, &embedding, filter, limit)
        })
        .await
        .map_err(|e| format!("Dense search failed for '{}': {e}", variation.text))?;

        Ok(tag_pass(docs, pass))
    }

    async fn lexical_task(
        &self,
        variation: &QueryVariation,
        filter: &SearchFilter,
        pass: SearchPass,
        limit: usize,
    ) -> std::result::Result<Vec<Document>, String> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| "search worker pool closed".to_string())?;

        let keywords = extract_keywords(&variation.text, variation.language);
        let Some(expression) = build_search_expression(&keywords) else {
            tracing::debug!("No keywords extracted from '{}'", variation.text);
            return Ok(Vec::new());
        };
        tracing::debug!(
            "Lexical expression for '{}' ({}): {expression}",
            variation.text,
            variation.language.as_str()
        );

        let docs = with_retries("lexical_search", || {
            self.store
                .lexical_search(variation.language, &expression, filter, limit)
        })
        .await
        .map_err(|e| format!("Lexical search failed for '{}': {e}", variation.text))?;

        Ok(tag_pass(docs, pass))
    }
}

fn tag_pass(mut docs: Vec<Document>, pass: SearchPass) -> Vec<Document> {
    for doc in &mut docs {
        doc.search_pass = Some(pass);
    }
    docs
}
