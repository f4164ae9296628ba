//! Contract with the document store. The core issues dense and lexical
//! queries through this trait and never post-filters: implementations apply
//! the [`SearchFilter`] themselves.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::filter::SearchFilter;
use crate::models::{Document, Language};

/// Inclusive page range covered by the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub min: u32,
    pub max: u32,
}

impl PageRange {
    pub fn contains(&self, page: u32) -> bool {
        page >= self.min && page <= self.max
    }
}

/// Live snapshot of the store's metadata vocabulary. Filter construction
/// validates every predicate against exactly one of these snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub sources: Vec<String>,
    pub pages: PageRange,
    pub categories: Vec<String>,
    /// Distinct entity `type` literals present in the corpus. May contain
    /// non-ASCII values; treated as opaque.
    pub entity_types: Vec<String>,
    /// Categories whose documents carry entity annotations. Drives the
    /// entity-scoped retrieval pass.
    pub entity_categories: Vec<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Nearest-neighbor search against the dense column for `language`.
    /// Results carry `similarity` in [0, 1], best first.
    async fn dense_search(
        &self,
        language: Language,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Boolean full-text search. `expression` uses `AND`/`OR` over
    /// keywords, e.g. `(a AND b) OR c`. Results carry `lexical_rank`
    /// (1-based), best first.
    async fn lexical_search(
        &self,
        language: Language,
        expression: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Document>>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_metadata(&self) -> Result<StoreMetadata>;
}
