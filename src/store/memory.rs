//! In-process [`DocumentStore`]: a tantivy index for the lexical leg, dense
//! per-language embedding columns scanned with cosine similarity, and JSON
//! persistence of the corpus. Serves as the local store implementation and
//! as the substrate for pipeline tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::filter::SearchFilter;
use crate::models::{DocMetadata, Document, Language};
use crate::store::{DocumentStore, PageRange, StoreMetadata};

/// A corpus entry as produced by the (external) ingestion pipeline:
/// content, metadata, and one dense embedding per language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub content: String,
    pub metadata: DocMetadata,
    #[serde(default)]
    pub embedding_korean: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_english: Option<Vec<f32>>,
}

impl StoredDocument {
    fn embedding(&self, language: Language) -> Option<&Vec<f32>> {
        match language {
            Language::Korean => self.embedding_korean.as_ref(),
            Language::English => self.embedding_english.as_ref(),
        }
    }

    fn to_document(&self) -> Document {
        Document::new(self.id.clone(), self.content.clone(), self.metadata.clone())
    }
}

pub struct MemoryStore {
    entries: RwLock<Vec<StoredDocument>>,
    index: Index,
    f_id: Field,
    f_content: Field,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty volatile store (tests, scratch corpora).
    pub fn new() -> Result<Self> {
        Self::build(Vec::new(), None)
    }

    /// Load the corpus persisted under `data_dir`, creating an empty store
    /// when no corpus file exists yet.
    pub fn open_or_create(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let persist_path = data_dir.join("documents.json");

        let entries: Vec<StoredDocument> = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("Failed to read document corpus")?;
            serde_json::from_str(&data).context("Failed to parse document corpus")?
        } else {
            Vec::new()
        };

        Self::build(entries, Some(persist_path))
    }

    fn build(entries: Vec<StoredDocument>, persist_path: Option<PathBuf>) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let store = Self {
            entries: RwLock::new(Vec::new()),
            index,
            f_id,
            f_content,
            persist_path,
        };
        if !entries.is_empty() {
            store.index_entries(&entries)?;
            *store.entries.write() = entries;
        }
        Ok(store)
    }

    /// Add documents to the corpus, index them, and persist when backed by
    /// a data directory.
    pub fn add_documents(&self, docs: Vec<StoredDocument>) -> Result<()> {
        self.index_entries(&docs)?;
        let mut entries = self.entries.write();
        entries.extend(docs);

        if let Some(path) = &self.persist_path {
            let data = serde_json::to_string(&*entries)?;
            // Atomic write via temp file + rename.
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, &data)?;
            std::fs::rename(&tmp_path, path)?;
        }
        Ok(())
    }

    fn index_entries(&self, docs: &[StoredDocument]) -> Result<()> {
        let mut writer: IndexWriter = self
            .index
            .writer(50_000_000)
            .context("Failed to create index writer")?;
        for entry in docs {
            writer.add_document(doc!(
                self.f_id => entry.id.clone(),
                self.f_content => entry.content.clone(),
            ))?;
        }
        writer.commit().context("Failed to commit index")?;
        Ok(())
    }

    pub fn document_count(&self) -> usize {
        self.entries.read().len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn dense_search(
        &self,
        language: Language,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &StoredDocument)> = entries
            .iter()
            .filter_map(|e| {
                let column = e.embedding(language)?;
                if !filter.matches(&e.to_document()) {
                    return None;
                }
                Some((cosine_similarity(embedding, column), e))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(sim, e)| {
                let mut d = e.to_document();
                d.similarity = Some(sim);
                d
            })
            .collect())
    }

    async fn lexical_search(
        &self,
        _language: Language,
        expression: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create reader")?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.f_content]);
        let query = query_parser
            .parse_query(expression)
            .with_context(|| format!("Failed to parse search expression: {expression}"))?;

        // Overfetch so filtering cannot starve the result list.
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit((limit * 4).max(limit)))
            .context("Lexical search failed")?;

        let entries = self.entries.read();
        let mut hits = Vec::new();

        for (_score, doc_address) in top_docs {
            let stored: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve indexed document")?;
            let Some(id) = stored.get_first(self.f_id).and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(entry) = entries.iter().find(|e| e.id == id) else {
                continue;
            };
            let candidate = entry.to_document();
            if !filter.matches(&candidate) {
                continue;
            }
            let mut d = candidate;
            d.lexical_rank = Some(hits.len() + 1);
            hits.push(d);
            if hits.len() >= limit {
                break;
            }
        }

        Ok(hits)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.to_document()))
    }

    async fn get_metadata(&self) -> Result<StoreMetadata> {
        let entries = self.entries.read();

        let sources: BTreeSet<String> =
            entries.iter().map(|e| e.metadata.source.clone()).collect();
        let categories: BTreeSet<String> =
            entries.iter().map(|e| e.metadata.category.clone()).collect();
        let entity_types: BTreeSet<String> = entries
            .iter()
            .filter_map(|e| e.metadata.entity.as_ref())
            .map(|ent| ent.entity_type.clone())
            .collect();
        let entity_categories: BTreeSet<String> = entries
            .iter()
            .filter(|e| e.metadata.entity.is_some())
            .map(|e| e.metadata.category.clone())
            .collect();

        let min = entries.iter().map(|e| e.metadata.page).min().unwrap_or(0);
        let max = entries.iter().map(|e| e.metadata.page).max().unwrap_or(0);

        Ok(StoreMetadata {
            sources: sources.into_iter().collect(),
            pages: PageRange { min, max },
            categories: categories.into_iter().collect(),
            entity_types: entity_types.into_iter().collect(),
            entity_categories: entity_categories.into_iter().collect(),
        })
    }
}
