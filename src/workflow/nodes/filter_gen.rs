//! Dynamic filter generation: derive a maximally-empty [`SearchFilter`]
//! from a subtask query, its extraction hint, and the live metadata
//! snapshot. Every emitted predicate must be backed by explicit textual
//! evidence and must reference only values the store actually contains.

use std::sync::Arc;

use crate::filter::{EntityFilter, SearchFilter};
use crate::llm::schemas::{FilterGeneration, QueryExtraction};
use crate::llm::{generate_structured, sanitize_for_prompt, ChatModel};
use crate::store::StoreMetadata;

pub struct FilterGenerator {
    model: Arc<dyn ChatModel>,
}

impl FilterGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(query: &str, extraction: &QueryExtraction, metadata: &StoreMetadata) -> String {
        format!(
            "You are a CONSERVATIVE search-filter generator for a document \
             question-answering system. Emit a predicate only when the query \
             contains explicit evidence for it; an empty filter is always \
             better than a wrong one.\n\n\
             Rules:\n\
             - sources: only when the query explicitly names a document \
             artifact (words like manual, guide, handbook, 매뉴얼, 설명서, \
             문서) AND an available source matches. A product or model name \
             alone is NOT a document mention.\n\
             - pages: only for explicit page numbers or spans.\n\
             - categories: only for explicit structural terms (table, figure, \
             list, heading, 표, 그림, 목차).\n\
             - entity: only when one of the available entity types is \
             explicitly referenced or clearly implied; use the exact literal \
             from the list. Never combine entity with a categories predicate \
             for the same cue.\n\
             - caption: only for explicit 'caption mentions X' style asks.\n\n\
             General topical queries get an EMPTY filter; dense and lexical \
             search handle relevance on their own.\n\n\
             Available sources: {sources}\n\
             Available categories: {categories}\n\
             Available entity types: {entity_types}\n\
             Valid page range: {page_min}-{page_max}\n\n\
             Query: {query}\n\
             Extracted hints: {extraction}\n\n\
             Return fields: categories, pages, sources, caption, entity \
             ({{type, keywords, title}}), reasoning.",
            sources = metadata.sources.join(", "),
            categories = metadata.categories.join(", "),
            entity_types = metadata.entity_types.join(", "),
            page_min = metadata.pages.min,
            page_max = metadata.pages.max,
            query = sanitize_for_prompt(query),
            extraction = serde_json::to_string(extraction).unwrap_or_default(),
        )
    }

    /// Generate and validate a filter. Model failure degrades to building
    /// directly from the (already conservative) extraction.
    pub async fn generate(
        &self,
        query: &str,
        extraction: &QueryExtraction,
        metadata: &StoreMetadata,
    ) -> SearchFilter {
        let prompt = Self::prompt(query, extraction, metadata);

        let generated =
            match generate_structured::<FilterGeneration>(self.model.as_ref(), &prompt, 0.0).await
            {
                Ok(generated) => generated,
                Err(err) => {
                    tracing::warn!("Filter generation failed: {err}; deriving from extraction");
                    extraction_as_generation(extraction)
                }
            };

        let filter = validate(generated, extraction, metadata);
        if filter.is_empty() {
            tracing::info!("No search filter for '{query}' (empty after validation)");
        } else {
            tracing::info!(
                "Search filter for '{query}': {}",
                serde_json::to_string(&filter).unwrap_or_default()
            );
        }
        filter
    }
}

/// Fallback shape when the model call fails: promote the extraction hints
/// verbatim; validation still applies.
fn extraction_as_generation(extraction: &QueryExtraction) -> FilterGeneration {
    FilterGeneration {
        categories: extraction.categories_mentioned.clone(),
        pages: extraction.page_numbers.clone(),
        sources: Vec::new(),
        caption: None,
        entity: extraction.entity_type.as_ref().map(|t| {
            crate::llm::schemas::EntityFilterSpec {
                entity_type: Some(t.clone()),
                keywords: None,
                title: None,
            }
        }),
        reasoning: String::new(),
    }
}

/// Post-validate generated predicates against the live snapshot: anything
/// the store does not contain is dropped. If validation empties the filter
/// but the extraction clearly named a known entity type, that entity
/// predicate is still emitted.
fn validate(
    generated: FilterGeneration,
    extraction: &QueryExtraction,
    metadata: &StoreMetadata,
) -> SearchFilter {
    // Sources need both explicit extraction evidence and an exact catalog match.
    let sources: Vec<String> = if extraction.source_mentioned.is_some() {
        generated
            .sources
            .into_iter()
            .filter(|s| metadata.sources.contains(s))
            .collect()
    } else {
        Vec::new()
    };

    let pages: Vec<u32> = generated
        .pages
        .into_iter()
        .filter(|p| metadata.pages.contains(*p))
        .collect();

    let categories: Vec<String> = generated
        .categories
        .into_iter()
        .filter(|c| metadata.categories.contains(c))
        .collect();

    let entity = generated.entity.and_then(|spec| {
        let entity_type = spec
            .entity_type
            .filter(|t| metadata.entity_types.contains(t));
        let keywords = spec.keywords.filter(|k| !k.is_empty());
        let title_contains = spec.title.filter(|t| !t.is_empty());
        // Only the unknown type literal is dropped; keyword and title
        // constraints stand on their own.
        if entity_type.is_none() && keywords.is_none() && title_contains.is_none() {
            return None;
        }
        Some(EntityFilter {
            entity_type,
            keywords,
            title_contains,
        })
    });

    let mut filter = SearchFilter {
        sources: (!sources.is_empty()).then_some(sources),
        pages: (!pages.is_empty()).then_some(pages),
        categories: (!categories.is_empty()).then_some(categories),
        caption_contains: generated.caption.filter(|c| !c.is_empty()),
        entity,
    };

    // Deterministic override: a clearly named, known entity type survives
    // even when the model emitted nothing usable.
    if filter.is_empty() {
        if let Some(entity_type) = &extraction.entity_type {
            if metadata.entity_types.contains(entity_type) {
                tracing::debug!("Entity override: forcing entity filter for '{entity_type}'");
                filter.entity = Some(EntityFilter {
                    entity_type: Some(entity_type.clone()),
                    keywords: None,
                    title_contains: None,
                });
            }
        }
    }

    filter
}
