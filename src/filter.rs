use serde::{Deserialize, Serialize};

use crate::models::Document;

/// Constraints on the optional `entity` annotation of a document.
/// All present fields must hold for a document to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Exact match against the entity's runtime-discovered `type` literal.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Any-of match against the entity's keyword list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    /// Case-insensitive substring match against the entity title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,
}

impl EntityFilter {
    pub fn is_empty(&self) -> bool {
        self.entity_type.is_none()
            && self.keywords.as_ref().map_or(true, |k| k.is_empty())
            && self.title_contains.is_none()
    }
}

/// A conjunction of optional predicates restricting which documents a search
/// may return. An empty filter matches every document. Filters are immutable
/// once constructed; derivations (`without_entity`, `scoped_to_categories`)
/// always produce a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityFilter>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.sources.as_ref().map_or(true, |s| s.is_empty())
            && self.pages.as_ref().map_or(true, |p| p.is_empty())
            && self.categories.as_ref().map_or(true, |c| c.is_empty())
            && self.caption_contains.is_none()
            && self.entity.as_ref().map_or(true, |e| e.is_empty())
    }

    /// Evaluate the conjunction against a document. Used by store
    /// implementations to apply the filter server-side.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(sources) = &self.sources {
            if !sources.is_empty() && !sources.iter().any(|s| s == &doc.metadata.source) {
                return false;
            }
        }
        if let Some(pages) = &self.pages {
            if !pages.is_empty() && !pages.contains(&doc.metadata.page) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.is_empty() && !categories.iter().any(|c| c == &doc.metadata.category) {
                return false;
            }
        }
        if let Some(needle) = &self.caption_contains {
            let caption = doc.metadata.caption.as_deref().unwrap_or("");
            if !caption.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(entity_filter) = &self.entity {
            if !entity_filter.is_empty() {
                let Some(entity) = &doc.metadata.entity else {
                    return false;
                };
                if let Some(etype) = &entity_filter.entity_type {
                    if etype != &entity.entity_type {
                        return false;
                    }
                }
                if let Some(keywords) = &entity_filter.keywords {
                    if !keywords.is_empty()
                        && !keywords.iter().any(|k| entity.keywords.contains(k))
                    {
                        return false;
                    }
                }
                if let Some(title_needle) = &entity_filter.title_contains {
                    let title = entity.title.as_deref().unwrap_or("");
                    if !title.to_lowercase().contains(&title_needle.to_lowercase()) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// A copy with the entity predicate removed.
    pub fn without_entity(&self) -> SearchFilter {
        SearchFilter {
            entity: None,
            ..self.clone()
        }
    }

    /// A copy whose category predicate is replaced with the given set.
    pub fn scoped_to_categories(&self, categories: &[String]) -> SearchFilter {
        SearchFilter {
            categories: Some(categories.to_vec()),
            ..self.clone()
        }
    }
}
