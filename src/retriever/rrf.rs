//! Reciprocal Rank Fusion: fused score = Σ 1/(k + rank) across every
//! contributing ranked list. No score normalization needed between the
//! dense and lexical legs.

use std::collections::HashMap;

use crate::models::{Document, SearchPass};

struct Accumulator {
    doc: Document,
    score: f32,
    list_count: usize,
    best_rank: usize,
}

/// Fuse ranked lists into a single ordering, truncated to `top_k`.
///
/// Ranks are 1-based positions within each input list. Ties break by number
/// of contributing lists, then the best (minimum) rank seen in any list,
/// then lexicographic id — a total order, so the output is a pure function
/// of `(rrf_k, ranked lists)` and insensitive to input-list order.
pub fn rrf_merge(lists: &[Vec<Document>], rrf_k: f32, top_k: usize) -> Vec<Document> {
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for list in lists {
        for (idx, doc) in list.iter().enumerate() {
            let rank = idx + 1;
            let contribution = 1.0 / (rrf_k + rank as f32);

            let entry = acc.entry(doc.id.clone()).or_insert_with(|| Accumulator {
                doc: doc.clone(),
                score: 0.0,
                list_count: 0,
                best_rank: rank,
            });
            entry.score += contribution;
            entry.list_count += 1;
            entry.best_rank = entry.best_rank.min(rank);

            // Keep the strongest per-leg evidence seen for this document.
            if let Some(sim) = doc.similarity {
                entry.doc.similarity =
                    Some(entry.doc.similarity.map_or(sim, |cur| cur.max(sim)));
            }
            if let Some(lex) = doc.lexical_rank {
                entry.doc.lexical_rank =
                    Some(entry.doc.lexical_rank.map_or(lex, |cur| cur.min(lex)));
            }
            if doc.search_pass == Some(SearchPass::Entity) {
                entry.doc.search_pass = Some(SearchPass::Entity);
            }
        }
    }

    let mut merged: Vec<Accumulator> = acc.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.list_count.cmp(&a.list_count))
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });
    merged.truncate(top_k);

    merged
        .into_iter()
        .map(|entry| {
            let mut doc = entry.doc;
            doc.rrf_score = Some(entry.score);
            doc
        })
        .collect()
}
