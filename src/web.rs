//! Optional web-search fallback behind a uniform tool interface.
//!
//! The HTTP adapter speaks a Tavily-style JSON API; anything implementing
//! [`WebSearchTool`] can be swapped in. [`GuardedWebSearch`] adds the
//! process-wide daily quota and a per-query result cache; on quota
//! exhaustion or upstream failure it degrades to an empty result set
//! instead of raising.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WebConfig;
use crate::models::{DocMetadata, Document};

/// Category assigned to documents produced from web results.
pub const WEB_CATEGORY: &str = "web";

const CACHE_TTL: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait WebSearchTool: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>>;
}

// ─── HTTP adapter ────────────────────────────────────────

pub struct WebSearchClient {
    client: reqwest::Client,
    config: WebConfig,
}

impl WebSearchClient {
    pub fn new(client: reqwest::Client, config: WebConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Serialize)]
struct WebSearchRequest {
    query: String,
    max_results: usize,
    search_depth: String,
}

#[derive(Deserialize)]
struct WebSearchResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Convert raw web results into retrieval documents: source carries the
/// URL, the category marks web provenance, and similarity falls off
/// linearly with rank.
pub fn results_to_documents(query: &str, results: Vec<(String, String, String)>) -> Vec<Document> {
    let total = results.len();
    results
        .into_iter()
        .enumerate()
        .map(|(idx, (title, url, content))| {
            let body = if title.is_empty() {
                content
            } else {
                format!("**{title}**\n\n{content}")
            };
            let mut doc = Document::new(
                url.clone(),
                body,
                DocMetadata {
                    source: url,
                    page: 0,
                    category: WEB_CATEGORY.to_string(),
                    caption: Some(title),
                    entity: None,
                    human_feedback: None,
                    image_path: None,
                },
            );
            doc.similarity = Some(1.0 - idx as f32 / total.max(1) as f32);
            tracing::debug!("Web result {} for '{query}': {}", idx + 1, doc.id);
            doc
        })
        .collect()
}

#[async_trait]
impl WebSearchTool for WebSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .context("Web search base URL not configured")?;
        let url = format!("{base_url}/search");
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let req = WebSearchRequest {
            query: query.to_string(),
            max_results,
            search_depth: "basic".to_string(),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .context("Failed to call web search API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Web search API returned {status}: {body}");
        }

        let body: WebSearchResponse = resp.json().await?;
        let raw: Vec<(String, String, String)> = body
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| (r.title, r.url, r.content))
            .collect();
        Ok(results_to_documents(query, raw))
    }
}

// ─── Quota + cache wrapper ───────────────────────────────

struct QuotaState {
    day: NaiveDate,
    used: u32,
}

struct CacheEntry {
    fetched_at: Instant,
    documents: Vec<Document>,
}

/// Process-wide guard shared by every caller of the web tool.
pub struct GuardedWebSearch {
    inner: Arc<dyn WebSearchTool>,
    daily_quota: u32,
    quota: Mutex<QuotaState>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl GuardedWebSearch {
    pub fn new(inner: Arc<dyn WebSearchTool>, daily_quota: u32) -> Self {
        Self {
            inner,
            daily_quota,
            quota: Mutex::new(QuotaState {
                day: chrono::Utc::now().date_naive(),
                used: 0,
            }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, query: &str) -> Option<Vec<Document>> {
        let cache = self.cache.lock();
        cache.get(query).and_then(|entry| {
            (entry.fetched_at.elapsed() < CACHE_TTL).then(|| entry.documents.clone())
        })
    }

    /// Reserve one search against today's quota. Counts reset on UTC day
    /// rollover.
    fn try_reserve(&self) -> bool {
        let today = chrono::Utc::now().date_naive();
        let mut quota = self.quota.lock();
        if quota.day != today {
            quota.day = today;
            quota.used = 0;
        }
        if quota.used >= self.daily_quota {
            return false;
        }
        quota.used += 1;
        true
    }

    pub fn used_today(&self) -> u32 {
        self.quota.lock().used
    }
}

#[async_trait]
impl WebSearchTool for GuardedWebSearch {
    /// Never errors: quota exhaustion and upstream failures degrade to an
    /// empty result set (the caller records the warning).
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        if let Some(docs) = self.cached(query) {
            tracing::debug!("Web search cache hit for '{query}'");
            return Ok(docs);
        }

        if !self.try_reserve() {
            tracing::warn!("Web search daily quota ({}) exhausted", self.daily_quota);
            return Ok(Vec::new());
        }

        match self.inner.search(query, max_results).await {
            Ok(documents) => {
                self.cache.lock().insert(
                    query.to_string(),
                    CacheEntry {
                        fetched_at: Instant::now(),
                        documents: documents.clone(),
                    },
                );
                Ok(documents)
            }
            Err(err) => {
                tracing::warn!("Web search failed for '{query}': {err}");
                Ok(Vec::new())
            }
        }
    }
}
