use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::models::Language;

/// Maximum characters to send per text to the embedding API. Queries are
/// short, but variations can carry pasted context; dense multilingual text
/// tokenizes at roughly 2 tokens per char, so 3 000 chars stays safely
/// inside an 8 192-token context window.
const MAX_EMBED_CHARS: usize = 3_000;

/// Query-side embedding generation, one dense column per language.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str, language: Language) -> Result<Vec<f32>>;
}

/// Return the query prefix for asymmetric embedding models. These models
/// were trained with distinct query/document prefixes; sending a bare query
/// degrades the embedding-space geometry.
fn query_prefix_for_model(model_name: &str) -> &'static str {
    let lower = model_name.to_lowercase();
    if lower.contains("nomic") {
        "search_query: "
    } else if lower.contains("e5") {
        "query: "
    } else {
        ""
    }
}

/// Truncate `text` to at most `max_chars`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Embedding adapter sharing the chat provider's endpoint and credentials,
/// with a model per language.
pub struct EmbeddingClient {
    client: reqwest::Client,
    llm: LlmConfig,
    embedding: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(client: reqwest::Client, llm: LlmConfig, embedding: EmbeddingConfig) -> Self {
        Self {
            client,
            llm,
            embedding,
        }
    }

    fn model_for(&self, language: Language) -> &str {
        match language {
            Language::Korean => &self.embedding.model_korean,
            Language::English => &self.embedding.model_english,
        }
    }
}

#[async_trait]
impl EmbeddingModel for EmbeddingClient {
    async fn embed(&self, text: &str, language: Language) -> Result<Vec<f32>> {
        let model = self.model_for(language).to_string();
        let prefix = query_prefix_for_model(&model);
        // Prefix before truncation so the prefix itself is never cut off.
        let body = truncate_for_embedding(text, MAX_EMBED_CHARS.saturating_sub(prefix.len()));
        let input = format!("{prefix}{body}");

        let embedding = match self.llm.provider.as_str() {
            "ollama" => embed_ollama(&self.client, &self.llm, &model, &input).await?,
            "openai" => embed_openai(&self.client, &self.llm, &model, &input).await?,
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        };

        if embedding.len() != self.embedding.dim {
            tracing::warn!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.embedding.dim,
                embedding.len()
            );
        }
        Ok(embedding)
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate over-length inputs instead of
    /// returning a 400.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    input: &str,
) -> Result<Vec<f32>> {
    let url = format!("{}/api/embed", config.base_url);
    let req = OllamaEmbedRequest {
        model: model.to_string(),
        input: vec![input.to_string()],
        truncate: true,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama embedding API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama embedding API returned {status}: {body}");
    }

    let body: OllamaEmbedResponse = resp.json().await?;
    body.embeddings
        .into_iter()
        .next()
        .context("No embedding returned")
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbedItem {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    input: &str,
) -> Result<Vec<f32>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let req = OpenAiEmbedRequest {
        model: model.to_string(),
        input: vec![input.to_string()],
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI embedding API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI embedding API returned {status}: {body}");
    }

    let body: OpenAiEmbedResponse = resp.json().await?;
    body.data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .context("No embedding returned")
}
