//! Chat-model interface and structured-output plumbing.
//!
//! The provider adapter ([`provider::LlmClient`]) speaks Ollama or any
//! OpenAI-compatible API. Structured generation is schema-per-type: each
//! call site binds a serde-deserializable record and the helper here
//! handles JSON extraction and the single permitted re-ask.

pub mod embeddings;
pub mod provider;
pub mod schemas;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Free-form text generation. Implementations must be safe to share across
/// the whole pipeline.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// Extract the first JSON object or array embedded in a model response.
/// Models frequently wrap JSON in prose or markdown fences.
fn extract_json(content: &str) -> &str {
    let object = content.find('{').and_then(|start| {
        content.rfind('}').filter(|end| *end > start).map(|end| &content[start..=end])
    });
    if let Some(found) = object {
        return found;
    }
    let array = content.find('[').and_then(|start| {
        content.rfind(']').filter(|end| *end > start).map(|end| &content[start..=end])
    });
    array.unwrap_or(content)
}

/// Generate a schema-bound record. Appends a JSON-only instruction, parses
/// the extracted object, and re-asks exactly once on unparseable output;
/// a second failure is reported as a model failure.
pub async fn generate_structured<T: DeserializeOwned>(
    model: &dyn ChatModel,
    prompt: &str,
    temperature: f32,
) -> Result<T> {
    let framed = format!(
        "{prompt}\n\nRespond with ONLY a single JSON object matching the requested fields. \
         No explanation, no markdown fences."
    );

    let response = model.generate(&framed, temperature).await?;
    match serde_json::from_str::<T>(extract_json(&response)) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            tracing::warn!("Structured output parse failed, re-asking once: {first_err}");
            let retry_prompt = format!(
                "{framed}\n\nYour previous reply was not valid JSON ({first_err}). \
                 Reply again with only the JSON object."
            );
            let response = model.generate(&retry_prompt, temperature).await?;
            serde_json::from_str::<T>(extract_json(&response))
                .with_context(|| format!("Model returned unparseable structured output: {response}"))
        }
    }
}

/// Strip special chat-template tokens from text that gets interpolated into
/// prompts, so retrieved content cannot smuggle role switches.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<|") {
        out.push_str(&rest[..start]);
        match rest[start..].find("|>") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = &rest[start + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}
