//! Text embedders used by the recommendation index.
//!
//! [`LocalEmbedder`] is a dependency-free hashed bag-of-words model, good
//! enough for keyword-heavy server descriptions. [`HttpEmbedder`] calls an
//! OpenAI-compatible `/embeddings` endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use super::errors::EmbedError;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed several texts. One result per input, in input order, so a
    /// failure affects only its own item.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await);
        }
        results
    }
}

// ─── LocalEmbedder ───────────────────────────────────────────────────────────

/// Hashed bag-of-words embedding with a fixed dimension.
///
/// Each word (lowercased, longer than one character) adds its term frequency
/// at three hashed positions. The result is L2-normalised.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimension: usize,
}

impl LocalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        let words = tokenize(text);
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word.as_str()).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            let h1 = fnv1a(bytes) as usize;
            let h2 = fnv1a(&[bytes, &[1u8]].concat()) as usize;
            let h3 = fnv1a(&[bytes, &[2u8]].concat()) as usize;

            vector[h1 % self.dimension] += tf;
            vector[h2 % self.dimension] += tf * 0.7;
            vector[h3 % self.dimension] += tf * 0.5;
        }

        Ok(super::l2_normalize(vector))
    }
}

/// Lowercased alphanumeric words longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(String::from)
        .collect()
}

/// FNV-1a, 32-bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

// ─── HttpEmbedder ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEmbeddingItem {
    index: usize,
    embedding: serde_json::Value, // number[] or number[][] (per-token)
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<RawEmbeddingItem>,
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http: HttpClient,
    url: String,
    model: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut body = serde_json::json!({ "input": texts });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::RequestFailed {
                reason: format!("embedding request to {}: {e}", self.url),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(EmbedError::HttpError { status, body });
        }

        let result: EmbeddingResponse =
            response.json().await.map_err(|e| EmbedError::RequestFailed {
                reason: format!("failed to parse embedding response: {e}"),
            })?;

        if result.data.is_empty() {
            return Err(EmbedError::EmptyResponse { count: texts.len() });
        }

        let mut items = result.data;
        items.sort_by_key(|item| item.index);
        items
            .iter()
            .map(|item| mean_pool_embedding(&item.embedding))
            .collect()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse { count: 1 })
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request(texts).await {
            Ok(vectors) => {
                let mut vectors = vectors.into_iter();
                (0..texts.len())
                    .map(|_| vectors.next().ok_or(EmbedError::EmptyResponse { count: 1 }))
                    .collect()
            }
            Err(e) => vec![Err(e); texts.len()],
        }
    }
}

/// Mean-pool per-token embeddings into a single vector.
///
/// 1D input is returned as-is; 2D input is averaged over the token axis.
fn mean_pool_embedding(embedding: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let serde_json::Value::Array(rows) = embedding else {
        return Err(unexpected_format());
    };
    match rows.first() {
        None => Ok(Vec::new()),
        Some(first) if first.is_number() => Ok(rows
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()),
        Some(first) if first.is_array() => {
            let tokens: Vec<Vec<f32>> = rows
                .iter()
                .filter_map(|row| {
                    row.as_array()
                        .map(|r| r.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                })
                .collect();

            let n_dim = tokens.first().map_or(0, Vec::len);
            let mut pooled = vec![0.0_f32; n_dim];
            for token in &tokens {
                for (d, val) in token.iter().take(n_dim).enumerate() {
                    pooled[d] += val;
                }
            }
            let n_tokens = tokens.len().max(1) as f32;
            for val in &mut pooled {
                *val /= n_tokens;
            }
            Ok(pooled)
        }
        Some(_) => Err(unexpected_format()),
    }
}

fn unexpected_format() -> EmbedError {
    EmbedError::RequestFailed {
        reason: "unexpected embedding format (expected number[] or number[][])".to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
