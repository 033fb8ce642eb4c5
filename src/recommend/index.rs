//! Semantic recommendation index over catalog descriptors.
//!
//! `build` embeds every descriptor's search text (through a process-lifetime
//! cache) and publishes a complete new image; `query` scores the current
//! image by cosine similarity. Readers never see a partially built image.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

use super::embedder::{tokenize, Embedder};
use super::errors::EmbedError;
use super::{cosine_similarity, l2_normalize};
use crate::catalog::Catalog;

/// Results are never longer than this, whatever `k` the caller asks for.
pub const DEFAULT_MAX_RESULTS: usize = 30;

// ─── Public Types ────────────────────────────────────────────────────────────

/// One ranked server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub name: String,
    pub description: String,
    pub score: f32,
}

/// Outcome of an index build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub generation: u64,
    pub indexed: usize,
    /// Servers left out because their description could not be embedded.
    pub skipped: Vec<String>,
    /// `false` if a newer build had already been published.
    pub published: bool,
}

// ─── Index ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct IndexEntry {
    name: String,
    description: String,
    vector: Arc<[f32]>,
}

#[derive(Debug, Default)]
struct IndexImage {
    generation: u64,
    entries: Vec<IndexEntry>,
}

/// Embedding index mapping query text to ranked catalog servers.
pub struct RecommendationIndex {
    embedder: Arc<dyn Embedder>,
    image: RwLock<Arc<IndexImage>>,
    /// search text → normalised vector. Never evicted.
    cache: Mutex<HashMap<String, Arc<[f32]>>>,
    generation: AtomicU64,
    max_results: usize,
}

impl RecommendationIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            image: RwLock::new(Arc::new(IndexImage::default())),
            cache: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Override the result cap.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Embed every descriptor of `catalog` and replace the index image.
    ///
    /// Descriptors whose embedding fails are skipped and logged. Safe to call
    /// concurrently: an older build never overwrites a newer one.
    pub async fn build(&self, catalog: &Catalog) -> BuildReport {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let texts: Vec<String> = catalog.iter().map(|d| d.search_text()).collect();
        let mut vectors: Vec<Option<Arc<[f32]>>> = {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            texts.iter().map(|t| cache.get(t).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        let mut skipped = Vec::new();

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let results = self.embedder.embed_batch(&batch).await;

            let mut fresh = Vec::new();
            for (&i, result) in missing.iter().zip(results) {
                match result {
                    Ok(raw) if !raw.is_empty() => {
                        let vector: Arc<[f32]> = l2_normalize(raw).into();
                        fresh.push((texts[i].clone(), vector.clone()));
                        vectors[i] = Some(vector);
                    }
                    Ok(_) => tracing::warn!(
                        server = %catalog_name(catalog, i),
                        "embedding is empty, server not indexed"
                    ),
                    Err(e) => tracing::warn!(
                        server = %catalog_name(catalog, i),
                        error = %e,
                        "failed to embed server description, server not indexed"
                    ),
                }
            }

            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.extend(fresh);
        }

        // All vectors must share one dimension: the most common length wins.
        let dimension = majority_dimension(&vectors);
        let mut entries = Vec::with_capacity(catalog.len());
        for (descriptor, vector) in catalog.iter().zip(vectors) {
            match vector {
                Some(vector) if Some(vector.len()) == dimension => entries.push(IndexEntry {
                    name: descriptor.name.clone(),
                    description: descriptor.description.clone(),
                    vector,
                }),
                Some(vector) => {
                    tracing::warn!(
                        server = %descriptor.name,
                        expected = dimension.unwrap_or_default(),
                        actual = vector.len(),
                        "embedding dimension mismatch, server not indexed"
                    );
                    skipped.push(descriptor.name.clone());
                }
                None => skipped.push(descriptor.name.clone()),
            }
        }

        let indexed = entries.len();
        let published = {
            let mut image = self.image.write().unwrap_or_else(PoisonError::into_inner);
            if image.generation < generation {
                *image = Arc::new(IndexImage {
                    generation,
                    entries,
                });
                true
            } else {
                false
            }
        };

        tracing::info!(
            generation,
            indexed,
            skipped = skipped.len(),
            published,
            "recommendation index built"
        );

        BuildReport {
            generation,
            indexed,
            skipped,
            published,
        }
    }

    /// Rank indexed servers against `text`, best first, at most `k`.
    ///
    /// Ties keep catalog order. A blank query or empty index yields an empty
    /// list; only a failure to embed the query itself is an error.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Recommendation>, EmbedError> {
        let image = self.snapshot();
        let limit = k.min(self.max_results);
        if text.trim().is_empty() || limit == 0 || image.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query = l2_normalize(self.embedder.embed(text).await?);
        let dimension = image.entries[0].vector.len();
        if query.len() != dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Recommendation> = image
            .entries
            .iter()
            .map(|entry| Recommendation {
                name: entry.name.clone(),
                description: entry.description.clone(),
                score: cosine_similarity(&query, &entry.vector),
            })
            .collect();

        sort_by_score(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    /// Number of indexed servers in the current image.
    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generation of the published image (0 before the first build).
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    fn snapshot(&self) -> Arc<IndexImage> {
        self.image
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for RecommendationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationIndex")
            .field("generation", &self.generation())
            .field("len", &self.len())
            .field("max_results", &self.max_results)
            .finish()
    }
}

fn catalog_name(catalog: &Catalog, idx: usize) -> String {
    catalog
        .iter()
        .nth(idx)
        .map(|d| d.name.clone())
        .unwrap_or_default()
}

/// Most frequent vector length. Ties go to the length seen first.
fn majority_dimension(vectors: &[Option<Arc<[f32]>>]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for len in vectors.iter().flatten().map(|v| v.len()) {
        match counts.iter_mut().find(|(l, _)| *l == len) {
            Some((_, count)) => *count += 1,
            None => counts.push((len, 1)),
        }
    }
    counts
        .into_iter()
        .rev()
        .max_by_key(|&(_, count)| count)
        .map(|(len, _)| len)
}

/// Stable descending sort; NaN scores compare equal.
fn sort_by_score(scored: &mut [Recommendation]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ─── Keyword fallback ────────────────────────────────────────────────────────

/// Rank catalog servers by the share of query words found in their search
/// text. Used when the query cannot be embedded.
pub fn keyword_rank(catalog: &Catalog, query: &str, k: usize) -> Vec<Recommendation> {
    let mut words = tokenize(query);
    words.sort();
    words.dedup();
    if words.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<Recommendation> = catalog
        .iter()
        .filter_map(|descriptor| {
            let haystack = tokenize(&descriptor.search_text());
            let hits = words.iter().filter(|w| haystack.contains(w)).count();
            (hits > 0).then(|| Recommendation {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                score: hits as f32 / words.len() as f32,
            })
        })
        .collect();

    sort_by_score(&mut scored);
    scored.truncate(k);
    scored
}

// ─── Tests ───────────────────────────────────────────────────────────────────
