//! Server recommendation by semantic similarity.

pub mod embedder;
pub mod errors;
pub mod index;

pub use embedder::{Embedder, HttpEmbedder, LocalEmbedder};
pub use errors::EmbedError;
pub use index::{keyword_rank, BuildReport, Recommendation, RecommendationIndex};

use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Pick the embedder described by the configuration.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match &config.endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "using HTTP embedder");
            Ok(Arc::new(HttpEmbedder::new(
                endpoint,
                config.model.clone(),
                std::time::Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => Ok(Arc::new(LocalEmbedder::new(config.dimension))),
    }
}

/// L2-normalise a vector. A zero vector is returned unchanged.
pub(crate) fn l2_normalize(vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.into_iter().map(|v| v / norm).collect()
    } else {
        vec
    }
}

/// Cosine similarity of two L2-normalised vectors (their dot product).
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = l2_normalize(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = l2_normalize(vec![1.0, 0.0]);
        let b = l2_normalize(vec![0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_scales_to_unit() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-5);
        assert!((v[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_config_without_endpoint_uses_local_embedder() {
        let config = EmbeddingConfig::default();
        assert!(embedder_from_config(&config).is_ok());
    }
}
