//! Embedding client abstraction and the Ollama implementation.
//!
//! Defines the [`EmbeddingClient`] trait and:
//! - **[`OllamaEmbedder`]** calls `POST /api/embeddings` on the configured
//!   inference service.
//! - [`cosine_similarity`], the similarity measure used by the index.
//!
//! # Failure Policy
//!
//! [`EmbeddingClient::embed`] never fails. Any [`InferenceError`] is logged
//! and replaced with a zero vector of the configured dimensionality, which
//! degrades retrieval quality for that text but never aborts a question or
//! an ingestion pass.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::InferenceConfig;
use crate::inference::{InferenceError, InferenceTransport};

/// Added to each L2 norm so an all-zero vector scores 0 instead of NaN.
pub const NORM_EPSILON: f64 = 1e-9;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;

    /// Embed one text, surfacing failures.
    async fn try_embed(&self, text: &str) -> Result<Vec<f32>, InferenceError>;

    /// Embed one text, falling back to a zero vector on failure.
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.try_embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(model = self.model_name(), error = %e, "embedding failed, using zero vector");
                vec![0.0; self.dims()]
            }
        }
    }
}

// ============ Ollama ============

/// Embedding client for an Ollama-compatible `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    transport: InferenceTransport,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let transport = InferenceTransport::new(
            config.base_url.clone(),
            Duration::from_secs(config.embed_timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            transport,
            model: config.embed_model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let json = self.transport.post_json("/api/embeddings", &body).await?;
        parse_embedding_response(&json, self.dims)
    }
}

/// Parse `{"embedding": [...]}` and check the vector has `dims` entries.
fn parse_embedding_response(
    json: &serde_json::Value,
    dims: usize,
) -> Result<Vec<f32>, InferenceError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| InferenceError::Malformed("missing embedding array".to_string()))?;

    let vector: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vector.len() != dims {
        return Err(InferenceError::Malformed(format!(
            "expected {} dimensions, got {}",
            dims,
            vector.len()
        )));
    }

    Ok(vector)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Each norm is stabilized with [`NORM_EPSILON`], so a zero vector scores
/// `0.0` against anything. The result is clamped to `[-1.0, 1.0]` and is
/// symmetric in its arguments. Vectors of different lengths score `0.0`.
///
/// # Formula
///
/// ```text
///                  a · b
/// cos(θ) = ─────────────────────
///          (‖a‖ + ε) × (‖b‖ + ε)
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a.sqrt() + NORM_EPSILON) * (norm_b.sqrt() + NORM_EPSILON);
    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn try_embed(&self, _text: &str) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_embed_falls_back_to_zero_vector() {
        let v = FailingEmbedder.embed("anything").await;
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({ "embedding": [0.25, -1.0, 2.0] });
        assert_eq!(
            parse_embedding_response(&json, 3).unwrap(),
            vec![0.25, -1.0, 2.0]
        );
    }

    #[test]
    fn test_parse_wrong_dims_is_malformed() {
        let json = serde_json::json!({ "embedding": [0.25, -1.0] });
        let err = parse_embedding_response(&json, 3).unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[test]
    fn test_parse_missing_field_is_malformed() {
        let json = serde_json::json!({ "error": "no such model" });
        assert!(parse_embedding_response(&json, 3).is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = vec![0.0; 3];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_symmetric_and_bounded() {
        let pairs = [
            (vec![0.3, -0.7, 1.9], vec![4.0, 0.1, -2.2]),
            (vec![1e-3, 5.0, 5.0], vec![1e-3, 5.0, 5.0]),
            (vec![-3.0, -3.0, 0.5], vec![3.0, 3.0, -0.5]),
        ];
        for (a, b) in pairs.iter() {
            let ab = cosine_similarity(a, b);
            let ba = cosine_similarity(b, a);
            assert_eq!(ab, ba);
            assert!((-1.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
