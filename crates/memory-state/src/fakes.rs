//! Deterministic embedding providers
//!
//! `HashingEmbedder` maps text to a fixed-dimension vector by feature hashing
//! its lowercase word tokens, so texts sharing words score high and identical
//! texts score 1.0. Needs no network and no model. `FailingEmbedder` always
//! returns a configured error, for exercising error propagation.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;
use crate::storage_traits::EmbeddingProvider;

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

/// Offline bag-of-words embedder.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Embed synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.vector(text))
    }
}

// ---------------------------------------------------------------------------
// FailingEmbedder
// ---------------------------------------------------------------------------

/// Provider that fails every call.
#[derive(Debug, Clone)]
pub struct FailingEmbedder {
    dimension: usize,
    error: FailureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Network,
}

impl FailingEmbedder {
    pub fn new(dimension: usize, error: FailureKind) -> Self {
        Self { dimension, error }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(match self.error {
            FailureKind::Quota => ProviderError::Quota("monthly quota exhausted".into()),
            FailureKind::Network => ProviderError::Network("connection reset".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::cosine_similarity;

    #[test]
    fn test_identical_text_scores_one() {
        let e = HashingEmbedder::default();
        let a = e.vector("The sky is blue");
        let b = e.vector("the SKY is blue!");
        let s = cosine_similarity(&a, &b).unwrap();
        assert!((s - 1.0).abs() < 1e-5, "similarity was {s}");
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let e = HashingEmbedder::new(64);
        let v = e.vector("deploy the release on friday");
        assert_eq!(v.len(), 64);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(8).vector("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_failing_embedder_reports_kind() {
        let e = FailingEmbedder::new(8, FailureKind::Quota);
        let err = e.embed("anything").await.unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)));
    }
}
