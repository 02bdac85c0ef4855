use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Embedder;
use tracing::warn;

/// Contract-enforcing wrapper around any embedding model.
///
/// Guarantees one vector per input, each of the configured dimension, and
/// bounds every call by a timeout. Failures surface as
/// `EmbeddingUnavailable` or `EmbeddingDimensionMismatch`; nothing is retried.
#[derive(Clone)]
pub struct EmbedderClient {
    inner: Arc<dyn Embedder>,
    dim: usize,
    timeout: Duration,
}

impl EmbedderClient {
    pub fn new(inner: Arc<dyn Embedder>, dim: usize, timeout: Duration) -> Self {
        Self { inner, dim, timeout }
    }

    fn check(&self, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != inputs {
            return Err(Error::EmbeddingUnavailable(format!(
                "model returned {} vectors for {inputs} inputs",
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::EmbeddingDimensionMismatch { expected: self.dim, actual: bad.len() });
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for EmbedderClient {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = match tokio::time::timeout(self.timeout, self.inner.embed_batch(texts)).await {
            Ok(Ok(vectors)) => vectors,
            Ok(Err(Error::EmbeddingDimensionMismatch { expected, actual })) => {
                return Err(Error::EmbeddingDimensionMismatch { expected, actual })
            }
            Ok(Err(Error::EmbeddingUnavailable(message))) => return Err(Error::EmbeddingUnavailable(message)),
            // a rejected request (unknown model, bad input) is still an unavailable embedder to callers
            Ok(Err(e)) => return Err(Error::EmbeddingUnavailable(e.to_string())),
            Err(_) => {
                warn!(timeout = ?self.timeout, batch = texts.len(), "embedding call timed out");
                return Err(Error::EmbeddingUnavailable(format!("embedding timed out after {:?}", self.timeout)));
            }
        };
        self.check(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbedder;

    struct Fixed(Vec<Vec<f32>>);

    #[async_trait]
    impl Embedder for Fixed {
        fn dim(&self) -> usize {
            0
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl Embedder for Slow {
        fn dim(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![0.0; 2]; texts.len()])
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[tokio::test]
    async fn preserves_order_and_dim() {
        let client = EmbedderClient::new(Arc::new(HashEmbedder::new(16)), 16, Duration::from_secs(1));
        let out = client.embed_batch(&texts(3)).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], HashEmbedder::new(16).embed_sync("text 2"));
        assert_eq!(client.embed("text 1").await.unwrap(), out[1]);
    }

    #[tokio::test]
    async fn wrong_dimension_is_reported() {
        let client = EmbedderClient::new(Arc::new(Fixed(vec![vec![0.0; 3]])), 4, Duration::from_secs(1));
        let err = client.embed_batch(&texts(1)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingDimensionMismatch { expected: 4, actual: 3 }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn wrong_count_is_unavailable() {
        let client = EmbedderClient::new(Arc::new(Fixed(vec![vec![0.0; 4]])), 4, Duration::from_secs(1));
        let err = client.embed_batch(&texts(2)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let client = EmbedderClient::new(Arc::new(Slow), 2, Duration::from_millis(50));
        let err = client.embed_batch(&texts(1)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }
}
