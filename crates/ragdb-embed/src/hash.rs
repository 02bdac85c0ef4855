use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use ragdb_core::error::Result;
use ragdb_core::traits::Embedder;
use twox_hash::XxHash64;

/// Feature-hashing embedder: each lowercased word lands in one bucket.
///
/// Deterministic and dependency-free, so texts sharing words score high
/// under cosine similarity. Used for tests and offline setups.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let val = 0.5 + ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += val;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
