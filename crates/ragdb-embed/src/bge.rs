use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Embedder;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

pub const BGE_M3_DIM: usize = 1024;
const MAX_LEN: usize = 256;

struct Model {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// BGE-M3 dense embeddings computed locally with candle.
pub struct BgeM3Embedder {
    inner: Arc<Model>,
}

fn candle_err(e: impl std::fmt::Display) -> Error {
    Error::backend("candle", e)
}

impl BgeM3Embedder {
    pub fn load(model_dir: Option<&str>) -> Result<Self> {
        let device = select_device();
        let model_dir = resolve_model_dir(model_dir)?;
        info!(dir = %model_dir.display(), "loading BGE-M3");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to load tokenizer from {}: {e}", tokenizer_path.display())))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin")).map_err(candle_err)?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(candle_err)?;
        info!("BGE-M3 loaded");
        Ok(Self { inner: Arc::new(Model { model, tokenizer, device }) })
    }
}

impl Model {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like().map_err(candle_err)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(candle_err)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask).map_err(candle_err)?;
        let out: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu).and_then(|t| t.to_vec2()).map_err(candle_err)?;
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 * texts.len() as u128 {
            warn!(?elapsed, batch = texts.len(), "slow embedding batch");
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for BgeM3Embedder {
    fn dim(&self) -> usize {
        BGE_M3_DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed(&texts))
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("embedding task failed: {e}")))?
    }
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(ragdb_core::config::expand_path)
        .into_iter()
        .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
        .chain([Path::new("../models/bge-m3").to_path_buf(), Path::new("models/bge-m3").to_path_buf()]);
    for dir in candidates {
        if dir.exists() {
            return Ok(dir);
        }
    }
    Err(Error::InvalidConfig("Could not locate BGE-M3 model directory (set embedding.model_dir)".into()))
}
