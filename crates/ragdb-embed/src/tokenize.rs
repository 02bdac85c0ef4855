use candle_core::{Device, Tensor};
use ragdb_core::error::{Error, Result};
use tokenizers::Tokenizer;

const PAD_ID: u32 = 1;

/// Tokenize a batch into `[B, max_len]` id and attention-mask tensors, truncating and right-padding.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut all_ids = Vec::with_capacity(texts.len() * max_len);
    let mut all_mask = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| Error::EmbeddingUnavailable(format!("Tokenization failed: {e}")))?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        ids.truncate(max_len);
        mask.truncate(max_len);
        ids.resize(max_len, PAD_ID);
        mask.resize(max_len, 0);
        all_ids.extend(ids);
        all_mask.extend(mask);
    }
    let shape = (texts.len(), max_len);
    let input_ids = Tensor::from_vec(all_ids, shape, device).map_err(|e| Error::backend("candle", e))?;
    let attention_mask = Tensor::from_vec(all_mask, shape, device).map_err(|e| Error::backend("candle", e))?;
    Ok((input_ids, attention_mask))
}
