use candle_core::{DType, Tensor};

/// Mean over unmasked positions of `[B, T, H]` hidden states, then L2-normalized per row.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let (batch, _time, hidden_dim) = hidden.dims3()?;

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = mask_3d.broadcast_as(hidden.shape())?;
    let masked = (hidden * &mask_broadcast)?;
    let sum = masked.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    let mean = sum.broadcast_div(&lengths)?;
    let eps_val = match hidden.dtype() {
        DType::F16 => 1e-6f32,
        _ => 1e-12f32,
    };
    let eps = Tensor::new(&[eps_val], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    let out = mean.broadcast_div(&norm)?;
    debug_assert_eq!(out.dims(), &[batch, hidden_dim]);
    Ok(out)
}
