use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var, D};
use candle_nn::ops;

/// Cross-entropy between per-step logits `(batch, steps, vocab)` and
/// reference tokens `(batch, steps)`, averaged over non-pad positions only.
///
/// Pad positions are excluded from the loss entirely, not zero-weighted in
/// the average: the logits emitted there cannot influence the value.
pub fn cross_entropy_ignore_pad(logits: &Tensor, targets: &Tensor, pad_id: u32) -> Result<Tensor> {
    let (batch, steps, vocab) = logits.dims3()?;
    let log_probs = ops::log_softmax(logits, D::Minus1)?.reshape((batch * steps, vocab))?;
    let targets = targets.reshape((batch * steps,))?;
    let picked = log_probs.gather(&targets.unsqueeze(1)?, 1)?.squeeze(1)?;
    let mask = targets.ne(pad_id)?.to_dtype(DType::F32)?;
    let count = mask.sum_all()?;
    (picked.neg()? * mask)?.sum_all()? / count
}

/// Scales every gradient in `grads` so the global L2 norm does not exceed
/// `max_norm`; returns the pre-clip norm. Applied once per batch, before the
/// optimizer step.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = sum_sq.sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * scale)?);
            }
        }
    }
    Ok(norm)
}
