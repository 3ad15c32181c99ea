//! Supervised and distillation losses.
//!
//! The distillation objective (Hinton et al.) for student logits `s`,
//! teacher logits `t`, labels `y` and temperature `T`:
//!
//! ```text
//! p_T   = softmax(t / T)                       (teacher, softened)
//! q     = softmax(s)                           (student)
//! KL    = mean_batch Σ_c p_T · (log p_T − log q)
//! loss  = CE(s, y) + T² · KL
//! ```
//!
//! `T²` keeps the soft-target gradient on the same scale as the
//! cross-entropy gradient when `T` changes.

use candle_core::{Result, Tensor, D};
use candle_nn::{loss, ops};

// ── Building blocks ─────────────────────────────────────────────────────────

/// `log_softmax(logits / temperature)` over the class dimension.
///
/// Uses the max-shifted log-sum-exp form, so logits in the thousands do not
/// overflow.
pub fn tempered_log_softmax(logits: &Tensor, temperature: f64) -> Result<Tensor> {
    ops::log_softmax(&logits.affine(1.0 / temperature, 0.0)?, D::Minus1)
}

/// `KL(p || q)` from log-probabilities, summed over classes and averaged
/// over the batch. `target_log_probs` is `log p`, `log_probs` is `log q`.
pub fn kl_divergence(log_probs: &Tensor, target_log_probs: &Tensor) -> Result<Tensor> {
    let batch = log_probs.dim(0)?;
    let target_probs = target_log_probs.exp()?;
    let pointwise = target_probs.mul(&target_log_probs.sub(log_probs)?)?;
    pointwise.sum_all()?.affine(1.0 / batch.max(1) as f64, 0.0)
}

/// Cross-entropy with optional label smoothing.
///
/// With smoothing `s` and `C` classes the target is `(1 − s)·onehot + s/C`,
/// which decomposes into `(1 − s)·NLL + s·mean_c(−log q_c)`.
pub fn supervised_loss(logits: &Tensor, labels: &Tensor, smoothing: f64) -> Result<Tensor> {
    if smoothing <= 0.0 {
        return loss::cross_entropy(logits, labels);
    }
    let log_probs = ops::log_softmax(logits, D::Minus1)?;
    let nll = loss::nll(&log_probs, labels)?;
    let uniform = log_probs.mean(D::Minus1)?.neg()?.mean_all()?;
    nll.affine(1.0 - smoothing, 0.0)? + uniform.affine(smoothing, 0.0)?
}

// ── DistillationLoss ────────────────────────────────────────────────────────

/// Scalar loss tensors for one batch.
pub struct DistillationTerms {
    /// `supervised + T² · kl`; the tensor to back-propagate.
    pub loss: Tensor,
    pub supervised: Tensor,
    /// Raw KL term, before the `T²` factor.
    pub kl: Tensor,
}

/// Temperature-scaled distillation objective.
#[derive(Debug, Clone, Copy)]
pub struct DistillationLoss {
    temperature: f64,
    label_smoothing: f64,
}

impl DistillationLoss {
    /// `temperature` must be finite and strictly positive.
    pub fn new(temperature: f64) -> Result<Self> {
        if !(temperature.is_finite() && temperature > 0.0) {
            candle_core::bail!("distillation temperature must be finite and > 0, got {temperature}");
        }
        Ok(Self {
            temperature,
            label_smoothing: 0.0,
        })
    }

    pub fn with_label_smoothing(mut self, label_smoothing: f64) -> Self {
        self.label_smoothing = label_smoothing;
        self
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Combine the supervised and soft-target terms. `teacher_logits` is
    /// detached here, so no gradient reaches the teacher through this loss.
    pub fn compute(
        &self,
        student_logits: &Tensor,
        teacher_logits: &Tensor,
        labels: &Tensor,
    ) -> Result<DistillationTerms> {
        let t = self.temperature;
        let supervised = supervised_loss(student_logits, labels, self.label_smoothing)?;
        let student_log_probs = ops::log_softmax(student_logits, D::Minus1)?;
        let teacher_log_probs = tempered_log_softmax(&teacher_logits.detach(), t)?;
        let kl = kl_divergence(&student_log_probs, &teacher_log_probs)?;
        let loss = (&supervised + kl.affine(t * t, 0.0)?)?;
        Ok(DistillationTerms {
            loss,
            supervised,
            kl,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
