//! Per-batch loss strategies plugged into [`Trainer`](crate::Trainer).

use candle_core::{Result, Tensor};
use candle_nn::ModuleT;

use kd_core::{supervised_loss, Classifier, DistillationLoss};

use crate::frozen::FrozenModel;
use crate::metrics::Mode;

/// Scalar loss plus the logits it was computed from.
pub struct LossTerms {
    /// Tensor to back-propagate.
    pub loss: Tensor,
    pub logits: Tensor,
    /// Raw distillation KL term, for reporting.
    pub kl_loss: Option<Tensor>,
}

/// How a trainer turns a batch into a loss.
pub trait Objective {
    fn name(&self) -> &'static str;

    /// Forward `model` on `input` (train-mode batch norm iff `mode` is
    /// [`Mode::Train`]) and compute the loss against `labels`.
    fn compute(
        &self,
        model: &Classifier,
        input: &Tensor,
        labels: &Tensor,
        mode: Mode,
    ) -> Result<LossTerms>;
}

// ── Supervised ──────────────────────────────────────────────────────────────

/// Cross-entropy against the labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Supervised {
    pub label_smoothing: f64,
}

impl Supervised {
    pub fn new(label_smoothing: f64) -> Self {
        Self { label_smoothing }
    }
}

impl Objective for Supervised {
    fn name(&self) -> &'static str {
        "supervised"
    }

    fn compute(
        &self,
        model: &Classifier,
        input: &Tensor,
        labels: &Tensor,
        mode: Mode,
    ) -> Result<LossTerms> {
        let logits = model.forward_t(input, mode.is_train())?;
        let loss = supervised_loss(&logits, labels, self.label_smoothing)?;
        Ok(LossTerms {
            loss,
            logits,
            kl_loss: None,
        })
    }
}

// ── Distillation ────────────────────────────────────────────────────────────

/// Cross-entropy plus `T²`-scaled KL towards a frozen teacher's softened
/// outputs. The teacher always runs in eval mode.
pub struct Distillation {
    teacher: FrozenModel,
    loss: DistillationLoss,
}

impl Distillation {
    pub fn new(teacher: FrozenModel, loss: DistillationLoss) -> Self {
        Self { teacher, loss }
    }

    pub fn teacher(&self) -> &FrozenModel {
        &self.teacher
    }

    pub fn temperature(&self) -> f64 {
        self.loss.temperature()
    }
}

impl Objective for Distillation {
    fn name(&self) -> &'static str {
        "distillation"
    }

    fn compute(
        &self,
        model: &Classifier,
        input: &Tensor,
        labels: &Tensor,
        mode: Mode,
    ) -> Result<LossTerms> {
        let logits = model.forward_t(input, mode.is_train())?;
        let teacher_logits = self.teacher.infer(input)?;
        let terms = self.loss.compute(&logits, &teacher_logits, labels)?;
        Ok(LossTerms {
            loss: terms.loss,
            logits,
            kl_loss: Some(terms.kl),
        })
    }
}
