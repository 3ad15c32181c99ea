//! Per-step and per-epoch training metrics.

use candle_core::{DType, Tensor, D};
use serde::Serialize;

/// Whether a pass updates the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Eval => "eval",
        }
    }
}

/// Metrics returned after each batch.
#[derive(Debug, Clone)]
pub struct StepMetrics {
    /// Optimiser steps taken so far (unchanged by eval batches).
    pub step: usize,
    pub loss: f32,
    /// Raw distillation KL term; `None` for supervised objectives.
    pub kl_loss: Option<f32>,
    pub correct: usize,
    pub samples: usize,
    /// Pre-clipping global gradient norm, when clipping is enabled.
    pub grad_norm: Option<f64>,
}

/// Aggregate of one pass over a loader.
#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub mode: Mode,
    /// Sample-weighted mean loss.
    pub loss: f64,
    pub accuracy: f64,
    pub kl_loss: Option<f64>,
    pub lr: f64,
    pub samples: usize,
}

/// Running sums for [`EpochMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    kl_sum: Option<f64>,
    correct: usize,
    samples: usize,
}

impl MetricAccumulator {
    pub fn add(&mut self, step: &StepMetrics) {
        let n = step.samples as f64;
        self.loss_sum += step.loss as f64 * n;
        if let Some(kl) = step.kl_loss {
            *self.kl_sum.get_or_insert(0.0) += kl as f64 * n;
        }
        self.correct += step.correct;
        self.samples += step.samples;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn finish(&self, epoch: usize, mode: Mode, lr: f64) -> EpochMetrics {
        let denom = self.samples.max(1) as f64;
        EpochMetrics {
            epoch,
            mode,
            loss: self.loss_sum / denom,
            accuracy: self.correct as f64 / denom,
            kl_loss: self.kl_sum.map(|kl| kl / denom),
            lr,
            samples: self.samples,
        }
    }
}

/// Number of rows of `logits` whose argmax equals the label.
pub fn correct_predictions(logits: &Tensor, labels: &Tensor) -> candle_core::Result<usize> {
    let predicted = logits.argmax(D::Minus1)?;
    let hits = predicted
        .eq(&labels.to_dtype(DType::U32)?)?
        .to_dtype(DType::U32)?
        .sum_all()?
        .to_scalar::<u32>()?;
    Ok(hits as usize)
}

// ── Tests ───────────────────────────────────────────────────────────────────
