//! A trained model with its optimiser dropped: inference only.

use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{ModuleT, VarBuilder, VarMap};

use kd_common::{DataLoader, ImageShape, ModelKind};
use kd_core::{build_model, Classifier};

use crate::metrics::{EpochMetrics, Mode};
use crate::objective::Supervised;
use crate::trainer::evaluate;

/// Produced by [`Trainer::freeze`](crate::Trainer::freeze) or loaded from a
/// checkpoint. There is no optimiser and every forward pass is eval-mode and
/// detached, so the weights cannot change.
pub struct FrozenModel {
    kind: ModelKind,
    model: Classifier,
    varmap: VarMap,
    device: Device,
}

impl FrozenModel {
    pub(crate) fn from_parts(
        kind: ModelKind,
        model: Classifier,
        varmap: VarMap,
        device: Device,
    ) -> Self {
        Self {
            kind,
            model,
            varmap,
            device,
        }
    }

    /// Build `kind` and fill it from a safetensors checkpoint written by
    /// [`Trainer::save`](crate::Trainer::save).
    pub fn load(
        kind: ModelKind,
        shape: ImageShape,
        num_classes: usize,
        path: &Path,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = build_model(kind, shape, num_classes, vb)?;
        varmap
            .load(path)
            .with_context(|| format!("loading {kind} checkpoint {}", path.display()))?;
        tracing::info!(model = %kind, path = %path.display(), "Loaded frozen model");
        Ok(Self::from_parts(kind, model, varmap, device.clone()))
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model(&self) -> &Classifier {
        &self.model
    }

    /// Eval-mode logits with no autograd history.
    pub fn infer(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        Ok(self.model.forward_t(input, false)?.detach())
    }

    /// Supervised loss and accuracy over `loader`.
    pub fn test(&self, loader: &DataLoader) -> anyhow::Result<EpochMetrics> {
        let acc = evaluate(&self.model, &Supervised::default(), loader, &self.device)?;
        Ok(acc.finish(0, Mode::Eval, 0.0))
    }

    /// Every stored tensor, batch-norm running statistics included.
    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.varmap.save(path)?;
        Ok(())
    }
}
