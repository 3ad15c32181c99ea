//! Model registry: [`ModelKind`] name → [`Classifier`].

use candle_core::{Result, Tensor};
use candle_nn::{ModuleT, VarBuilder};

use kd_common::{ImageShape, ModelKind};

use crate::lenet::LeNet;
use crate::mlp::Mlp;
use crate::resnet::{ResNet, ResNetConfig};

/// Image classifier producing `(N, num_classes)` logits.
///
/// `train = true` runs batch norm on batch statistics and updates its
/// running averages; `train = false` uses the running averages.
pub enum Classifier {
    Mlp(Mlp),
    LeNet(LeNet),
    ResNet(ResNet),
}

impl ModuleT for Classifier {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Mlp(m) => m.forward(xs),
            Self::LeNet(m) => m.forward(xs),
            Self::ResNet(m) => m.forward_t(xs, train),
        }
    }
}

/// Build the registry model `kind`. Parameters are created through `vb`, so
/// a `VarMap`-backed builder makes them trainable.
pub fn build_model(
    kind: ModelKind,
    shape: ImageShape,
    num_classes: usize,
    vb: VarBuilder,
) -> Result<Classifier> {
    let model = match kind {
        ModelKind::Mlp => Classifier::Mlp(Mlp::new(shape, num_classes, vb)?),
        ModelKind::LeNet => Classifier::LeNet(LeNet::new(shape, num_classes, vb)?),
        ModelKind::ResNet20 => resnet(ResNetConfig::cifar(20)?, shape, num_classes, vb)?,
        ModelKind::ResNet32 => resnet(ResNetConfig::cifar(32)?, shape, num_classes, vb)?,
        ModelKind::ResNet56 => resnet(ResNetConfig::cifar(56)?, shape, num_classes, vb)?,
        ModelKind::Wrn16x4 => resnet(ResNetConfig::wide(16, 4)?, shape, num_classes, vb)?,
    };
    Ok(model)
}

fn resnet(
    config: ResNetConfig,
    shape: ImageShape,
    num_classes: usize,
    vb: VarBuilder,
) -> Result<Classifier> {
    Ok(Classifier::ResNet(ResNet::new(
        config,
        shape.channels,
        num_classes,
        vb,
    )?))
}

/// Batch-norm running statistics live in the `VarMap` (so they are saved in
/// checkpoints) but are not trained by the optimiser.
pub fn is_running_stat(name: &str) -> bool {
    name.ends_with("running_mean") || name.ends_with("running_var")
}

// ── Tests ───────────────────────────────────────────────────────────────────
