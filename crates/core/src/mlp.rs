//! Two-layer perceptron over flattened pixels. The smallest student.

use candle_core::{Result, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

use kd_common::ImageShape;

/// Hidden width of the single hidden layer.
pub const MLP_HIDDEN: usize = 512;

/// ```text
/// logits = fc2( relu( fc1( flatten(x) ) ) )
/// ```
pub struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    pub fn new(shape: ImageShape, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let fc1 = linear(shape.numel(), MLP_HIDDEN, vb.pp("fc1"))?;
        let fc2 = linear(MLP_HIDDEN, num_classes, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.flatten_from(1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        self.fc2.forward(&x)
    }
}
