//! LeNet-5 style convolutional classifier.

use candle_core::{Result, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder};

use kd_common::ImageShape;

/// Smallest spatial side that survives two `conv5 → pool2` stages.
pub const LENET_MIN_SIDE: usize = 16;

/// ```text
/// conv5(6) → relu → pool2 → conv5(16) → relu → pool2 → fc120 → fc84 → fc(classes)
/// ```
pub struct LeNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

/// Side length after `conv5 → pool2` twice.
fn reduced_side(side: usize) -> usize {
    ((side - 4) / 2 - 4) / 2
}

impl LeNet {
    pub fn new(shape: ImageShape, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        if shape.height < LENET_MIN_SIDE || shape.width < LENET_MIN_SIDE {
            candle_core::bail!(
                "lenet needs images of at least {LENET_MIN_SIDE}x{LENET_MIN_SIDE}, got {}x{}",
                shape.height,
                shape.width
            );
        }
        let conv1 = conv2d(shape.channels, 6, 5, Conv2dConfig::default(), vb.pp("conv1"))?;
        let conv2 = conv2d(6, 16, 5, Conv2dConfig::default(), vb.pp("conv2"))?;
        let flat = 16 * reduced_side(shape.height) * reduced_side(shape.width);
        let fc1 = linear(flat, 120, vb.pp("fc1"))?;
        let fc2 = linear(120, 84, vb.pp("fc2"))?;
        let fc3 = linear(84, num_classes, vb.pp("fc3"))?;
        Ok(Self {
            conv1,
            conv2,
            fc1,
            fc2,
            fc3,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv1.forward(x)?.relu()?.max_pool2d(2)?;
        let x = self.conv2.forward(&x)?.relu()?.max_pool2d(2)?;
        let x = x.flatten_from(1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        let x = self.fc2.forward(&x)?.relu()?;
        self.fc3.forward(&x)
    }
}
