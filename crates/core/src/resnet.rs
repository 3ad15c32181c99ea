//! CIFAR-style residual networks.
//!
//! Three stages of basic blocks at 16/32/64 channels (times `widen`), strides
//! 1/2/2, batch norm after every convolution, 1×1 projection shortcuts where
//! the shape changes, global average pool, linear head.
//!
//! | Name | Blocks per stage | Widen |
//! |------|------------------|-------|
//! | `resnet20` | 3 | 1 |
//! | `resnet32` | 5 | 1 |
//! | `resnet56` | 9 | 1 |
//! | `wrn16_4`  | 2 | 4 |

use candle_core::{Result, Tensor, D};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, Module, ModuleT,
    VarBuilder,
};

const BN_EPS: f64 = 1e-5;
const STAGE_WIDTHS: [usize; 3] = [16, 32, 64];

/// Depth and width of a [`ResNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResNetConfig {
    pub blocks_per_stage: usize,
    pub widen: usize,
}

impl ResNetConfig {
    /// He et al. CIFAR ResNet: `depth = 6n + 2`.
    pub fn cifar(depth: usize) -> Result<Self> {
        if depth < 8 || (depth - 2) % 6 != 0 {
            candle_core::bail!("CIFAR ResNet depth must be 6n+2, got {depth}");
        }
        Ok(Self {
            blocks_per_stage: (depth - 2) / 6,
            widen: 1,
        })
    }

    /// Wide ResNet: `depth = 6n + 4`, channels multiplied by `widen`.
    pub fn wide(depth: usize, widen: usize) -> Result<Self> {
        if depth < 10 || (depth - 4) % 6 != 0 || widen == 0 {
            candle_core::bail!("WRN depth must be 6n+4 with widen > 0, got {depth}x{widen}");
        }
        Ok(Self {
            blocks_per_stage: (depth - 4) / 6,
            widen,
        })
    }
}

fn conv3x3(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        stride,
        ..Default::default()
    };
    conv2d_no_bias(in_c, out_c, 3, cfg, vb)
}

// ── Basic block ─────────────────────────────────────────────────────────────

/// ```text
/// out = relu( bn2(conv2( relu(bn1(conv1(x))) )) + shortcut(x) )
/// ```
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    /// Projection when stride or channel count changes; identity otherwise.
    shortcut: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn new(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
        let conv1 = conv3x3(in_c, out_c, stride, vb.pp("conv1"))?;
        let bn1 = batch_norm(out_c, BN_EPS, vb.pp("bn1"))?;
        let conv2 = conv3x3(out_c, out_c, 1, vb.pp("conv2"))?;
        let bn2 = batch_norm(out_c, BN_EPS, vb.pp("bn2"))?;

        let shortcut = if stride != 1 || in_c != out_c {
            let cfg = Conv2dConfig {
                stride,
                ..Default::default()
            };
            let vb = vb.pp("shortcut");
            let conv = conv2d_no_bias(in_c, out_c, 1, cfg, vb.pp("conv"))?;
            let bn = batch_norm(out_c, BN_EPS, vb.pp("bn"))?;
            Some((conv, bn))
        } else {
            None
        };

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            shortcut,
        })
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.conv1.forward(x)?;
        let out = self.bn1.forward_t(&out, train)?.relu()?;
        let out = self.conv2.forward(&out)?;
        let out = self.bn2.forward_t(&out, train)?;
        let residual = match &self.shortcut {
            Some((conv, bn)) => bn.forward_t(&conv.forward(x)?, train)?,
            None => x.clone(),
        };
        (out + residual)?.relu()
    }
}

// ── ResNet ──────────────────────────────────────────────────────────────────

pub struct ResNet {
    stem: Conv2d,
    stem_bn: BatchNorm,
    blocks: Vec<BasicBlock>,
    fc: Linear,
}

impl ResNet {
    pub fn new(
        config: ResNetConfig,
        in_channels: usize,
        num_classes: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let stem = conv3x3(in_channels, STAGE_WIDTHS[0], 1, vb.pp("conv1"))?;
        let stem_bn = batch_norm(STAGE_WIDTHS[0], BN_EPS, vb.pp("bn1"))?;

        let mut blocks = Vec::with_capacity(3 * config.blocks_per_stage);
        let mut in_c = STAGE_WIDTHS[0];
        for (stage, &base) in STAGE_WIDTHS.iter().enumerate() {
            let width = base * config.widen;
            let vb_stage = vb.pp(format!("layer{}", stage + 1));
            for i in 0..config.blocks_per_stage {
                // First block of stages 2 and 3 halves the resolution.
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(in_c, width, stride, vb_stage.pp(i))?);
                in_c = width;
            }
        }

        let fc = linear(in_c, num_classes, vb.pp("fc"))?;
        Ok(Self {
            stem,
            stem_bn,
            blocks,
            fc,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = self.stem.forward(x)?;
        x = self.stem_bn.forward_t(&x, train)?.relu()?;
        for block in &self.blocks {
            x = block.forward_t(&x, train)?;
        }
        // Global average pool: (N, C, H, W) → (N, C).
        let pooled = x.flatten_from(2)?.mean(D::Minus1)?;
        self.fc.forward(&pooled)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_rules() {
        assert_eq!(ResNetConfig::cifar(20).unwrap().blocks_per_stage, 3);
        assert_eq!(ResNetConfig::cifar(56).unwrap().blocks_per_stage, 9);
        assert!(ResNetConfig::cifar(18).is_err());
        let wrn = ResNetConfig::wide(16, 4).unwrap();
        assert_eq!(wrn.blocks_per_stage, 2);
        assert_eq!(wrn.widen, 4);
        assert!(ResNetConfig::wide(16, 0).is_err());
    }
}
