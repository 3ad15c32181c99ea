//! Optimisers: momentum SGD (the classic CIFAR recipe) and candle's AdamW.

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use kd_common::OptimizerKind;

// ── MomentumSgd ─────────────────────────────────────────────────────────────

/// Hyper-parameters for [`MomentumSgd`].
#[derive(Debug, Clone, Copy)]
pub struct ParamsSgd {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub nesterov: bool,
}

impl Default for ParamsSgd {
    fn default() -> Self {
        Self {
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 0.0,
            nesterov: false,
        }
    }
}

struct VarState {
    var: Var,
    /// Momentum buffer; `None` until the variable first receives a gradient.
    velocity: Option<Tensor>,
}

/// SGD with L2 weight decay and heavy-ball momentum:
///
/// ```text
/// d = g + λ·θ
/// v = μ·v + d          (v = d on the first step)
/// θ = θ − lr·v         (θ − lr·(d + μ·v) with Nesterov)
/// ```
pub struct MomentumSgd {
    vars: Vec<VarState>,
    params: ParamsSgd,
}

impl Optimizer for MomentumSgd {
    type Config = ParamsSgd;

    fn new(vars: Vec<Var>, params: ParamsSgd) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| VarState {
                var,
                velocity: None,
            })
            .collect();
        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let ParamsSgd {
            lr,
            momentum,
            weight_decay,
            nesterov,
        } = self.params;
        for state in self.vars.iter_mut() {
            let theta = &state.var;
            let Some(g) = grads.get(theta) else {
                continue;
            };
            let d = if weight_decay != 0.0 {
                g.add(&theta.affine(weight_decay, 0.0)?)?
            } else {
                g.clone()
            };
            let update = if momentum != 0.0 {
                let v = match state.velocity.take() {
                    Some(v) => v.affine(momentum, 0.0)?.add(&d)?,
                    None => d.clone(),
                };
                let update = if nesterov {
                    d.add(&v.affine(momentum, 0.0)?)?
                } else {
                    v.clone()
                };
                state.velocity = Some(v);
                update
            } else {
                d
            };
            theta.set(&theta.sub(&update.affine(lr, 0.0)?)?)?;
        }
        Ok(())
    }
}

// ── TrainOptimizer ──────────────────────────────────────────────────────────

/// Optimiser selected by [`OptimizerKind`].
pub enum TrainOptimizer {
    Sgd(MomentumSgd),
    AdamW(AdamW),
}

impl TrainOptimizer {
    pub fn new(
        kind: OptimizerKind,
        vars: Vec<Var>,
        lr: f64,
        momentum: f64,
        weight_decay: f64,
    ) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::Sgd => Self::Sgd(MomentumSgd::new(
                vars,
                ParamsSgd {
                    lr,
                    momentum,
                    weight_decay,
                    nesterov: false,
                },
            )?),
            OptimizerKind::AdamW => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay,
                    ..Default::default()
                },
            )?),
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::Sgd(o) => o.step(grads),
            Self::AdamW(o) => o.step(grads),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(o) => o.learning_rate(),
            Self::AdamW(o) => o.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(o) => o.set_learning_rate(lr),
            Self::AdamW(o) => o.set_learning_rate(lr),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
