//! # kd-core — Models and Losses
//!
//! Every compute primitive needed to train a teacher and distil it into a
//! student:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`loss`] | `tempered_log_softmax`, `kl_divergence`, `DistillationLoss` |
//! | [`mlp`] | `Mlp` (flatten → 512 → classes) |
//! | [`lenet`] | `LeNet` (two conv/pool stages, three linear layers) |
//! | [`resnet`] | `ResNet` (CIFAR ResNet / Wide ResNet) |
//! | [`model`] | `Classifier`, `build_model` registry |
//!
//! Everything goes through `candle-core`/`candle-nn`, so models run on CPU,
//! CUDA or Metal depending on the `Device` the caller picks.

pub mod lenet;
pub mod loss;
pub mod mlp;
pub mod model;
pub mod resnet;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use loss::{
    kl_divergence, supervised_loss, tempered_log_softmax, DistillationLoss, DistillationTerms,
};
pub use model::{build_model, is_running_stat, Classifier};
pub use resnet::{ResNet, ResNetConfig};
