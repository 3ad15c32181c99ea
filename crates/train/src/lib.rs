//! # kd-train — Teacher and Student Training
//!
//! * **[`Trainer`]** — owns a model, its optimiser and LR schedule, and an
//!   [`Objective`]. [`Trainer::fit`] runs train/test epochs and reports.
//! * **[`Supervised`]** / **[`Distillation`]** — per-batch loss strategies.
//!   Distillation consults a [`FrozenModel`] produced by [`Trainer::freeze`].
//! * **[`MomentumSgd`]** / **[`TrainOptimizer`]** — SGD with momentum or AdamW.
//! * **[`LrScheduler`]** — warmup → multistep / cosine / linear / constant,
//!   stepped per epoch.
//! * **[`Reporter`]** — epoch metrics to `tracing` and `metrics.csv`.

pub mod frozen;
pub mod metrics;
pub mod objective;
pub mod optimizer;
pub mod report;
pub mod scheduler;
pub mod trainer;

pub use frozen::FrozenModel;
pub use metrics::{correct_predictions, EpochMetrics, MetricAccumulator, Mode, StepMetrics};
pub use objective::{Distillation, LossTerms, Objective, Supervised};
pub use optimizer::{MomentumSgd, ParamsSgd, TrainOptimizer};
pub use report::{CsvReporter, LogReporter, Reporter, Reporters};
pub use scheduler::LrScheduler;
pub use trainer::{clip_grad_norm, grad_norm, Trainer, TrainerConfig};
