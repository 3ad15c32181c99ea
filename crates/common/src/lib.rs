//! # kd-common — Shared Primitives
//!
//! Types and utilities shared across every crate in the workspace:
//!
//! * **[`ExperimentConfig`]** — run settings (serialised as JSON).
//! * **[`ModelKind`]** — registry of classifier names.
//! * **[`ImageDataset`]** / **[`DataLoader`]** — CIFAR-10 loading, augmentation & batching.
//! * **[`batch_to_tensors`]** — raw batch → Candle tensors.

pub mod config;
pub mod data;

pub use config::{
    DatasetKind, ExperimentConfig, LrDecay, ModelKind, OptimConfig, OptimizerKind, MODEL_NAMES,
};
pub use data::{
    batch_to_tensors, loaders, test_loader, DataLoader, ImageBatch, ImageDataset, ImageShape, Split,
    CIFAR10_CLASSES,
};
