//! Experiment configuration for teacher → student distillation.
//!
//! Serialised as JSON next to the checkpoints so a run can be reproduced.
//! Every field except the two model names has a default, so older files
//! missing newer fields still load.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Model registry names ────────────────────────────────────────────────────

/// Names accepted by `--teacher_model` / `--student_model`.
pub const MODEL_NAMES: [&str; 6] = ["mlp", "lenet", "resnet20", "resnet32", "resnet56", "wrn16_4"];

/// Classifier architecture, keyed by its registry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "mlp")]
    Mlp,
    #[serde(rename = "lenet")]
    LeNet,
    #[serde(rename = "resnet20")]
    ResNet20,
    #[serde(rename = "resnet32")]
    ResNet32,
    #[serde(rename = "resnet56")]
    ResNet56,
    #[serde(rename = "wrn16_4")]
    Wrn16x4,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        Self::Mlp,
        Self::LeNet,
        Self::ResNet20,
        Self::ResNet32,
        Self::ResNet56,
        Self::Wrn16x4,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mlp => "mlp",
            Self::LeNet => "lenet",
            Self::ResNet20 => "resnet20",
            Self::ResNet32 => "resnet32",
            Self::ResNet56 => "resnet56",
            Self::Wrn16x4 => "wrn16_4",
        }
    }

    /// Whether the registry name belongs to the ResNet family. Drives the
    /// optimizer defaults below.
    pub fn is_resnet(&self) -> bool {
        self.name().contains("resnet")
    }

    /// L2 weight decay used when the config does not override it.
    pub fn default_weight_decay(&self) -> f64 {
        if self.is_resnet() {
            1e-4
        } else {
            5e-4
        }
    }

    /// Multiplicative LR decay applied at each milestone.
    pub fn default_lr_gamma(&self) -> f64 {
        if self.is_resnet() {
            0.1
        } else {
            0.2
        }
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                anyhow::anyhow!("unknown model {s:?}; expected one of {}", MODEL_NAMES.join(", "))
            })
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Optimisation switches ───────────────────────────────────────────────────

/// Which optimiser drives the parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    AdamW,
}

impl OptimizerKind {
    pub fn from_str(s: &str) -> Self {
        match s {
            "adamw" => Self::AdamW,
            _ => Self::Sgd,
        }
    }
}

/// Decay mode after warmup. The schedule advances once per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrDecay {
    #[default]
    MultiStep,
    Cosine,
    Linear,
    None,
}

impl LrDecay {
    pub fn from_str(s: &str) -> Self {
        match s {
            "multistep" => Self::MultiStep,
            "cosine" => Self::Cosine,
            "linear" => Self::Linear,
            _ => Self::None,
        }
    }
}

/// Source of training images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    #[default]
    Cifar10,
    /// Seeded class-prototype images; no files needed.
    Synthetic,
}

impl DatasetKind {
    pub fn from_str(s: &str) -> Self {
        match s {
            "synthetic" => Self::Synthetic,
            _ => Self::Cifar10,
        }
    }
}

/// Optimiser and schedule settings shared by the teacher and student runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimConfig {
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// Overrides [`ModelKind::default_weight_decay`] when set.
    #[serde(default)]
    pub weight_decay: Option<f64>,
    #[serde(default)]
    pub lr_decay: LrDecay,
    /// Epochs at which the multistep schedule decays.
    #[serde(default = "default_milestones")]
    pub milestones: Vec<usize>,
    /// Overrides [`ModelKind::default_lr_gamma`] when set.
    #[serde(default)]
    pub lr_gamma: Option<f64>,
    #[serde(default)]
    pub lr_warmup_epochs: usize,
    /// Floor for cosine / linear decay.
    #[serde(default)]
    pub lr_min: f64,
    #[serde(default)]
    pub label_smoothing: f64,
    /// Global L2 gradient norm bound; `0` disables clipping.
    #[serde(default)]
    pub grad_clip_max_norm: f64,
}

// ── ExperimentConfig ────────────────────────────────────────────────────────

/// Everything needed to reproduce one teacher → student run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub teacher_model: ModelKind,
    pub student_model: ModelKind,
    /// Softmax temperature for the teacher's soft targets. Must be > 0.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub teacher_epochs: usize,
    #[serde(default = "default_epochs")]
    pub student_epochs: usize,

    // ── Data ────────────────────────────────────────────────────────────────
    #[serde(default)]
    pub dataset: DatasetKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Random crop + horizontal flip on the training split.
    #[serde(default = "default_true")]
    pub augment: bool,
    /// Training-split size for [`DatasetKind::Synthetic`]; the test split is a quarter of it.
    #[serde(default = "default_synthetic_samples")]
    pub synthetic_samples: usize,
    #[serde(default)]
    pub seed: u64,

    #[serde(default)]
    pub optim: OptimConfig,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_temperature() -> f64 {
    0.1
}
fn default_batch_size() -> usize {
    256
}
fn default_epochs() -> usize {
    100
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data/cifar-10-batches-bin")
}
fn default_num_classes() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_synthetic_samples() -> usize {
    2048
}
fn default_lr() -> f64 {
    0.1
}
fn default_momentum() -> f64 {
    0.9
}
fn default_milestones() -> Vec<usize> {
    vec![50, 80]
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Sgd,
            lr: default_lr(),
            momentum: default_momentum(),
            weight_decay: None,
            lr_decay: LrDecay::MultiStep,
            milestones: default_milestones(),
            lr_gamma: None,
            lr_warmup_epochs: 0,
            lr_min: 0.0,
            label_smoothing: 0.0,
            grad_clip_max_norm: 0.0,
        }
    }
}

impl OptimConfig {
    pub fn weight_decay_for(&self, kind: ModelKind) -> f64 {
        self.weight_decay.unwrap_or_else(|| kind.default_weight_decay())
    }

    pub fn lr_gamma_for(&self, kind: ModelKind) -> f64 {
        self.lr_gamma.unwrap_or_else(|| kind.default_lr_gamma())
    }
}

impl ExperimentConfig {
    /// Config with every default filled in.
    pub fn new(teacher_model: ModelKind, student_model: ModelKind) -> Self {
        Self {
            teacher_model,
            student_model,
            temperature: default_temperature(),
            batch_size: default_batch_size(),
            teacher_epochs: default_epochs(),
            student_epochs: default_epochs(),
            dataset: DatasetKind::Cifar10,
            data_dir: default_data_dir(),
            num_classes: default_num_classes(),
            augment: true,
            synthetic_samples: default_synthetic_samples(),
            seed: 0,
            optim: OptimConfig::default(),
        }
    }

    /// Reject settings that would only fail deep inside tensor math.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            anyhow::bail!("temperature must be finite and > 0, got {}", self.temperature);
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.num_classes < 2 {
            anyhow::bail!("num_classes must be at least 2, got {}", self.num_classes);
        }
        if !(self.optim.lr.is_finite() && self.optim.lr > 0.0) {
            anyhow::bail!("lr must be finite and > 0, got {}", self.optim.lr);
        }
        if !(0.0..1.0).contains(&self.optim.label_smoothing) {
            anyhow::bail!(
                "label_smoothing must be in [0, 1), got {}",
                self.optim.label_smoothing
            );
        }
        if self.optim.milestones.windows(2).any(|w| w[0] >= w[1]) {
            anyhow::bail!(
                "milestones must be strictly increasing, got {:?}",
                self.optim.milestones
            );
        }
        if self.dataset == DatasetKind::Synthetic && self.synthetic_samples < 4 {
            anyhow::bail!("synthetic_samples must be at least 4");
        }
        Ok(())
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_round_trip() {
        let mut config = ExperimentConfig::new(ModelKind::ResNet56, ModelKind::ResNet20);
        config.temperature = 4.0;
        config.optim.milestones = vec![10, 20, 30];
        let json = serde_json::to_string(&config).unwrap();
        let loaded: ExperimentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.teacher_model, ModelKind::ResNet56);
        assert_eq!(loaded.student_model, ModelKind::ResNet20);
        assert_eq!(loaded.temperature, 4.0);
        assert_eq!(loaded.optim.milestones, vec![10, 20, 30]);
        assert!(json.contains("\"resnet56\""));
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{ "teacher_model": "wrn16_4", "student_model": "lenet" }"#;
        let loaded: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.teacher_model, ModelKind::Wrn16x4);
        assert_eq!(loaded.student_model, ModelKind::LeNet);
        assert_eq!(loaded.batch_size, 256);
        assert_eq!(loaded.temperature, 0.1);
        assert_eq!(loaded.teacher_epochs, 100);
        assert_eq!(loaded.student_epochs, 100);
        assert_eq!(loaded.dataset, DatasetKind::Cifar10);
        assert_eq!(loaded.optim.optimizer, OptimizerKind::Sgd);
        assert_eq!(loaded.optim.lr_decay, LrDecay::MultiStep);
        assert_eq!(loaded.optim.milestones, vec![50, 80]);
        assert!(loaded.augment);
    }

    #[test]
    fn model_names_match_registry() {
        for (kind, name) in ModelKind::ALL.iter().zip(MODEL_NAMES) {
            assert_eq!(kind.name(), name);
            assert_eq!(name.parse::<ModelKind>().unwrap(), *kind);
        }
        assert!("resnet18".parse::<ModelKind>().is_err());
    }

    #[test]
    fn resnet_family_optimizer_defaults() {
        assert_eq!(ModelKind::ResNet20.default_weight_decay(), 1e-4);
        assert_eq!(ModelKind::ResNet56.default_lr_gamma(), 0.1);
        assert_eq!(ModelKind::Wrn16x4.default_weight_decay(), 5e-4);
        assert_eq!(ModelKind::LeNet.default_lr_gamma(), 0.2);

        let mut optim = OptimConfig::default();
        assert_eq!(optim.weight_decay_for(ModelKind::Mlp), 5e-4);
        optim.weight_decay = Some(0.0);
        assert_eq!(optim.weight_decay_for(ModelKind::Mlp), 0.0);
    }

    #[test]
    fn validate_rejects_bad_temperature() {
        let mut config = ExperimentConfig::new(ModelKind::ResNet20, ModelKind::Mlp);
        assert!(config.validate().is_ok());
        config.temperature = 0.0;
        assert!(config.validate().is_err());
        config.temperature = -1.0;
        assert!(config.validate().is_err());
        config.temperature = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsorted_milestones() {
        let mut config = ExperimentConfig::new(ModelKind::ResNet20, ModelKind::Mlp);
        config.optim.milestones = vec![80, 50];
        assert!(config.validate().is_err());
    }

    #[test]
    fn switch_parsing() {
        assert_eq!(LrDecay::from_str("cosine"), LrDecay::Cosine);
        assert_eq!(LrDecay::from_str("multistep"), LrDecay::MultiStep);
        assert_eq!(LrDecay::from_str("none"), LrDecay::None);
        assert_eq!(OptimizerKind::from_str("adamw"), OptimizerKind::AdamW);
        assert_eq!(DatasetKind::from_str("synthetic"), DatasetKind::Synthetic);
    }
}
