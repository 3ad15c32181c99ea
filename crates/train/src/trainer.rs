//! Trainer: one model, one optimiser, one [`Objective`].
//!
//! `Trainer<Supervised>` trains the teacher; [`Trainer::freeze`] turns it into
//! a [`FrozenModel`] that `Trainer<Distillation>` consults for soft targets.

use std::path::Path;

use anyhow::Context;
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};

use kd_common::{
    batch_to_tensors, DataLoader, ImageBatch, ImageShape, LrDecay, ModelKind, OptimConfig,
    OptimizerKind,
};
use kd_core::{build_model, is_running_stat, Classifier};

use crate::frozen::FrozenModel;
use crate::metrics::{correct_predictions, EpochMetrics, MetricAccumulator, Mode, StepMetrics};
use crate::objective::{LossTerms, Objective};
use crate::optimizer::TrainOptimizer;
use crate::report::Reporter;
use crate::scheduler::LrScheduler;

// ── Config ──────────────────────────────────────────────────────────────────

/// Optimisation hyper-parameters for one model.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub optimizer: OptimizerKind,
    pub lr: f64,
    pub lr_min: f64,
    pub lr_warmup_epochs: usize,
    pub lr_decay: LrDecay,
    pub milestones: Vec<usize>,
    pub lr_gamma: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub grad_clip_max_norm: f64,
}

impl TrainerConfig {
    /// Resolve `optim` for `kind`, filling registry defaults for weight decay
    /// and the multistep factor.
    pub fn for_model(kind: ModelKind, epochs: usize, optim: &OptimConfig) -> Self {
        Self {
            epochs,
            optimizer: optim.optimizer,
            lr: optim.lr,
            lr_min: optim.lr_min,
            lr_warmup_epochs: optim.lr_warmup_epochs,
            lr_decay: optim.lr_decay,
            milestones: optim.milestones.clone(),
            lr_gamma: optim.lr_gamma_for(kind),
            momentum: optim.momentum,
            weight_decay: optim.weight_decay_for(kind),
            grad_clip_max_norm: optim.grad_clip_max_norm,
        }
    }
}

// ── Trainer ─────────────────────────────────────────────────────────────────

/// Owns the model, its variables, the optimiser and the LR schedule.
pub struct Trainer<O: Objective> {
    kind: ModelKind,
    model: Classifier,
    varmap: VarMap,
    vars: Vec<Var>,
    optimizer: TrainOptimizer,
    lr_scheduler: LrScheduler,
    objective: O,
    pub config: TrainerConfig,
    pub global_step: usize,
    epoch: usize,
    last_lr: f64,
    device: Device,
}

impl<O: Objective> Trainer<O> {
    /// Build `kind` from the registry with fresh weights.
    pub fn new(
        kind: ModelKind,
        shape: ImageShape,
        num_classes: usize,
        config: TrainerConfig,
        objective: O,
        device: Device,
    ) -> anyhow::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = build_model(kind, shape, num_classes, vb)?;
        let vars = trainable_vars(&varmap)?;

        let params: usize = vars.iter().map(|v| v.elem_count()).sum();
        tracing::info!(
            model = %kind,
            objective = objective.name(),
            params,
            tensors = vars.len(),
            optimizer = ?config.optimizer,
            weight_decay = config.weight_decay,
            "Model built"
        );

        let lr_scheduler = LrScheduler::new(
            config.lr,
            config.lr_min,
            config.lr_warmup_epochs,
            config.epochs,
            config.lr_decay,
        )
        .with_milestones(config.milestones.clone(), config.lr_gamma);

        let optimizer = TrainOptimizer::new(
            config.optimizer,
            vars.clone(),
            lr_scheduler.current_lr(),
            config.momentum,
            config.weight_decay,
        )?;

        Ok(Self {
            kind,
            model,
            varmap,
            vars,
            optimizer,
            last_lr: lr_scheduler.current_lr(),
            lr_scheduler,
            objective,
            config,
            global_step: 0,
            epoch: 0,
            device,
        })
    }

    /// Overwrite the weights from a safetensors checkpoint.
    pub fn load_weights(&mut self, path: &Path) -> anyhow::Result<()> {
        self.varmap
            .load(path)
            .with_context(|| format!("loading {} checkpoint {}", self.kind, path.display()))?;
        Ok(())
    }

    /// Run one batch. In [`Mode::Train`] this also back-propagates, clips
    /// and steps the optimiser.
    pub fn iteration(&mut self, batch: &ImageBatch, mode: Mode) -> anyhow::Result<StepMetrics> {
        let (input, labels) = batch_to_tensors(batch, &self.device)?;
        let terms = self.objective.compute(&self.model, &input, &labels, mode)?;
        let mut metrics = step_metrics(&terms, &labels, batch.len(), self.global_step)?;

        if mode.is_train() {
            if !metrics.loss.is_finite() {
                anyhow::bail!(
                    "non-finite {} loss at step {}: {}",
                    self.kind,
                    self.global_step,
                    metrics.loss
                );
            }
            self.optimizer
                .set_learning_rate(self.lr_scheduler.current_lr());
            let mut grads = terms.loss.backward()?;
            if self.config.grad_clip_max_norm > 0.0 {
                metrics.grad_norm = Some(clip_grad_norm(
                    &mut grads,
                    &self.vars,
                    self.config.grad_clip_max_norm,
                )?);
            }
            self.optimizer.step(&grads)?;
            self.global_step += 1;
            metrics.step = self.global_step;
        }
        Ok(metrics)
    }

    /// One training epoch, then advance the LR schedule.
    pub fn train(&mut self, loader: &DataLoader) -> anyhow::Result<EpochMetrics> {
        let epoch = self.epoch;
        let lr = self.lr_scheduler.current_lr();
        let mut acc = MetricAccumulator::default();
        loader.for_each_prefetched(epoch, |batch| {
            let step = self.iteration(&batch, Mode::Train)?;
            if let Some(norm) = step.grad_norm {
                tracing::debug!(step = step.step, grad_norm = norm, "clipped");
            }
            acc.add(&step);
            Ok(())
        })?;
        self.lr_scheduler.advance();
        self.epoch += 1;
        self.last_lr = lr;
        Ok(acc.finish(epoch, Mode::Train, lr))
    }

    /// Eval pass over `loader`; labelled with the most recent training epoch.
    pub fn test(&self, loader: &DataLoader) -> anyhow::Result<EpochMetrics> {
        let acc = evaluate(&self.model, &self.objective, loader, &self.device)?;
        Ok(acc.finish(self.epoch.saturating_sub(1), Mode::Eval, self.last_lr))
    }

    /// Train until `config.epochs` epochs are done, testing and reporting
    /// after each. Returns the last test metrics.
    pub fn fit(
        &mut self,
        train: &DataLoader,
        test: &DataLoader,
        reporter: &mut dyn Reporter,
        phase: &str,
    ) -> anyhow::Result<Option<EpochMetrics>> {
        let remaining = self.config.epochs.saturating_sub(self.epoch);
        tracing::info!(
            phase,
            model = %self.kind,
            epochs = remaining,
            batches = train.num_batches(),
            "Starting training"
        );

        let pb = ProgressBar::new(remaining as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40} {pos}/{len} epochs {msg}")?
                .progress_chars("=>-"),
        );
        pb.set_prefix(phase.to_string());

        let mut last = None;
        for _ in 0..remaining {
            let train_metrics = self.train(train)?;
            reporter.report(phase, &train_metrics)?;
            let test_metrics = self.test(test)?;
            reporter.report(phase, &test_metrics)?;
            pb.set_message(format!(
                "loss {:.4} acc {:.2}%",
                test_metrics.loss,
                100.0 * test_metrics.accuracy
            ));
            pb.inc(1);
            last = Some(test_metrics);
        }
        pb.finish_with_message("done");
        Ok(last)
    }

    /// Write every variable (running statistics included) as safetensors.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.varmap.save(path)?;
        tracing::info!(model = %self.kind, path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    /// Drop the optimiser and objective; the model can no longer be trained.
    pub fn freeze(self) -> FrozenModel {
        FrozenModel::from_parts(self.kind, self.model, self.varmap, self.device)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn model(&self) -> &Classifier {
        &self.model
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Variables the optimiser updates.
    pub fn trainable_vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn current_lr(&self) -> f64 {
        self.lr_scheduler.current_lr()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Every var except batch-norm running statistics, in name order.
fn trainable_vars(varmap: &VarMap) -> anyhow::Result<Vec<Var>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    let mut named: Vec<(&String, &Var)> = data
        .iter()
        .filter(|(name, _)| !is_running_stat(name))
        .collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
}

fn step_metrics(
    terms: &LossTerms,
    labels: &Tensor,
    samples: usize,
    step: usize,
) -> anyhow::Result<StepMetrics> {
    Ok(StepMetrics {
        step,
        loss: terms.loss.to_scalar::<f32>()?,
        kl_loss: terms
            .kl_loss
            .as_ref()
            .map(|kl| kl.to_scalar::<f32>())
            .transpose()?,
        correct: correct_predictions(&terms.logits, labels)?,
        samples,
        grad_norm: None,
    })
}

/// Forward-only pass over `loader` with `objective`.
pub(crate) fn evaluate<O: Objective>(
    model: &Classifier,
    objective: &O,
    loader: &DataLoader,
    device: &Device,
) -> anyhow::Result<MetricAccumulator> {
    let mut acc = MetricAccumulator::default();
    loader.for_each_prefetched(0, |batch| {
        let (input, labels) = batch_to_tensors(&batch, device)?;
        let terms = objective.compute(model, &input, &labels, Mode::Eval)?;
        acc.add(&step_metrics(&terms, &labels, batch.len(), 0)?);
        Ok(())
    })?;
    Ok(acc)
}

// ── Gradient utilities ──────────────────────────────────────────────────────

/// Total L2 norm of gradients.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> anyhow::Result<f64> {
    let mut total = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    Ok(total.sqrt().max(1e-12))
}

/// Clip gradients so their global L2 norm ≤ `max_norm`; returns the norm
/// before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> anyhow::Result<f64> {
    let norm = grad_norm(grads, vars)?;
    if norm <= max_norm {
        return Ok(norm);
    }
    let scale = max_norm / norm;
    for var in vars {
        if let Some(g) = grads.remove(var.as_tensor()) {
            let clipped = g.affine(scale, 0.0)?;
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(norm)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::{Distillation, Supervised};
    use crate::report::{CsvReporter, Reporters};
    use kd_common::{ImageDataset, Split};
    use kd_core::DistillationLoss;

    const SHAPE: ImageShape = ImageShape {
        channels: 3,
        height: 8,
        width: 8,
    };
    const CLASSES: usize = 3;

    fn loaders() -> (DataLoader, DataLoader) {
        let train = ImageDataset::synthetic(24, CLASSES, SHAPE, 7, Split::Train);
        let test = ImageDataset::synthetic(12, CLASSES, SHAPE, 7, Split::Test);
        (
            DataLoader::new(train, 8).shuffled(7).with_augmentation(true),
            DataLoader::new(test, 8),
        )
    }

    fn config(epochs: usize) -> TrainerConfig {
        TrainerConfig {
            epochs,
            optimizer: OptimizerKind::Sgd,
            lr: 0.05,
            lr_min: 0.0,
            lr_warmup_epochs: 0,
            lr_decay: LrDecay::MultiStep,
            milestones: vec![1],
            lr_gamma: 0.1,
            momentum: 0.9,
            weight_decay: 5e-4,
            grad_clip_max_norm: 0.0,
        }
    }

    fn supervised(kind: ModelKind, epochs: usize) -> Trainer<Supervised> {
        Trainer::new(kind, SHAPE, CLASSES, config(epochs), Supervised::default(), Device::Cpu)
            .unwrap()
    }

    fn snapshot(vars: &[Var]) -> Vec<Vec<f32>> {
        vars.iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
            .collect()
    }

    #[test]
    fn config_uses_registry_defaults() {
        let optim = OptimConfig::default();
        let resnet = TrainerConfig::for_model(ModelKind::ResNet20, 100, &optim);
        assert_eq!(resnet.weight_decay, 1e-4);
        assert_eq!(resnet.lr_gamma, 0.1);
        let mlp = TrainerConfig::for_model(ModelKind::Mlp, 100, &optim);
        assert_eq!(mlp.weight_decay, 5e-4);
        assert_eq!(mlp.lr_gamma, 0.2);
        assert_eq!(mlp.milestones, vec![50, 80]);
    }

    #[test]
    fn supervised_epoch_covers_every_sample() {
        let (train, _) = loaders();
        let mut trainer = supervised(ModelKind::Mlp, 2);
        let m = trainer.train(&train).unwrap();
        assert_eq!(m.samples, 24);
        assert_eq!(m.mode, Mode::Train);
        assert!(m.loss.is_finite() && m.loss > 0.0);
        assert!((0.0..=1.0).contains(&m.accuracy));
        assert!(m.kl_loss.is_none());
        assert_eq!(m.lr, 0.05);
        assert_eq!(trainer.global_step, 3);
        assert_eq!(trainer.epoch(), 1);
        // Milestone 1 reached.
        assert!((trainer.current_lr() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn training_changes_weights_eval_does_not() {
        let (train, test) = loaders();
        let mut trainer = supervised(ModelKind::Mlp, 1);
        let before = snapshot(trainer.trainable_vars());
        let m = trainer.test(&test).unwrap();
        assert_eq!(m.samples, 12);
        assert_eq!(m.mode, Mode::Eval);
        assert_eq!(snapshot(trainer.trainable_vars()), before);
        assert_eq!(trainer.global_step, 0);

        trainer.train(&train).unwrap();
        assert_ne!(snapshot(trainer.trainable_vars()), before);
    }

    #[test]
    fn running_stats_are_not_trainable() {
        let trainer = supervised(ModelKind::ResNet20, 1);
        let all = trainer.varmap().all_vars().len();
        let data = trainer.varmap().data().lock().unwrap();
        let stats = data.keys().filter(|k| is_running_stat(k)).count();
        assert!(stats > 0);
        assert_eq!(trainer.trainable_vars().len(), all - stats);
    }

    #[test]
    fn resnet_epoch_updates_running_stats() {
        let (train, _) = loaders();
        let mut trainer = supervised(ModelKind::ResNet20, 1);
        let mean = |t: &Trainer<Supervised>| -> Vec<f32> {
            let data = t.varmap().data().lock().unwrap();
            data["bn1.running_mean"].as_tensor().to_vec1().unwrap()
        };
        let before = mean(&trainer);
        trainer.train(&train).unwrap();
        assert_ne!(mean(&trainer), before);
    }

    #[test]
    fn clipping_bounds_the_global_norm() {
        let dev = Device::Cpu;
        let a = Var::new(&[3.0f32], &dev).unwrap();
        let b = Var::new(&[4.0f32], &dev).unwrap();
        // d/da = 3, d/db = 4 → norm 5.
        let loss = (a.as_tensor().sqr().unwrap().affine(0.5, 0.0).unwrap()
            + b.as_tensor().sqr().unwrap().affine(0.5, 0.0).unwrap())
        .unwrap()
        .sum_all()
        .unwrap();
        let vars = vec![a, b];
        let mut grads = loss.backward().unwrap();
        let before = clip_grad_norm(&mut grads, &vars, 1.0).unwrap();
        assert!((before - 5.0).abs() < 1e-5);
        assert!((grad_norm(&grads, &vars).unwrap() - 1.0).abs() < 1e-5);
        // Already within bounds: untouched.
        assert!((clip_grad_norm(&mut grads, &vars, 2.0).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn iteration_reports_grad_norm_when_clipping() {
        let (train, _) = loaders();
        let mut cfg = config(1);
        cfg.grad_clip_max_norm = 1e-3;
        let mut trainer =
            Trainer::new(ModelKind::Mlp, SHAPE, CLASSES, cfg, Supervised::default(), Device::Cpu)
                .unwrap();
        let batch = train.epoch_batches(0).next().unwrap();
        let m = trainer.iteration(&batch, Mode::Train).unwrap();
        assert!(m.grad_norm.unwrap() > 0.0);
        assert_eq!(m.step, 1);
        let m = trainer.iteration(&batch, Mode::Eval).unwrap();
        assert!(m.grad_norm.is_none());
        assert_eq!(m.step, 1);
    }

    fn frozen_teacher() -> FrozenModel {
        let (train, _) = loaders();
        let mut teacher = supervised(ModelKind::Mlp, 1);
        teacher.train(&train).unwrap();
        teacher.freeze()
    }

    #[test]
    fn teacher_receives_no_gradients() {
        let teacher = frozen_teacher();
        let teacher_vars = teacher.parameters();
        let objective = Distillation::new(teacher, DistillationLoss::new(2.0).unwrap());
        let student = Trainer::new(
            ModelKind::Mlp,
            SHAPE,
            CLASSES,
            config(1),
            objective,
            Device::Cpu,
        )
        .unwrap();

        let (train, _) = loaders();
        let batch = train.epoch_batches(0).next().unwrap();
        let (input, labels) = batch_to_tensors(&batch, &Device::Cpu).unwrap();
        let terms = student
            .objective()
            .compute(student.model(), &input, &labels, Mode::Train)
            .unwrap();
        let grads = terms.loss.backward().unwrap();
        for var in &teacher_vars {
            assert!(grads.get(var.as_tensor()).is_none());
        }
        assert!(student
            .trainable_vars()
            .iter()
            .any(|v| grads.get(v.as_tensor()).is_some()));
    }

    #[test]
    fn student_epoch_leaves_teacher_unchanged() {
        let teacher = frozen_teacher();
        let before = snapshot(&teacher.parameters());
        let objective = Distillation::new(teacher, DistillationLoss::new(0.5).unwrap());
        let mut student = Trainer::new(
            ModelKind::Mlp,
            SHAPE,
            CLASSES,
            config(1),
            objective,
            Device::Cpu,
        )
        .unwrap();
        let (train, test) = loaders();
        let m = student.train(&train).unwrap();
        let kl = m.kl_loss.unwrap();
        assert!(kl.is_finite() && kl >= 0.0);
        assert!(student.test(&test).unwrap().kl_loss.is_some());
        assert_eq!(snapshot(&student.objective().teacher().parameters()), before);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teacher.safetensors");
        let (train, test) = loaders();
        let mut trainer = supervised(ModelKind::ResNet20, 1);
        trainer.train(&train).unwrap();
        trainer.save(&path).unwrap();
        let expected = trainer.test(&test).unwrap();

        let frozen =
            FrozenModel::load(ModelKind::ResNet20, SHAPE, CLASSES, &path, &Device::Cpu).unwrap();
        assert_eq!(frozen.kind(), ModelKind::ResNet20);
        let got = frozen.test(&test).unwrap();
        assert!((got.loss - expected.loss).abs() < 1e-5);
        assert_eq!(got.accuracy, expected.accuracy);

        let mut fresh = supervised(ModelKind::ResNet20, 1);
        fresh.load_weights(&path).unwrap();
        assert!((fresh.test(&test).unwrap().loss - expected.loss).abs() < 1e-5);
    }

    #[test]
    fn fit_reports_train_and_test_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let (train, test) = loaders();
        let mut trainer = supervised(ModelKind::Mlp, 2);
        let mut reporters = Reporters::new().with(CsvReporter::create(&path).unwrap());
        let last = trainer.fit(&train, &test, &mut reporters, "teacher").unwrap();
        assert_eq!(last.unwrap().epoch, 1);
        assert_eq!(trainer.epoch(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].starts_with("teacher,0,train,"));
        assert!(rows[1].starts_with("teacher,0,eval,"));
        assert!(rows[3].starts_with("teacher,1,eval,"));

        // Already at the configured epoch count.
        assert!(trainer
            .fit(&train, &test, &mut reporters, "teacher")
            .unwrap()
            .is_none());
    }
}
