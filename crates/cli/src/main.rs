use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use kd_common::{
    loaders, test_loader, DatasetKind, ExperimentConfig, LrDecay, ModelKind, OptimConfig,
    OptimizerKind, MODEL_NAMES,
};
use kd_core::DistillationLoss;
use kd_train::{
    CsvReporter, Distillation, EpochMetrics, FrozenModel, LogReporter, Reporters, Supervised,
    Trainer, TrainerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "kd", about = "Teacher/student knowledge distillation for image classifiers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a teacher, then distil it into a student.
    Distill(DistillArgs),
    /// Supervised training of a single model.
    Train(TrainArgs),
    /// Evaluate a saved checkpoint on the test split.
    Eval(EvalArgs),
}

// ── Shared flags ───────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct DataArgs {
    #[arg(long = "batch_size", default_value = "256")]
    batch_size: usize,
    #[arg(long, default_value = "cifar10", value_parser = ["cifar10", "synthetic"])]
    dataset: String,
    /// `cifar-10-batches-bin` or its parent directory.
    #[arg(long = "data_dir", default_value = "data/cifar-10-batches-bin")]
    data_dir: PathBuf,
    /// Training-split size for `--dataset synthetic`.
    #[arg(long = "synthetic_samples", default_value = "2048")]
    synthetic_samples: usize,
    /// Disable random crop + flip on the training split.
    #[arg(long = "no_augment")]
    no_augment: bool,
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl DataArgs {
    fn apply(&self, config: &mut ExperimentConfig) {
        config.batch_size = self.batch_size;
        config.dataset = DatasetKind::from_str(&self.dataset);
        config.data_dir = self.data_dir.clone();
        config.synthetic_samples = self.synthetic_samples;
        config.augment = !self.no_augment;
        config.seed = self.seed;
    }
}

#[derive(Args, Debug)]
struct OptimArgs {
    #[arg(long, default_value = "sgd", value_parser = ["sgd", "adamw"])]
    optimizer: String,
    #[arg(long, default_value = "0.1")]
    lr: f64,
    #[arg(long, default_value = "0.9")]
    momentum: f64,
    /// Defaults to 1e-4 for ResNets and 5e-4 otherwise.
    #[arg(long = "weight_decay")]
    weight_decay: Option<f64>,
    #[arg(long = "lr_decay", default_value = "multistep", value_parser = ["multistep", "cosine", "linear", "none"])]
    lr_decay: String,
    #[arg(long, default_value = "50,80", value_delimiter = ',')]
    milestones: Vec<usize>,
    /// Multistep decay factor. Defaults to 0.1 for ResNets and 0.2 otherwise.
    #[arg(long = "lr_gamma")]
    lr_gamma: Option<f64>,
    #[arg(long = "lr_warmup_epochs", default_value = "0")]
    lr_warmup_epochs: usize,
    #[arg(long = "lr_min", default_value = "0.0")]
    lr_min: f64,
    #[arg(long = "label_smoothing", default_value = "0.0")]
    label_smoothing: f64,
    /// Global gradient-norm bound; 0 disables clipping.
    #[arg(long = "grad_clip_max_norm", default_value = "0.0")]
    grad_clip_max_norm: f64,
}

impl OptimArgs {
    fn to_config(&self) -> OptimConfig {
        OptimConfig {
            optimizer: OptimizerKind::from_str(&self.optimizer),
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            lr_decay: LrDecay::from_str(&self.lr_decay),
            milestones: self.milestones.clone(),
            lr_gamma: self.lr_gamma,
            lr_warmup_epochs: self.lr_warmup_epochs,
            lr_min: self.lr_min,
            label_smoothing: self.label_smoothing,
            grad_clip_max_norm: self.grad_clip_max_norm,
        }
    }
}

// ── Distill ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct DistillArgs {
    #[arg(long = "teacher_model", value_parser = MODEL_NAMES)]
    teacher_model: String,
    #[arg(long = "student_model", value_parser = MODEL_NAMES)]
    student_model: String,
    /// Softmax temperature applied to the teacher's logits.
    #[arg(long, default_value = "0.1")]
    temperature: f64,
    #[arg(long = "teacher_epochs", default_value = "100")]
    teacher_epochs: usize,
    #[arg(long = "student_epochs", default_value = "100")]
    student_epochs: usize,
    /// Skip teacher training and load these weights instead.
    #[arg(long = "teacher_checkpoint")]
    teacher_checkpoint: Option<PathBuf>,
    #[arg(long = "output_dir", default_value = "runs/distill")]
    output_dir: PathBuf,
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    optim: OptimArgs,
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, value_parser = MODEL_NAMES)]
    model: String,
    #[arg(long, default_value = "100")]
    epochs: usize,
    #[arg(long = "output_dir", default_value = "runs/train")]
    output_dir: PathBuf,
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    optim: OptimArgs,
}

// ── Eval ───────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct EvalArgs {
    #[arg(long, value_parser = MODEL_NAMES)]
    model: String,
    #[arg(long)]
    checkpoint: PathBuf,
    #[command(flatten)]
    data: DataArgs,
}

// ── Summary ────────────────────────────────────────────────────────────────────

/// Contents of `summary.json`.
#[derive(Serialize)]
struct Summary {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    runs: Vec<RunSummary>,
}

#[derive(Serialize)]
struct RunSummary {
    phase: &'static str,
    model: ModelKind,
    test: EpochMetrics,
}

impl Summary {
    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

// ── Main ───────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Distill(args) => cmd_distill(args),
        Command::Train(args) => cmd_train(args),
        Command::Eval(args) => cmd_eval(args),
    }
}

/// Validate, create `output_dir` and persist `config.json`.
fn prepare_run(config: &ExperimentConfig, output_dir: &Path) -> Result<()> {
    config.validate()?;
    std::fs::create_dir_all(output_dir)?;
    config.save(&output_dir.join("config.json"))?;
    Ok(())
}

fn select_device() -> Result<Device> {
    let device = Device::cuda_if_available(0)?;
    tracing::info!(cuda = device.is_cuda(), "Selected device");
    Ok(device)
}

fn reporters(output_dir: &Path) -> Result<Reporters> {
    Ok(Reporters::new()
        .with(LogReporter)
        .with(CsvReporter::create(&output_dir.join("metrics.csv"))?))
}

fn cmd_distill(args: DistillArgs) -> Result<()> {
    let teacher_kind: ModelKind = args.teacher_model.parse()?;
    let student_kind: ModelKind = args.student_model.parse()?;

    let mut config = ExperimentConfig::new(teacher_kind, student_kind);
    config.temperature = args.temperature;
    config.teacher_epochs = args.teacher_epochs;
    config.student_epochs = args.student_epochs;
    config.optim = args.optim.to_config();
    args.data.apply(&mut config);
    prepare_run(&config, &args.output_dir)?;

    let device = select_device()?;
    let (train, test) = loaders(&config)?;
    let shape = train.dataset().shape();
    eprintln!(
        "Data: {} train / {} test images, {} batches per epoch",
        train.num_samples(),
        test.num_samples(),
        train.num_batches()
    );
    let mut reporters = reporters(&args.output_dir)?;

    // Teacher: train from scratch or load a checkpoint.
    let teacher = match &args.teacher_checkpoint {
        Some(path) => {
            FrozenModel::load(teacher_kind, shape, config.num_classes, path, &device)?
        }
        None => {
            let mut trainer = Trainer::new(
                teacher_kind,
                shape,
                config.num_classes,
                TrainerConfig::for_model(teacher_kind, config.teacher_epochs, &config.optim),
                Supervised::new(config.optim.label_smoothing),
                device.clone(),
            )?;
            trainer.fit(&train, &test, &mut reporters, "teacher")?;
            trainer.save(&args.output_dir.join("teacher.safetensors"))?;
            trainer.freeze()
        }
    };
    let teacher_test = teacher.test(&test)?;
    eprintln!(
        "Teacher {teacher_kind}: test loss {:.4} accuracy {:.2}%",
        teacher_test.loss,
        100.0 * teacher_test.accuracy
    );

    // Student: cross-entropy + T²·KL towards the frozen teacher.
    let loss = DistillationLoss::new(config.temperature)?
        .with_label_smoothing(config.optim.label_smoothing);
    let mut student = Trainer::new(
        student_kind,
        shape,
        config.num_classes,
        TrainerConfig::for_model(student_kind, config.student_epochs, &config.optim),
        Distillation::new(teacher, loss),
        device,
    )?;
    let student_test = match student.fit(&train, &test, &mut reporters, "student")? {
        Some(m) => m,
        None => student.test(&test)?,
    };
    student.save(&args.output_dir.join("student.safetensors"))?;
    eprintln!(
        "Student {student_kind}: test loss {:.4} accuracy {:.2}% (T = {})",
        student_test.loss,
        100.0 * student_test.accuracy,
        config.temperature
    );

    Summary {
        temperature: Some(config.temperature),
        runs: vec![
            RunSummary {
                phase: "teacher",
                model: teacher_kind,
                test: teacher_test,
            },
            RunSummary {
                phase: "student",
                model: student_kind,
                test: student_test,
            },
        ],
    }
    .save(&args.output_dir.join("summary.json"))?;
    eprintln!("Done. Outputs in {}", args.output_dir.display());
    Ok(())
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let kind: ModelKind = args.model.parse()?;
    let mut config = ExperimentConfig::new(kind, kind);
    config.teacher_epochs = args.epochs;
    config.optim = args.optim.to_config();
    args.data.apply(&mut config);
    prepare_run(&config, &args.output_dir)?;

    let device = select_device()?;
    let (train, test) = loaders(&config)?;
    let mut reporters = reporters(&args.output_dir)?;

    let mut trainer = Trainer::new(
        kind,
        train.dataset().shape(),
        config.num_classes,
        TrainerConfig::for_model(kind, args.epochs, &config.optim),
        Supervised::new(config.optim.label_smoothing),
        device,
    )?;
    let test_metrics = match trainer.fit(&train, &test, &mut reporters, "train")? {
        Some(m) => m,
        None => trainer.test(&test)?,
    };
    let path = args.output_dir.join("model.safetensors");
    trainer.save(&path)?;
    eprintln!(
        "{kind}: test loss {:.4} accuracy {:.2}%. Saved to {}",
        test_metrics.loss,
        100.0 * test_metrics.accuracy,
        path.display()
    );

    Summary {
        temperature: None,
        runs: vec![RunSummary {
            phase: "train",
            model: kind,
            test: test_metrics,
        }],
    }
    .save(&args.output_dir.join("summary.json"))
}

fn cmd_eval(args: EvalArgs) -> Result<()> {
    let kind: ModelKind = args.model.parse()?;
    let mut config = ExperimentConfig::new(kind, kind);
    args.data.apply(&mut config);
    config.validate()?;

    let device = select_device()?;
    let test = test_loader(&config)?;
    let model = FrozenModel::load(
        kind,
        test.dataset().shape(),
        config.num_classes,
        &args.checkpoint,
        &device,
    )?;
    let m = model.test(&test)?;
    println!("{}", serde_json::to_string_pretty(&m)?);
    eprintln!(
        "{kind}: {} test images, loss {:.4}, accuracy {:.2}%",
        m.samples,
        m.loss,
        100.0 * m.accuracy
    );
    Ok(())
}
