//! Epoch metric sinks: tracing log lines and `metrics.csv`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::metrics::EpochMetrics;

/// Receives one [`EpochMetrics`] per train or eval pass. `phase` names the
/// run (`teacher`, `student`, ...).
pub trait Reporter {
    fn report(&mut self, phase: &str, metrics: &EpochMetrics) -> Result<()>;
}

// ── LogReporter ─────────────────────────────────────────────────────────────

/// Emits a `tracing` info event per epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, phase: &str, m: &EpochMetrics) -> Result<()> {
        tracing::info!(
            phase,
            epoch = m.epoch,
            mode = m.mode.as_str(),
            loss = format!("{:.4}", m.loss),
            accuracy = format!("{:.4}", m.accuracy),
            kl_loss = m.kl_loss.map(|kl| format!("{kl:.4}")),
            lr = format!("{:.2e}", m.lr),
            "epoch"
        );
        Ok(())
    }
}

// ── CsvReporter ─────────────────────────────────────────────────────────────

/// Appends one row per epoch to a CSV file. Rows are flushed immediately
/// so an interrupted run keeps its history.
pub struct CsvReporter {
    writer: BufWriter<File>,
}

impl CsvReporter {
    pub const HEADER: &'static str = "phase,epoch,mode,loss,accuracy,kl_loss,lr";

    /// Create (truncate) `path` and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("creating metrics file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", Self::HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }
}

impl Reporter for CsvReporter {
    fn report(&mut self, phase: &str, m: &EpochMetrics) -> Result<()> {
        let kl = m.kl_loss.map(|kl| format!("{kl:.6}")).unwrap_or_default();
        writeln!(
            self.writer,
            "{phase},{},{},{:.6},{:.6},{kl},{:e}",
            m.epoch,
            m.mode.as_str(),
            m.loss,
            m.accuracy,
            m.lr
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

// ── Reporters ───────────────────────────────────────────────────────────────

/// Fan-out to several reporters, in insertion order.
#[derive(Default)]
pub struct Reporters(Vec<Box<dyn Reporter>>);

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.0.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Reporter for Reporters {
    fn report(&mut self, phase: &str, metrics: &EpochMetrics) -> Result<()> {
        for reporter in self.0.iter_mut() {
            reporter.report(phase, metrics)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Mode;

    fn metrics(epoch: usize, mode: Mode, kl: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            mode,
            loss: 1.25,
            accuracy: 0.5,
            kl_loss: kl,
            lr: 0.1,
            samples: 8,
        }
    }

    #[test]
    fn csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("metrics.csv");
        let mut csv = CsvReporter::create(&path).unwrap();
        csv.report("teacher", &metrics(0, Mode::Train, None)).unwrap();
        csv.report("student", &metrics(1, Mode::Eval, Some(0.125))).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CsvReporter::HEADER);
        assert_eq!(lines[1], "teacher,0,train,1.250000,0.500000,,1e-1");
        assert_eq!(lines[2], "student,1,eval,1.250000,0.500000,0.125000,1e-1");
    }

    struct Counting(std::rc::Rc<std::cell::Cell<usize>>);

    impl Reporter for Counting {
        fn report(&mut self, _phase: &str, _m: &EpochMetrics) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn fan_out_reaches_every_reporter() {
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut all = Reporters::new()
            .with(LogReporter)
            .with(Counting(hits.clone()))
            .with(Counting(hits.clone()));
        assert_eq!(all.len(), 3);
        all.report("teacher", &metrics(0, Mode::Train, None)).unwrap();
        assert_eq!(hits.get(), 2);
    }
}
