//! Learning rate schedule, advanced once per epoch.

use kd_common::LrDecay;

// ── LR Scheduler ────────────────────────────────────────────────────────────

/// Learning rate schedule: warmup → multistep / cosine / linear / constant.
#[derive(Clone, Debug)]
pub struct LrScheduler {
    step: usize,
    lr: f64,
    lr_min: f64,
    warmup_steps: usize,
    max_steps: usize,
    decay: LrDecay,
    milestones: Vec<usize>,
    gamma: f64,
}

impl LrScheduler {
    pub fn new(
        lr: f64,
        lr_min: f64,
        warmup_steps: usize,
        max_steps: usize,
        decay: LrDecay,
    ) -> Self {
        Self {
            step: 0,
            lr,
            lr_min,
            warmup_steps,
            max_steps,
            decay,
            milestones: Vec::new(),
            gamma: 0.1,
        }
    }

    /// Milestones for [`LrDecay::MultiStep`]: the rate is multiplied by
    /// `gamma` once `step` reaches each milestone.
    pub fn with_milestones(mut self, milestones: Vec<usize>, gamma: f64) -> Self {
        self.milestones = milestones;
        self.gamma = gamma;
        self
    }

    /// Current learning rate at the current step.
    pub fn current_lr(&self) -> f64 {
        let step = self.step;

        // Warmup phase: linear ramp from 0 to lr.
        if self.warmup_steps > 0 && step < self.warmup_steps {
            return self.lr * (step as f64 + 1.0) / self.warmup_steps as f64;
        }

        if self.decay == LrDecay::MultiStep {
            let passed = self.milestones.iter().filter(|&&m| m <= step).count();
            return self.lr * self.gamma.powi(passed as i32);
        }

        // No decay or no max_steps → constant lr.
        if self.max_steps == 0 || self.decay == LrDecay::None {
            return self.lr;
        }

        let step = step.min(self.max_steps);
        if step <= self.warmup_steps {
            return self.lr;
        }

        let decay_steps = (self.max_steps - self.warmup_steps).max(1);
        let progress = (step - self.warmup_steps) as f64 / decay_steps as f64;

        match self.decay {
            LrDecay::Cosine => {
                let cos = (std::f64::consts::PI * progress).cos();
                self.lr_min + 0.5 * (self.lr - self.lr_min) * (1.0 + cos)
            }
            LrDecay::Linear => self.lr - (self.lr - self.lr_min) * progress,
            LrDecay::MultiStep | LrDecay::None => self.lr,
        }
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
