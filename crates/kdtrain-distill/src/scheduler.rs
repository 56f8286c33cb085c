//! Reduce-on-plateau learning-rate scheduling.
//!
//! Watches one scalar metric per step and multiplies the optimiser's
//! learning rate by `factor` once the metric has failed to improve for more
//! than `patience` consecutive steps.

use candle_nn::Optimizer;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Whether the watched metric should go down (loss) or up (accuracy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    Min,
    Max,
}

/// How `threshold` is applied when deciding whether a value improved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Improvement must beat `best · (1 ± threshold)`.
    Rel,
    /// Improvement must beat `best ± threshold`.
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub mode: PlateauMode,
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub threshold_mode: ThresholdMode,
    /// Steps to wait after a reduction before counting bad steps again.
    pub cooldown: usize,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped.
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            mode: PlateauMode::Max,
            factor: 0.2,
            patience: 3,
            threshold: 1e-4,
            threshold_mode: ThresholdMode::Rel,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

impl PlateauConfig {
    /// Head-only stage: accuracy-driven, patience 3.
    pub fn head_stage() -> Self {
        Self::default()
    }

    /// Full fine-tuning stage: accuracy-driven, patience 2.
    pub fn full_stage() -> Self {
        Self { patience: 2, ..Self::default() }
    }
}

#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    best: f64,
    num_bad_steps: usize,
    cooldown_counter: usize,
    num_reductions: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig) -> Self {
        let best = match config.mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };
        Self { config, best, num_bad_steps: 0, cooldown_counter: 0, num_reductions: 0 }
    }

    pub fn config(&self) -> &PlateauConfig {
        &self.config
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn num_bad_steps(&self) -> usize {
        self.num_bad_steps
    }

    pub fn num_reductions(&self) -> usize {
        self.num_reductions
    }

    /// Record `metric` and reduce the learning rate of `optimizer` if the
    /// plateau has lasted long enough. Returns the new rate on reduction.
    pub fn step<O: Optimizer>(&mut self, metric: f64, optimizer: &mut O) -> Option<f64> {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_steps = 0;
        } else {
            self.num_bad_steps += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_steps = 0;
        }

        if self.num_bad_steps <= self.config.patience {
            return None;
        }

        self.cooldown_counter = self.config.cooldown;
        self.num_bad_steps = 0;

        let old_lr = optimizer.learning_rate();
        let new_lr = (old_lr * self.config.factor).max(self.config.min_lr);
        if old_lr - new_lr <= self.config.eps {
            return None;
        }
        optimizer.set_learning_rate(new_lr);
        self.num_reductions += 1;
        info!(old_lr, new_lr, best = self.best, "Reducing learning rate on plateau");
        Some(new_lr)
    }

    fn is_better(&self, metric: f64) -> bool {
        let PlateauConfig { mode, threshold, threshold_mode, .. } = self.config;
        match (mode, threshold_mode) {
            (PlateauMode::Min, ThresholdMode::Rel) => metric < self.best * (1.0 - threshold),
            (PlateauMode::Min, ThresholdMode::Abs) => metric < self.best - threshold,
            (PlateauMode::Max, ThresholdMode::Rel) => metric > self.best * (1.0 + threshold),
            (PlateauMode::Max, ThresholdMode::Abs) => metric > self.best + threshold,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
