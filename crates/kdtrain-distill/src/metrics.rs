//! Running epoch metrics and the per-epoch history.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::Phase;

/// Loss and hit counters accumulated over one phase of one epoch.
///
/// Loss is summed as `batch_loss · batch_len` so the final average is per
/// sample, not per batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    pub running_loss: f64,
    pub running_corrects: usize,
    pub seen: usize,
}

impl RunningMetrics {
    pub fn update(&mut self, batch_loss: f64, batch_corrects: usize, batch_len: usize) {
        self.running_loss += batch_loss * batch_len as f64;
        self.running_corrects += batch_corrects;
        self.seen += batch_len;
    }

    /// Mean per-sample loss over a split of `dataset_size` samples.
    pub fn epoch_loss(&self, dataset_size: usize) -> f64 {
        if dataset_size == 0 {
            return 0.0;
        }
        self.running_loss / dataset_size as f64
    }

    /// Accuracy as a fraction in `[0, 1]`.
    pub fn epoch_acc(&self, dataset_size: usize) -> f64 {
        if dataset_size == 0 {
            return 0.0;
        }
        self.running_corrects as f64 / dataset_size as f64
    }
}

/// Which half of the two-stage schedule produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Backbone frozen, head trained.
    Frozen,
    /// Every parameter trained.
    Full,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Frozen => "frozen",
            Stage::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub stage: Stage,
    /// 1-based within the stage.
    pub epoch: usize,
    pub phase: Phase,
    pub loss: f64,
    /// Fraction in `[0, 1]`.
    pub accuracy: f64,
    /// Learning rate in effect during the phase.
    pub lr: f64,
    /// Seconds since the start of the run.
    pub elapsed_secs: f64,
}

/// Every phase summary of a run, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub records: Vec<EpochRecord>,
}

impl History {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one phase, in order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &EpochRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    /// Highest validation accuracy seen, if any validation ran.
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.phase(Phase::Val).map(|r| r.accuracy).reduce(f64::max)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))
    }
}

/// `"3m 7.412s"`
pub fn format_elapsed(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor();
    format!("{}m {:.3}s", minutes as u64, secs - minutes * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: Phase, accuracy: f64) -> EpochRecord {
        EpochRecord {
            stage: Stage::Frozen,
            epoch: 1,
            phase,
            loss: 0.5,
            accuracy,
            lr: 1e-3,
            elapsed_secs: 1.0,
        }
    }

    #[test]
    fn running_metrics_weight_loss_by_batch_size() {
        let mut m = RunningMetrics::default();
        m.update(1.0, 3, 4);
        m.update(2.0, 1, 2);
        assert_eq!(m.seen, 6);
        assert!((m.epoch_loss(6) - 8.0 / 6.0).abs() < 1e-12);
        assert!((m.epoch_acc(6) - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn empty_split_reports_zero() {
        let m = RunningMetrics::default();
        assert_eq!(m.epoch_loss(0), 0.0);
        assert_eq!(m.epoch_acc(0), 0.0);
    }

    #[test]
    fn history_best_val_ignores_train() {
        let mut h = History::default();
        h.push(record(Phase::Train, 0.99));
        h.push(record(Phase::Val, 0.7));
        h.push(record(Phase::Val, 0.8));
        assert_eq!(h.best_val_accuracy(), Some(0.8));
        assert_eq!(h.phase(Phase::Train).count(), 1);
        assert_eq!(History::default().best_val_accuracy(), None);
    }

    #[test]
    fn history_serialises_phase_and_stage_names() {
        let mut h = History::default();
        h.push(record(Phase::Val, 0.5));
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains(r#""phase":"val""#));
        assert!(json.contains(r#""stage":"frozen""#));
    }

    #[test]
    fn formats_elapsed_minutes_and_seconds() {
        assert_eq!(format_elapsed(0.0), "0m 0.000s");
        assert_eq!(format_elapsed(187.25), "3m 7.250s");
    }
}
