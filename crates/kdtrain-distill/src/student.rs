//! Trainable student model.
//!
//! The student's parameters live in a [`VarMap`] so they can receive
//! gradients and be snapshotted, restored and saved between stages.
//!
//! ## Construction modes
//!
//! * **`from_preset`** — fresh random weights, backbone shape from a
//!   [`SizePreset`], input/output widths from the teacher.
//! * **`from_dir`** — a pretrained student model directory
//!   (`config.json` + safetensors) to fine-tune.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use tracing::info;

use kdtrain_core::model::HEAD_PREFIX;
use kdtrain_core::{init_classifier, load_classifier, state, Classifier, ClassifierConfig, Mode, ModelDir, StateDict};

use crate::presets::SizePreset;

pub struct TrainableStudent {
    pub(crate) model: Classifier,
    pub(crate) varmap: VarMap,
    pub(crate) device: Device,
}

impl TrainableStudent {
    // ── Constructors ──────────────────────────────────────────────────────────

    /// Create a student with random weights matching `preset`.
    pub fn from_preset(
        preset: SizePreset,
        name: &str,
        input_dim: usize,
        num_classes: usize,
        device: &Device,
    ) -> Result<Self> {
        let config = preset.classifier_config(name, input_dim, num_classes);
        info!(
            preset = preset.label(),
            params = config.num_params(),
            input_dim,
            num_classes,
            "Initialising student from size preset (random weights)"
        );
        Self::from_config(config, device)
    }

    /// Create a student with random weights for an explicit architecture.
    pub fn from_config(config: ClassifierConfig, device: &Device) -> Result<Self> {
        let (model, varmap) = init_classifier(config, device)
            .context("Failed to construct student classifier")?;
        Ok(Self { model, varmap, device: device.clone() })
    }

    /// Load a pretrained student from a model directory.
    pub fn from_dir(dir: &Path, device: &Device) -> Result<Self> {
        let model_dir = ModelDir::open(dir)
            .with_context(|| format!("Cannot open student model dir {}", dir.display()))?;
        let (model, varmap) = load_classifier(&model_dir, device)
            .with_context(|| format!("Failed to load student weights from {}", dir.display()))?;
        Ok(Self { model, varmap, device: device.clone() })
    }

    // ── Forward ───────────────────────────────────────────────────────────────

    /// Logits `[batch, num_classes]`.
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        self.model.forward(xs, mode).context("Student forward pass failed")
    }

    // ── Freezing ──────────────────────────────────────────────────────────────

    /// Only the head will receive gradients.
    pub fn freeze_backbone(&mut self) {
        self.model.set_backbone_frozen(true);
    }

    /// Every parameter receives gradients again.
    pub fn unfreeze_all(&mut self) {
        self.model.set_backbone_frozen(false);
    }

    pub fn is_backbone_frozen(&self) -> bool {
        self.model.is_backbone_frozen()
    }

    // ── Parameters ────────────────────────────────────────────────────────────

    /// Variables of the classification head, sorted by name.
    pub fn head_vars(&self) -> Result<Vec<Var>> {
        let prefix = format!("{HEAD_PREFIX}.");
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("student parameter store lock poisoned"))?;
        let mut named: Vec<(&String, &Var)> =
            data.iter().filter(|(name, _)| name.starts_with(&prefix)).collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
    }

    /// Every trainable variable.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Deep copy of the current weights.
    pub fn snapshot(&self) -> Result<StateDict> {
        state::snapshot(&self.varmap).context("Failed to snapshot student weights")
    }

    /// Load a snapshot back into the student.
    pub fn restore(&self, state_dict: &StateDict) -> Result<()> {
        state::restore(&self.varmap, state_dict).context("Failed to restore student weights")
    }

    /// Save the current weights as safetensors.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to save student weights to {}", path.display()))
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        self.model.name()
    }

    /// Used when a pretrained student is saved under a new name.
    pub fn rename(&mut self, name: &str) {
        self.model.set_name(name);
    }

    pub fn config(&self) -> &ClassifierConfig {
        self.model.config()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> TrainableStudent {
        TrainableStudent::from_preset(SizePreset::Tiny, "S", 6, 3, &Device::Cpu).unwrap()
    }

    #[test]
    fn head_vars_are_the_last_layer_only() {
        let s = student();
        let head = s.head_vars().unwrap();
        assert_eq!(head.len(), 2);
        let shapes: Vec<Vec<usize>> = head.iter().map(|v| v.dims().to_vec()).collect();
        // sorted: head.bias, head.weight
        assert_eq!(shapes, vec![vec![3], vec![3, 64]]);
        assert_eq!(s.all_vars().len(), 4);
    }

    #[test]
    fn rename_changes_config_name_only() {
        let mut s = student();
        let before = s.snapshot().unwrap().len();
        s.rename("Renamed");
        assert_eq!(s.name(), "Renamed");
        assert_eq!(s.config().name, "Renamed");
        assert_eq!(s.snapshot().unwrap().len(), before);
    }

    #[test]
    fn freeze_and_unfreeze_toggle_backbone() {
        let mut s = student();
        assert!(!s.is_backbone_frozen());
        s.freeze_backbone();
        assert!(s.is_backbone_frozen());
        s.unfreeze_all();
        assert!(!s.is_backbone_frozen());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let s = student();
        let xs = Tensor::ones((1, 6), candle_core::DType::F32, &Device::Cpu).unwrap();
        let before: Vec<Vec<f32>> = s.forward(&xs, Mode::Eval).unwrap().to_vec2().unwrap();
        let snap = s.snapshot().unwrap();

        for var in s.all_vars() {
            var.set(&var.zeros_like().unwrap()).unwrap();
        }
        let zeroed: Vec<Vec<f32>> = s.forward(&xs, Mode::Eval).unwrap().to_vec2().unwrap();
        assert_ne!(zeroed, before);

        s.restore(&snap).unwrap();
        let after: Vec<Vec<f32>> = s.forward(&xs, Mode::Eval).unwrap().to_vec2().unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn reloads_from_saved_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let s = student();
        s.save(&tmp.path().join(kdtrain_core::loader::WEIGHTS_FILE)).unwrap();
        std::fs::write(
            tmp.path().join(kdtrain_core::loader::CONFIG_FILE),
            serde_json::to_string(s.config()).unwrap(),
        )
        .unwrap();

        let loaded = TrainableStudent::from_dir(tmp.path(), &Device::Cpu).unwrap();
        assert_eq!(loaded.name(), "S");
        let xs = Tensor::ones((2, 6), candle_core::DType::F32, &Device::Cpu).unwrap();
        let a: Vec<Vec<f32>> = s.forward(&xs, Mode::Eval).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = loaded.forward(&xs, Mode::Eval).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);
    }
}
