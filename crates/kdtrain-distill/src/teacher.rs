//! Teacher model wrapper.
//!
//! The teacher is loaded once, never trained, and always evaluated in
//! [`Mode::Eval`]. Its logits are detached so backward passes through the
//! distillation loss never reach teacher parameters.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use tracing::info;

use kdtrain_core::{device_name, load_classifier, Classifier, ClassifierConfig, Mode, ModelDir};

pub struct Teacher {
    model: Classifier,
}

impl Teacher {
    /// Load a teacher from a model directory onto `device`.
    pub fn load(dir: &Path, device: &Device) -> Result<Self> {
        let model_dir = ModelDir::open(dir)
            .with_context(|| format!("Cannot open teacher model dir {}", dir.display()))?;
        let (model, _varmap) = load_classifier(&model_dir, device)
            .with_context(|| format!("Failed to load teacher weights from {}", dir.display()))?;

        info!(
            name = %model.name(),
            params = model.config().num_params(),
            num_classes = model.num_classes(),
            device = device_name(device),
            "Teacher model loaded"
        );
        Ok(Self { model })
    }

    /// Wrap an already-built classifier.
    pub fn from_classifier(model: Classifier) -> Self {
        Self { model }
    }

    /// Soft targets source: eval-mode logits, cut from the autograd graph.
    pub fn logits(&self, xs: &Tensor) -> Result<Tensor> {
        let logits = self
            .model
            .forward(xs, Mode::Eval)
            .context("Teacher forward pass failed")?;
        Ok(logits.detach())
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn config(&self) -> &ClassifierConfig {
        self.model.config()
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }
}
