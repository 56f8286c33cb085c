//! MLP classifier used for both sides of a distillation run.
//!
//! The network is split the way a pretrained vision model usually is: a
//! feature-extracting **backbone** followed by a single linear **head**.
//!
//! ```text
//! input ─▶ backbone.0 ─▶ relu ─▶ dropout ─▶ … ─▶ backbone.N ─▶ relu ─▶ head ─▶ logits
//! ```
//!
//! Parameter names follow the `VarBuilder` prefixes (`backbone.0.weight`,
//! `head.bias`, …) so a state dict saved from one run loads into another
//! with the same [`ClassifierConfig`].

use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// `VarBuilder` prefix of the backbone layers.
pub const BACKBONE_PREFIX: &str = "backbone";
/// `VarBuilder` prefix of the classification head (the last child).
pub const HEAD_PREFIX: &str = "head";

/// Architecture description, stored as `config.json` next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Display name; used for the default weights file name.
    pub name: String,
    pub input_dim: usize,
    /// Width of each hidden backbone layer. Empty means a linear classifier.
    #[serde(default)]
    pub hidden_dims: Vec<usize>,
    pub num_classes: usize,
    /// Dropout probability applied after each backbone activation in
    /// training mode.
    #[serde(default)]
    pub dropout: f32,
}

impl ClassifierConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.input_dim == 0 {
            return Err(config_err("input_dim", "must be positive"));
        }
        if self.num_classes < 2 {
            return Err(config_err("num_classes", "a classifier needs at least 2 classes"));
        }
        if let Some(i) = self.hidden_dims.iter().position(|&d| d == 0) {
            return Err(config_err("hidden_dims", &format!("layer {i} has zero width")));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(config_err("dropout", "must be in [0, 1)"));
        }
        Ok(())
    }

    /// Number of trainable scalars (weights + biases).
    pub fn num_params(&self) -> usize {
        let mut total = 0;
        let mut fan_in = self.input_dim;
        for &width in &self.hidden_dims {
            total += fan_in * width + width;
            fan_in = width;
        }
        total + fan_in * self.num_classes + self.num_classes
    }

    /// Input width of the head, i.e. the backbone's output width.
    pub fn feature_dim(&self) -> usize {
        self.hidden_dims.last().copied().unwrap_or(self.input_dim)
    }
}

fn config_err(field: &str, reason: &str) -> CoreError {
    CoreError::Config { field: field.to_string(), reason: reason.to_string() }
}

/// Forward-pass mode; the equivalent of `.train()` / `.eval()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Backbone + head classifier.
#[derive(Debug)]
pub struct Classifier {
    config: ClassifierConfig,
    backbone: Vec<Linear>,
    head: Linear,
    backbone_frozen: bool,
}

impl Classifier {
    /// Register every layer under `vb`.
    ///
    /// Fresh `VarMap`-backed builders initialise weights randomly; the caller
    /// overwrites them afterwards when loading a checkpoint.
    pub fn new(config: ClassifierConfig, vb: VarBuilder) -> CoreResult<Self> {
        config.validate()?;

        let vb_backbone = vb.pp(BACKBONE_PREFIX);
        let mut backbone = Vec::with_capacity(config.hidden_dims.len());
        let mut fan_in = config.input_dim;
        for (i, &width) in config.hidden_dims.iter().enumerate() {
            backbone.push(linear(fan_in, width, vb_backbone.pp(i))?);
            fan_in = width;
        }
        let head = linear(fan_in, config.num_classes, vb.pp(HEAD_PREFIX))?;

        Ok(Self { config, backbone, head, backbone_frozen: false })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Rename the model; parameters are untouched.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.config.name = name.into();
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    /// Stop gradients from reaching the backbone.
    ///
    /// Backbone activations are detached from the graph, so backward passes
    /// only produce gradients for the head.
    pub fn set_backbone_frozen(&mut self, frozen: bool) {
        self.backbone_frozen = frozen;
    }

    pub fn is_backbone_frozen(&self) -> bool {
        self.backbone_frozen
    }

    /// Backbone features `[batch, feature_dim]`.
    pub fn features(&self, xs: &Tensor, mode: Mode) -> CoreResult<Tensor> {
        let (_batch, dim) = xs.dims2()?;
        if dim != self.config.input_dim {
            return Err(CoreError::ShapeMismatch {
                name: "input".to_string(),
                expected: vec![self.config.input_dim],
                got: vec![dim],
            });
        }

        let mut hidden = xs.clone();
        for layer in &self.backbone {
            hidden = layer.forward(&hidden)?.relu()?;
            if mode == Mode::Train && self.config.dropout > 0.0 {
                hidden = candle_nn::ops::dropout(&hidden, self.config.dropout)?;
            }
        }

        if self.backbone_frozen {
            hidden = hidden.detach();
        }
        Ok(hidden)
    }

    /// Class logits `[batch, num_classes]`.
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> CoreResult<Tensor> {
        let features = self.features(xs, mode)?;
        Ok(self.head.forward(&features)?)
    }

    /// Most likely class per row, as a `U32` tensor `[batch]`.
    pub fn predict(&self, xs: &Tensor) -> CoreResult<Tensor> {
        Ok(self.forward(xs, Mode::Eval)?.argmax(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config(hidden: Vec<usize>) -> ClassifierConfig {
        ClassifierConfig {
            name: "TestNet".to_string(),
            input_dim: 4,
            hidden_dims: hidden,
            num_classes: 3,
            dropout: 0.0,
        }
    }

    fn build(cfg: ClassifierConfig) -> (Classifier, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        (Classifier::new(cfg, vb).unwrap(), varmap)
    }

    #[test]
    fn forward_produces_logits_per_class() {
        let (model, _) = build(config(vec![8, 6]));
        let xs = Tensor::zeros((5, 4), DType::F32, &Device::Cpu).unwrap();
        let logits = model.forward(&xs, Mode::Eval).unwrap();
        assert_eq!(logits.dims(), &[5, 3]);
    }

    #[test]
    fn registers_backbone_and_head_parameters() {
        let (_, varmap) = build(config(vec![8]));
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(
            names,
            vec!["backbone.0.bias", "backbone.0.weight", "head.bias", "head.weight"]
        );
    }

    #[test]
    fn num_params_matches_registered_vars() {
        let cfg = config(vec![8, 6]);
        let expected = cfg.num_params();
        let (_, varmap) = build(cfg);
        let total: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        assert_eq!(total, expected);
    }

    #[test]
    fn linear_classifier_has_no_backbone() {
        let cfg = config(vec![]);
        assert_eq!(cfg.feature_dim(), 4);
        let (model, varmap) = build(cfg);
        assert_eq!(varmap.all_vars().len(), 2);
        let xs = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(model.forward(&xs, Mode::Train).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let (model, _) = build(config(vec![8]));
        let xs = Tensor::zeros((2, 7), DType::F32, &Device::Cpu).unwrap();
        let err = model.forward(&xs, Mode::Eval).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn frozen_backbone_receives_no_gradient() {
        let (mut model, varmap) = build(config(vec![8]));
        model.set_backbone_frozen(true);
        let xs = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
        let loss = model.forward(&xs, Mode::Train).unwrap().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        let data = varmap.data().lock().unwrap();
        assert!(grads.get(data["backbone.0.weight"].as_tensor()).is_none());
        assert!(grads.get(data["head.weight"].as_tensor()).is_some());
    }

    #[test]
    fn unfrozen_backbone_receives_gradient() {
        let (model, varmap) = build(config(vec![8]));
        let xs = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
        let loss = model.forward(&xs, Mode::Train).unwrap().sqr().unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(grads.get(data["backbone.0.weight"].as_tensor()).is_some());
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let mut cfg = config(vec![8]);
        cfg.num_classes = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = config(vec![0]);
        cfg.num_classes = 3;
        assert!(cfg.validate().is_err());

        let mut cfg = config(vec![8]);
        cfg.dropout = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = config(vec![8]);
        cfg.input_dim = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_json_defaults_optional_fields() {
        let cfg: ClassifierConfig =
            serde_json::from_str(r#"{"name":"n","input_dim":3,"num_classes":2}"#).unwrap();
        assert!(cfg.hidden_dims.is_empty());
        assert_eq!(cfg.dropout, 0.0);
    }
}
