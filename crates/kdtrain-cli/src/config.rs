use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use kdtrain_distill::optim::ParamsAdam;
use kdtrain_distill::scheduler::PlateauConfig;
use kdtrain_distill::{DistillConfig, KdLoss, StageConfig};

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub frozen: StageSection,
    pub full: StageSection,
    pub output: OutputConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub seed: u64,
    pub temperature: f64,
    pub alpha: f64,
}

/// One `[frozen]` / `[full]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageSection {
    pub epochs: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub factor: f64,
    pub patience: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Where `<StudentName>.safetensors` checkpoints go.
    pub weights_dir: String,
    /// Parent of exported student directories.
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub prefer_gpu: bool,
    pub cuda_device_id: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig {
                batch_size: 32,
                seed: 42,
                temperature: 6.0,
                alpha: 0.1,
            },
            frozen: StageSection::from_stage(&StageConfig::frozen_default()),
            full: StageSection::from_stage(&StageConfig::full_default()),
            output: OutputConfig {
                weights_dir: "Weights".to_string(),
                dir: "output".to_string(),
            },
            device: DeviceConfig {
                prefer_gpu: false,
                cuda_device_id: 0,
            },
        }
    }
}

impl StageSection {
    fn from_stage(stage: &StageConfig) -> Self {
        Self {
            epochs: stage.epochs,
            lr: stage.optimizer.lr,
            weight_decay: stage.optimizer.weight_decay,
            factor: stage.scheduler.factor,
            patience: stage.scheduler.patience,
        }
    }

    /// Overlay this table on a stage preset, keeping the preset's betas,
    /// eps and plateau mode.
    fn apply(&self, preset: StageConfig) -> StageConfig {
        StageConfig {
            epochs: self.epochs,
            optimizer: ParamsAdam {
                lr: self.lr,
                weight_decay: self.weight_decay,
                ..preset.optimizer
            },
            scheduler: PlateauConfig {
                factor: self.factor,
                patience: self.patience,
                ..preset.scheduler
            },
        }
    }
}

impl AppConfig {
    /// Distiller hyper-parameters described by this config.
    pub fn distill_config(&self) -> DistillConfig {
        DistillConfig {
            frozen: self.frozen.apply(StageConfig::frozen_default()),
            full: self.full.apply(StageConfig::full_default()),
            loss: KdLoss {
                temperature: self.training.temperature,
                alpha: self.training.alpha,
            },
            batch_size: self.training.batch_size,
            seed: self.training.seed,
            console: true,
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables prefixed with `KDTRAIN__`
pub fn load_config(config_file: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let d = AppConfig::default();
    let mut builder = Config::builder()
        // Layer 1: defaults baked in
        .set_default("training.batch_size", d.training.batch_size as i64)?
        .set_default("training.seed", d.training.seed as i64)?
        .set_default("training.temperature", d.training.temperature)?
        .set_default("training.alpha", d.training.alpha)?
        .set_default("output.weights_dir", d.output.weights_dir.as_str())?
        .set_default("output.dir", d.output.dir.as_str())?
        .set_default("device.prefer_gpu", d.device.prefer_gpu)?
        .set_default("device.cuda_device_id", d.device.cuda_device_id as i64)?;

    for (table, stage) in [("frozen", &d.frozen), ("full", &d.full)] {
        builder = builder
            .set_default(format!("{table}.epochs"), stage.epochs as i64)?
            .set_default(format!("{table}.lr"), stage.lr)?
            .set_default(format!("{table}.weight_decay"), stage.weight_decay)?
            .set_default(format!("{table}.factor"), stage.factor)?
            .set_default(format!("{table}.patience"), stage.patience as i64)?;
    }

    // Layer 2: project default.toml
    builder = builder.add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    // Layer 4: environment variables (KDTRAIN__TRAINING__BATCH_SIZE, etc.)
    builder = builder.add_source(
        Environment::with_prefix("KDTRAIN")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── load_config defaults ──────────────────────────────────────────────────

    #[test]
    fn test_default_training_values() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.training.batch_size, 32);
        assert_eq!(cfg.training.seed, 42);
        assert!((cfg.training.temperature - 6.0).abs() < f64::EPSILON);
        assert!((cfg.training.alpha - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_stage_schedules() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.frozen.epochs, 8);
        assert_eq!(cfg.frozen.patience, 3);
        assert!((cfg.frozen.lr - 1e-3).abs() < f64::EPSILON);
        assert!((cfg.frozen.weight_decay - 1e-5).abs() < f64::EPSILON);
        assert_eq!(cfg.full.epochs, 12);
        assert_eq!(cfg.full.patience, 2);
        assert!((cfg.full.lr - 1e-4).abs() < f64::EPSILON);
        assert_eq!(cfg.full.weight_decay, 0.0);
    }

    #[test]
    fn test_default_weights_dir() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.output.weights_dir, "Weights");
        assert_eq!(cfg.output.dir, "output");
    }

    #[test]
    fn test_default_device_is_cpu() {
        let cfg = load_config(None).unwrap();
        assert!(!cfg.device.prefer_gpu);
        assert_eq!(cfg.device.cuda_device_id, 0);
    }

    // ── load_config from a custom file ────────────────────────────────────────

    #[test]
    fn test_custom_config_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(
            &file,
            "[training]\nbatch_size = 64\n\n[full]\nepochs = 3\nlr = 0.0005\n",
        )
        .unwrap();

        let cfg = load_config(Some(&file)).unwrap();
        assert_eq!(cfg.training.batch_size, 64);
        assert_eq!(cfg.full.epochs, 3);
        assert!((cfg.full.lr - 5e-4).abs() < f64::EPSILON);
        // untouched keys keep their defaults
        assert_eq!(cfg.full.patience, 2);
        assert_eq!(cfg.frozen.epochs, 8);
    }

    #[test]
    fn test_missing_custom_config_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    // ── distill_config ────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_matches_distiller_defaults() {
        let from_load = load_config(None).unwrap().distill_config();
        assert_eq!(from_load, DistillConfig::default());
    }

    #[test]
    fn test_stage_overrides_keep_preset_betas() {
        let mut cfg = AppConfig::default();
        cfg.frozen.lr = 0.01;
        cfg.frozen.factor = 0.5;
        let dc = cfg.distill_config();
        assert_eq!(dc.frozen.optimizer.lr, 0.01);
        assert_eq!(dc.frozen.optimizer.beta1, 0.9);
        assert_eq!(dc.frozen.optimizer.beta2, 0.999);
        assert_eq!(dc.frozen.scheduler.factor, 0.5);
        assert_eq!(dc.frozen.scheduler.mode, PlateauConfig::head_stage().mode);
    }

    // ── expand_path ───────────────────────────────────────────────────────────

    #[test]
    fn test_expand_absolute_path_unchanged() {
        assert_eq!(expand_path("/absolute/Weights"), PathBuf::from("/absolute/Weights"));
    }

    #[test]
    fn test_expand_tilde_produces_non_tilde_prefix() {
        let path = expand_path("~/kdtrain/Weights");
        let s = path.to_string_lossy();
        assert!(!s.starts_with('~'), "Expanded path must not start with '~', got: {s}");
        assert!(s.ends_with("Weights"), "got: {s}");
    }

    #[test]
    fn test_expand_relative_path_unchanged() {
        assert_eq!(expand_path("Weights"), PathBuf::from("Weights"));
    }
}
