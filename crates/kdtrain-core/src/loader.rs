//! On-disk model directories.
//!
//! A model directory holds the architecture next to its weights:
//!
//! ```text
//! <dir>/
//!   config.json                   — ClassifierConfig
//!   model.safetensors             — single-file weights, or
//!   model.safetensors.index.json  — shard index ({"weight_map": {name: file}})
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::model::{Classifier, ClassifierConfig};
use crate::state::{self, StateDict};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// A resolved model directory: parsed config plus weight file paths.
#[derive(Debug, Clone)]
pub struct ModelDir {
    pub root: PathBuf,
    pub config: ClassifierConfig,
    pub weight_files: Vec<PathBuf>,
}

impl ModelDir {
    /// Read `config.json` and locate the weight files in `dir`.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        let config = read_config(&dir.join(CONFIG_FILE))?;
        let weight_files = collect_safetensor_paths(dir)?;
        debug!(dir = %dir.display(), shards = weight_files.len(), "Model directory resolved");
        Ok(Self { root: dir.to_path_buf(), config, weight_files })
    }
}

/// Parse and validate a `config.json`.
pub fn read_config(path: &Path) -> CoreResult<ClassifierConfig> {
    let json = std::fs::read_to_string(path)?;
    let config: ClassifierConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
}

/// Build a classifier with random weights in a fresh [`VarMap`].
pub fn init_classifier(config: ClassifierConfig, device: &Device) -> CoreResult<(Classifier, VarMap)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = Classifier::new(config, vb)?;
    Ok((model, varmap))
}

/// Build the classifier described by `dir` and load its stored weights.
///
/// The model is registered first so every parameter exists in the map, then
/// each shard overwrites the random initialisation. Keys in the files that
/// the architecture does not use are ignored.
pub fn load_classifier(dir: &ModelDir, device: &Device) -> CoreResult<(Classifier, VarMap)> {
    let (model, varmap) = init_classifier(dir.config.clone(), device)?;
    let mut stored = StateDict::new();
    for path in &dir.weight_files {
        stored.extend(candle_core::safetensors::load(path, device)?);
    }
    state::restore(&varmap, &stored)?;
    info!(
        name = %dir.config.name,
        params = dir.config.num_params(),
        shards = dir.weight_files.len(),
        "Classifier weights loaded"
    );
    Ok((model, varmap))
}

fn collect_safetensor_paths(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let index_path = dir.join(WEIGHTS_INDEX_FILE);
    if index_path.exists() {
        let json = std::fs::read_to_string(&index_path)?;
        let index: serde_json::Value = serde_json::from_str(&json)?;
        let shards: BTreeSet<&str> = index["weight_map"]
            .as_object()
            .map(|m| m.values().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if shards.is_empty() {
            return Err(CoreError::MissingWeights(index_path.display().to_string()));
        }
        return Ok(shards.into_iter().map(|s| dir.join(s)).collect());
    }

    let single = dir.join(WEIGHTS_FILE);
    if single.exists() {
        return Ok(vec![single]);
    }

    Err(CoreError::MissingWeights(dir.display().to_string()))
}
