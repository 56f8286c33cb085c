//! Parameter snapshots ("state dicts").
//!
//! A [`StateDict`] owns deep copies of every variable in a [`VarMap`], so it
//! is unaffected by later optimiser steps. The distiller keeps one as the
//! best-so-far student and writes it to disk as safetensors.

use std::collections::HashMap;
use std::path::Path;

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::{CoreError, CoreResult};

pub type StateDict = HashMap<String, Tensor>;

/// Deep-copy every variable of `varmap`.
pub fn snapshot(varmap: &VarMap) -> CoreResult<StateDict> {
    let data = varmap.data().lock().map_err(|_| CoreError::StateLock)?;
    data.iter()
        .map(|(name, var)| -> CoreResult<(String, Tensor)> {
            Ok((name.clone(), var.as_tensor().copy()?))
        })
        .collect()
}

/// Overwrite every variable of `varmap` with the matching tensor in `state`.
///
/// Every variable must be present with the same shape. Extra entries in
/// `state` are ignored.
pub fn restore(varmap: &VarMap, state: &StateDict) -> CoreResult<()> {
    let data = varmap.data().lock().map_err(|_| CoreError::StateLock)?;
    for (name, var) in data.iter() {
        let value = state
            .get(name)
            .ok_or_else(|| CoreError::MissingParameter(name.clone()))?;
        if value.dims() != var.dims() {
            return Err(CoreError::ShapeMismatch {
                name: name.clone(),
                expected: var.dims().to_vec(),
                got: value.dims().to_vec(),
            });
        }
        let value = value.to_device(var.device())?.to_dtype(var.dtype())?;
        var.set(&value)?;
    }
    Ok(())
}

/// Write `state` as a safetensors file, creating parent directories.
pub fn save(state: &StateDict, path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    candle_core::safetensors::save(state, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use tempfile::TempDir;

    use crate::loader::init_classifier;
    use crate::model::ClassifierConfig;

    fn varmap() -> VarMap {
        let cfg = ClassifierConfig {
            name: "S".to_string(),
            input_dim: 2,
            hidden_dims: vec![3],
            num_classes: 2,
            dropout: 0.0,
        };
        init_classifier(cfg, &Device::Cpu).unwrap().1
    }

    fn head_weight(varmap: &VarMap) -> Vec<Vec<f32>> {
        let data = varmap.data().lock().unwrap();
        data["head.weight"].as_tensor().to_vec2().unwrap()
    }

    fn zero_head(varmap: &VarMap) {
        let data = varmap.data().lock().unwrap();
        let var = &data["head.weight"];
        var.set(&var.zeros_like().unwrap()).unwrap();
    }

    #[test]
    fn snapshot_is_independent_of_later_updates() {
        let vm = varmap();
        let before = head_weight(&vm);
        let snap = snapshot(&vm).unwrap();

        zero_head(&vm);

        let snap_head: Vec<Vec<f32>> = snap["head.weight"].to_vec2().unwrap();
        assert_eq!(snap_head, before);
        assert_ne!(head_weight(&vm), before);
    }

    #[test]
    fn restore_brings_back_snapshot_values() {
        let vm = varmap();
        let before = head_weight(&vm);
        let snap = snapshot(&vm).unwrap();
        zero_head(&vm);

        restore(&vm, &snap).unwrap();
        assert_eq!(head_weight(&vm), before);
    }

    #[test]
    fn restore_rejects_missing_and_misshapen_entries() {
        let vm = varmap();
        let mut snap = snapshot(&vm).unwrap();
        snap.remove("head.bias");
        assert!(matches!(restore(&vm, &snap), Err(CoreError::MissingParameter(_))));

        let mut snap = snapshot(&vm).unwrap();
        snap.insert(
            "head.bias".to_string(),
            Tensor::zeros(5, DType::F32, &Device::Cpu).unwrap(),
        );
        assert!(matches!(restore(&vm, &snap), Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn save_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Weights").join("S.safetensors");
        let vm = varmap();
        save(&snapshot(&vm).unwrap(), &path).unwrap();

        let loaded = candle_core::safetensors::load(&path, &Device::Cpu).unwrap();
        assert_eq!(loaded.len(), 4);
        let w: Vec<Vec<f32>> = loaded["head.weight"].to_vec2().unwrap();
        assert_eq!(w, head_weight(&vm));
    }
}
