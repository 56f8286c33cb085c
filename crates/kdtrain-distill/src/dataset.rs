//! Dataset loading for distillation.
//!
//! A dataset directory holds one file per phase:
//!
//! ```text
//! <dir>/train.jsonl  or  <dir>/train.safetensors
//! <dir>/val.jsonl    or  <dir>/val.safetensors
//! ```
//!
//! JSONL records carry one sample per line:
//!
//! ```json
//! {"features": [0.1, 0.7, -1.2], "label": 2}
//! ```
//!
//! Safetensors files hold a `features` tensor `[N, D]` and a `labels`
//! tensor `[N]` of any integer or float dtype.

use std::fmt;
use std::fs;
use std::io::{self, BufRead};
use std::ops::Index;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::info;

// ── Phase ─────────────────────────────────────────────────────────────────────

/// Which half of an epoch is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Val,
}

impl Phase {
    /// Epoch order: optimise first, then measure.
    pub const ALL: [Phase; 2] = [Phase::Train, Phase::Val];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Samples and batches ───────────────────────────────────────────────────────

/// A single labelled example.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: u32,
}

/// One mini-batch on the training device.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, input_dim]`, F32.
    pub features: Tensor,
    /// `[batch]`, U32.
    pub targets: Tensor,
    len: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ── DataLoader ────────────────────────────────────────────────────────────────

/// All samples of one phase, kept in host memory.
#[derive(Debug, Clone)]
pub struct DataLoader {
    samples: Vec<Sample>,
    feature_dim: usize,
}

impl DataLoader {
    /// Wrap in-memory samples. Every feature vector must have the same,
    /// non-zero length.
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        ensure!(!samples.is_empty(), "dataset split is empty");
        let feature_dim = samples[0].features.len();
        ensure!(feature_dim > 0, "samples have no features");
        if let Some(i) = samples.iter().position(|s| s.features.len() != feature_dim) {
            bail!(
                "sample {i} has {} features, expected {feature_dim}",
                samples[i].features.len()
            );
        }
        Ok(Self { samples, feature_dim })
    }

    /// Load a `.jsonl` or `.safetensors` split file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let samples = match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("json") => read_jsonl(path)?,
            Some("safetensors") => read_safetensors(path)?,
            _ => bail!("Unsupported dataset file {} (expected .jsonl or .safetensors)", path.display()),
        };
        let loader = Self::from_samples(samples)
            .with_context(|| format!("Invalid dataset file {}", path.display()))?;
        info!(
            path = %path.display(),
            samples = loader.len(),
            feature_dim = loader.feature_dim,
            "Loaded dataset split"
        );
        Ok(loader)
    }

    /// Number of samples; the denominator of the epoch metrics.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Smallest class count that covers every label in the split.
    pub fn min_num_classes(&self) -> usize {
        self.samples.iter().map(|s| s.label as usize + 1).max().unwrap_or(0)
    }

    /// Fail unless a model with this input width and class count can consume
    /// the split.
    pub fn check_compatible(&self, input_dim: usize, num_classes: usize) -> Result<()> {
        ensure!(
            self.feature_dim == input_dim,
            "dataset has {} features per sample but the model expects {input_dim}",
            self.feature_dim
        );
        if let Some(bad) = self.samples.iter().find(|s| s.label as usize >= num_classes) {
            bail!("label {} is out of range for a {num_classes}-class model", bad.label);
        }
        Ok(())
    }

    /// Sample indices grouped into batches of `batch_size` (the last one may
    /// be short). With `shuffle_seed` the order is a seeded permutation,
    /// otherwise file order.
    pub fn batch_indices(&self, batch_size: usize, shuffle_seed: Option<u64>) -> Vec<Vec<usize>> {
        let batch_size = batch_size.max(1);
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if let Some(seed) = shuffle_seed {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order.chunks(batch_size).map(<[usize]>::to_vec).collect()
    }

    /// Number of batches per pass.
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }

    /// Gather the samples at `indices` into device tensors.
    pub fn to_batch(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        let mut features = Vec::with_capacity(indices.len() * self.feature_dim);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let sample = self
                .samples
                .get(i)
                .with_context(|| format!("sample index {i} out of range"))?;
            features.extend_from_slice(&sample.features);
            labels.push(sample.label);
        }
        let len = labels.len();
        let features = Tensor::from_vec(features, (len, self.feature_dim), device)
            .context("Failed to build feature tensor")?;
        let targets = Tensor::from_vec(labels, len, device)
            .context("Failed to build target tensor")?;
        Ok(Batch { features, targets, len })
    }
}

// ── Loaders ───────────────────────────────────────────────────────────────────

/// Data loaders keyed by phase.
#[derive(Debug, Clone)]
pub struct Loaders {
    train: DataLoader,
    val: DataLoader,
}

impl Loaders {
    pub fn new(train: DataLoader, val: DataLoader) -> Result<Self> {
        ensure!(
            train.feature_dim() == val.feature_dim(),
            "train split has {} features per sample, val split has {}",
            train.feature_dim(),
            val.feature_dim()
        );
        Ok(Self { train, val })
    }

    /// Load `train.*` and `val.*` from `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        ensure!(dir.is_dir(), "Dataset directory not found: {}", dir.display());
        let train = DataLoader::from_file(&split_path(dir, Phase::Train)?)?;
        let val = DataLoader::from_file(&split_path(dir, Phase::Val)?)?;
        Self::new(train, val)
    }

    pub fn get(&self, phase: Phase) -> &DataLoader {
        match phase {
            Phase::Train => &self.train,
            Phase::Val => &self.val,
        }
    }

    pub fn dataset_size(&self, phase: Phase) -> usize {
        self.get(phase).len()
    }

    pub fn feature_dim(&self) -> usize {
        self.train.feature_dim()
    }

    pub fn check_compatible(&self, input_dim: usize, num_classes: usize) -> Result<()> {
        for phase in Phase::ALL {
            self.get(phase)
                .check_compatible(input_dim, num_classes)
                .with_context(|| format!("{phase} split does not fit the model"))?;
        }
        Ok(())
    }
}

impl Index<Phase> for Loaders {
    type Output = DataLoader;

    fn index(&self, phase: Phase) -> &DataLoader {
        self.get(phase)
    }
}

/// Locate the file for `phase`, preferring JSONL when both exist.
pub fn split_path(dir: &Path, phase: Phase) -> Result<PathBuf> {
    ["jsonl", "safetensors"]
        .iter()
        .map(|ext| dir.join(format!("{}.{ext}", phase.name())))
        .find(|p| p.is_file())
        .with_context(|| {
            format!(
                "No {0}.jsonl or {0}.safetensors found in {1}",
                phase.name(),
                dir.display()
            )
        })
}

// ── File readers ──────────────────────────────────────────────────────────────

fn read_jsonl(path: &Path) -> Result<Vec<Sample>> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut samples = Vec::new();
    for (line_no, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("IO error reading {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(trimmed).with_context(|| {
            format!(
                "JSON parse error at {}:{} — expected {{\"features\":[…],\"label\":n}}",
                path.display(),
                line_no + 1
            )
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

fn read_safetensors(path: &Path) -> Result<Vec<Sample>> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let features = tensors
        .get("features")
        .with_context(|| format!("{} has no 'features' tensor", path.display()))?;
    let labels = tensors
        .get("labels")
        .with_context(|| format!("{} has no 'labels' tensor", path.display()))?;

    let rows = features
        .to_dtype(DType::F32)?
        .flatten_from(1)?
        .to_vec2::<f32>()
        .context("'features' must be at least 2-D")?;
    let labels = labels
        .to_dtype(DType::I64)?
        .flatten_all()?
        .to_vec1::<i64>()?;
    ensure!(
        rows.len() == labels.len(),
        "{} has {} feature rows but {} labels",
        path.display(),
        rows.len(),
        labels.len()
    );

    rows.into_iter()
        .zip(labels)
        .map(|(features, label)| -> Result<Sample> {
            let label = u32::try_from(label).with_context(|| format!("invalid label {label}"))?;
            Ok(Sample { features, label })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
