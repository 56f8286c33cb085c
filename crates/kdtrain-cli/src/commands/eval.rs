//! `kdtrain eval` — plain cross-entropy loss and accuracy of a saved model.

use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use tracing::info;

use kdtrain_core::{load_classifier, Classifier, Mode, ModelDir};
use kdtrain_distill::dataset::split_path;
use kdtrain_distill::loss::count_correct;
use kdtrain_distill::metrics::RunningMetrics;
use kdtrain_distill::{DataLoader, Phase};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub loss: f64,
    /// Fraction in `[0, 1]`.
    pub accuracy: f64,
    pub samples: usize,
}

pub fn run(
    model_dir: &Path,
    dataset: &Path,
    phase: &str,
    batch_size: Option<usize>,
    device: Device,
    config: &AppConfig,
) -> Result<()> {
    let phase = parse_phase(phase)?;
    let batch_size = batch_size.unwrap_or(config.training.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be positive");
    }

    let dir = ModelDir::open(model_dir)
        .with_context(|| format!("Cannot open model dir {}", model_dir.display()))?;
    let (model, _varmap) = load_classifier(&dir, &device)
        .with_context(|| format!("Failed to load weights from {}", model_dir.display()))?;

    let split = split_path(dataset, phase)?;
    let loader = DataLoader::from_file(&split)?;
    loader.check_compatible(model.config().input_dim, model.num_classes())?;

    let report = evaluate(&model, &loader, batch_size, &device)?;
    info!(
        model = %model.name(),
        phase = phase.name(),
        samples = report.samples,
        loss = report.loss,
        accuracy = report.accuracy,
        "Evaluation complete"
    );

    println!(
        "{} on {} ({} samples): loss = {:.6}, accuracy = {:.3}",
        model.name(),
        phase,
        report.samples,
        report.loss,
        100.0 * report.accuracy
    );
    Ok(())
}

/// One eval-mode pass over `loader`.
pub fn evaluate(
    model: &Classifier,
    loader: &DataLoader,
    batch_size: usize,
    device: &Device,
) -> Result<EvalReport> {
    let mut metrics = RunningMetrics::default();
    for indices in loader.batch_indices(batch_size, None) {
        let batch = loader.to_batch(&indices, device)?;
        let logits = model.forward(&batch.features, Mode::Eval)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &batch.targets)?
            .to_scalar::<f32>()? as f64;
        metrics.update(loss, count_correct(&logits, &batch.targets)?, batch.len());
    }
    let size = loader.len();
    Ok(EvalReport {
        loss: metrics.epoch_loss(size),
        accuracy: metrics.epoch_acc(size),
        samples: size,
    })
}

fn parse_phase(raw: &str) -> Result<Phase> {
    Phase::ALL
        .into_iter()
        .find(|p| p.name().eq_ignore_ascii_case(raw.trim()))
        .with_context(|| format!("Unknown --phase '{raw}'. Valid values: train, val."))
}
