//! `kdtrain distill` — distil a teacher classifier into a smaller student.
//!
//! ## Modes
//!
//! **Fresh student** (random weights, architecture from size preset):
//! ```text
//! kdtrain distill \
//!   --teacher  ./models/Teacher \
//!   --dataset  ./data \
//!   --size     small
//! ```
//!
//! **Fine-tune an existing smaller model**:
//! ```text
//! kdtrain distill \
//!   --teacher  ./models/Teacher \
//!   --dataset  ./data \
//!   --student  ./models/MobileStudent
//! ```
//!
//! ## Dataset format
//!
//! `--dataset` must contain `train` and `val` splits, each either
//! `<split>.jsonl` with one `{"features": [...], "label": n}` per line, or
//! `<split>.safetensors` with `features [N, D]` and `labels [N]` tensors.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use tracing::info;

use kdtrain_distill::{
    export, format_elapsed, Distiller, Loaders, SizePreset, Teacher, TrainableStudent,
};

use crate::config::{expand_path, AppConfig};

/// Flags of `kdtrain distill` after clap parsing.
#[derive(Debug, Clone, Default)]
pub struct DistillArgs {
    pub teacher: PathBuf,
    pub student: Option<PathBuf>,
    pub size: Option<String>,
    pub dataset: PathBuf,
    pub weights: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub name: Option<String>,
    pub epochs_freeze: Option<usize>,
    pub epochs_unfreeze: Option<usize>,
    pub batch_size: Option<usize>,
    pub temperature: Option<f64>,
    pub alpha: Option<f64>,
    pub seed: Option<u64>,
}

// ── Main entry point ──────────────────────────────────────────────────────────

pub fn run(args: DistillArgs, device: Device, config: &AppConfig) -> Result<()> {
    // ── Validate mutually-exclusive flags ─────────────────────────────────────
    match (&args.size, &args.student) {
        (None, None) => bail!(
            "Specify either --size (tiny, small, base) for a fresh student, \
             or --student for fine-tuning an existing model."
        ),
        (Some(_), Some(_)) => bail!(
            "--size and --student are mutually exclusive. \
             Use --size for fresh weights or --student for fine-tuning."
        ),
        _ => {}
    }

    // ── Load dataset ──────────────────────────────────────────────────────────
    info!(path = %args.dataset.display(), "Loading dataset");
    let loaders = Loaders::from_dir(&args.dataset)
        .with_context(|| format!("Failed to load dataset from {}", args.dataset.display()))?;

    // ── Load teacher ──────────────────────────────────────────────────────────
    let teacher = Teacher::load(&args.teacher, &device)?;
    let input_dim = teacher.config().input_dim;
    let num_classes = teacher.num_classes();

    // ── Build student ─────────────────────────────────────────────────────────
    let student = match (&args.size, &args.student) {
        (Some(preset_str), _) => {
            let preset = SizePreset::parse(preset_str)?;
            let name = args.name.clone().unwrap_or_else(|| preset.default_name());
            TrainableStudent::from_preset(preset, &name, input_dim, num_classes, &device)?
        }
        (None, Some(dir)) => {
            info!(dir = %dir.display(), "Loading student model for fine-tuning");
            let mut student = TrainableStudent::from_dir(dir, &device)?;
            if let Some(name) = &args.name {
                student.rename(name);
            }
            student
        }
        (None, None) => bail!("no student source given"),
    };

    // ── Configure and run distiller ───────────────────────────────────────────
    let distill_config = distill_config(&args, config);
    let weights_path = args.weights.clone().unwrap_or_else(|| {
        Distiller::default_weights_path(&expand_path(&config.output.weights_dir), student.name())
    });
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| expand_path(&config.output.dir).join(student.name()));

    let mut distiller = Distiller::new(student, teacher, loaders, distill_config, weights_path)?;
    let outcome = distiller.run()?;

    // ── Export ────────────────────────────────────────────────────────────────
    let student = distiller.into_student();
    info!(output = %output_dir.display(), "Exporting model");
    let exported = export(&student, &outcome.best_state, &outcome.history, &output_dir)?;

    println!(
        "\nDistillation complete!\n\
         Student: {}\n\
         Best val accuracy: {:.3}\n\
         Checkpoint: {}\n\
         Exported to: {}\n\
         Elapsed: {}\n\
         \n\
         Evaluate it with:\n  kdtrain eval --model {} --dataset {}",
        student.name(),
        100.0 * outcome.best_acc,
        outcome.weights_path.display(),
        exported.dir.display(),
        format_elapsed(outcome.elapsed_secs),
        exported.dir.display(),
        args.dataset.display(),
    );

    Ok(())
}

/// Config-file values with command-line overrides on top.
fn distill_config(args: &DistillArgs, config: &AppConfig) -> kdtrain_distill::DistillConfig {
    let mut cfg = config.distill_config();
    if let Some(n) = args.epochs_freeze {
        cfg.frozen.epochs = n;
    }
    if let Some(n) = args.epochs_unfreeze {
        cfg.full.epochs = n;
    }
    if let Some(n) = args.batch_size {
        cfg.batch_size = n;
    }
    if let Some(t) = args.temperature {
        cfg.loss.temperature = t;
    }
    if let Some(a) = args.alpha {
        cfg.loss.alpha = a;
    }
    if let Some(s) = args.seed {
        cfg.seed = s;
    }
    cfg
}

// ── Tests ─────────────────────────────────────────────────────────────────────
