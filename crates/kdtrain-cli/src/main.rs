use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::load_config;

/// kdtrain — two-stage knowledge distillation for classifiers
#[derive(Debug, Parser)]
#[command(name = "kdtrain", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Distil a pretrained teacher classifier into a smaller student.
    ///
    /// Exactly one of --size or --student must be provided.
    Distill {
        /// Teacher model directory (config.json + safetensors).
        #[arg(long)]
        teacher: PathBuf,

        /// Pretrained student model directory to fine-tune.
        /// Mutually exclusive with --size.
        #[arg(long)]
        student: Option<PathBuf>,

        /// Student size preset for fresh (random) initialisation.
        /// Valid values: tiny, small, base. Mutually exclusive with --student.
        #[arg(long)]
        size: Option<String>,

        /// Directory holding train.{jsonl,safetensors} and val.{jsonl,safetensors}.
        #[arg(long)]
        dataset: PathBuf,

        /// Best-checkpoint file (default: <output.weights_dir>/<name>.safetensors).
        #[arg(long, value_name = "FILE")]
        weights: Option<PathBuf>,

        /// Export directory for the distilled student (default: <output.dir>/<name>).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Student name, used for the checkpoint file and config.json.
        #[arg(long)]
        name: Option<String>,

        /// Epochs with a frozen backbone (head only).
        #[arg(long)]
        epochs_freeze: Option<usize>,

        /// Epochs with every layer trainable.
        #[arg(long)]
        epochs_unfreeze: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Softmax temperature for the soft targets.
        #[arg(long)]
        temperature: Option<f64>,

        /// Weight of the soft-target term (0 = labels only, 1 = teacher only).
        #[arg(long)]
        alpha: Option<f64>,

        /// Seed for the per-epoch train shuffle.
        #[arg(long)]
        seed: Option<u64>,

        /// Device: cpu, auto, cuda, cuda:N or metal. Overrides --gpu.
        #[arg(long)]
        device: Option<String>,

        /// Prefer GPU acceleration (CUDA/Metal).
        #[arg(long)]
        gpu: bool,
    },

    /// Report plain cross-entropy loss and accuracy of a model on a split.
    Eval {
        /// Model directory (config.json + safetensors).
        #[arg(long, short = 'm')]
        model: PathBuf,

        /// Dataset directory.
        #[arg(long)]
        dataset: PathBuf,

        /// Split to evaluate: "val" (default) or "train".
        #[arg(long, default_value = "val")]
        phase: String,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Device: cpu, auto, cuda, cuda:N or metal. Overrides --gpu.
        #[arg(long)]
        device: Option<String>,

        /// Prefer GPU acceleration (CUDA/Metal).
        #[arg(long)]
        gpu: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise tracing
    init_tracing(&cli.log_format);

    // Load configuration
    let cfg = load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Distill {
            teacher,
            student,
            size,
            dataset,
            weights,
            output,
            name,
            epochs_freeze,
            epochs_unfreeze,
            batch_size,
            temperature,
            alpha,
            seed,
            device,
            gpu,
        } => {
            let device = commands::resolve_device(device.as_deref(), gpu, &cfg)?;
            commands::distill::run(
                commands::distill::DistillArgs {
                    teacher,
                    student,
                    size,
                    dataset,
                    weights,
                    output,
                    name,
                    epochs_freeze,
                    epochs_unfreeze,
                    batch_size,
                    temperature,
                    alpha,
                    seed,
                },
                device,
                &cfg,
            )?;
        }
        Commands::Eval { model, dataset, phase, batch_size, device, gpu } => {
            let device = commands::resolve_device(device.as_deref(), gpu, &cfg)?;
            commands::eval::run(&model, &dataset, &phase, batch_size, device, &cfg)?;
        }
    }

    Ok(())
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(fmt::layer().json())
            .init();
    } else {
        registry
            .with(fmt::layer().pretty())
            .init();
    }
}
