//! Distillation orchestrator.
//!
//! Runs the two-stage knowledge-distillation schedule:
//!
//! **Stage 1** — Frozen backbone
//! Only the student's classification head is optimised (Adam, `lr 1e-3`,
//! `weight_decay 1e-5`). When the stage ends the student is reset to the
//! best validation checkpoint seen so far.
//!
//! **Stage 2** — Full fine-tuning
//! Every student parameter is optimised with a fresh Adam (`lr 1e-4`). The
//! best validation accuracy carries over from stage 1, so stage 2 only
//! overwrites the checkpoint when it actually beats it.
//!
//! Each epoch runs a `train` phase followed by a `val` phase. Both phases
//! score the student with the distillation loss against the teacher; only
//! `train` back-propagates. After `train`, a reduce-on-plateau scheduler
//! observes the train accuracy (in percent).

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use candle_nn::Optimizer;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kdtrain_core::{device_name, state, Mode, StateDict};

use crate::dataset::{Loaders, Phase};
use crate::loss::{count_correct, KdLoss};
use crate::metrics::{format_elapsed, EpochRecord, History, RunningMetrics, Stage};
use crate::optim::{Adam, ParamsAdam};
use crate::scheduler::{PlateauConfig, ReduceLrOnPlateau};
use crate::student::TrainableStudent;
use crate::teacher::Teacher;

// ── Config ────────────────────────────────────────────────────────────────────

/// Schedule of one training stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub epochs: usize,
    pub optimizer: ParamsAdam,
    pub scheduler: PlateauConfig,
}

impl StageConfig {
    pub fn frozen_default() -> Self {
        Self {
            epochs: 8,
            optimizer: ParamsAdam::head_stage(),
            scheduler: PlateauConfig::head_stage(),
        }
    }

    pub fn full_default() -> Self {
        Self {
            epochs: 12,
            optimizer: ParamsAdam::full_stage(),
            scheduler: PlateauConfig::full_stage(),
        }
    }
}

/// Hyper-parameters for the distillation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillConfig {
    pub frozen: StageConfig,
    pub full: StageConfig,
    pub loss: KdLoss,
    pub batch_size: usize,
    /// Base seed for the per-epoch shuffle of the train split.
    pub seed: u64,
    /// Print epoch summaries and progress bars to the terminal.
    pub console: bool,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            frozen: StageConfig::frozen_default(),
            full: StageConfig::full_default(),
            loss: KdLoss::default(),
            batch_size: 32,
            seed: 42,
            console: true,
        }
    }
}

impl DistillConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        self.loss.validate()?;
        for (stage, cfg) in [(Stage::Frozen, &self.frozen), (Stage::Full, &self.full)] {
            ensure!(cfg.optimizer.lr > 0.0, "{} stage learning rate must be positive", stage.name());
            ensure!(
                cfg.scheduler.factor > 0.0 && cfg.scheduler.factor < 1.0,
                "{} stage scheduler factor must be in (0, 1)",
                stage.name()
            );
        }
        Ok(())
    }

    fn stage(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Frozen => &self.frozen,
            Stage::Full => &self.full,
        }
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Summary returned after both stages complete.
#[derive(Debug, Clone)]
pub struct DistillOutcome {
    /// Best validation accuracy, as a fraction.
    pub best_acc: f64,
    /// Weights that achieved `best_acc` (the initial weights if nothing beat 0).
    pub best_state: StateDict,
    pub history: History,
    pub weights_path: PathBuf,
    pub elapsed_secs: f64,
}

/// Best-so-far student, shared across both stages.
struct BestCheckpoint {
    acc: f64,
    state: StateDict,
}

// ── Distiller ─────────────────────────────────────────────────────────────────

/// Owns the models and data for one distillation run.
pub struct Distiller {
    student: TrainableStudent,
    teacher: Teacher,
    loaders: Loaders,
    config: DistillConfig,
    weights_path: PathBuf,
    history: History,
    epochs_run: usize,
}

impl Distiller {
    /// Validate that teacher, student and data fit together.
    ///
    /// `weights_path` is where the best checkpoint is written whenever the
    /// validation accuracy improves.
    pub fn new(
        student: TrainableStudent,
        teacher: Teacher,
        loaders: Loaders,
        config: DistillConfig,
        weights_path: PathBuf,
    ) -> Result<Self> {
        config.validate()?;

        let s_cfg = student.config();
        let t_cfg = teacher.config();
        ensure!(
            s_cfg.num_classes == t_cfg.num_classes,
            "student '{}' predicts {} classes but teacher '{}' predicts {}",
            s_cfg.name,
            s_cfg.num_classes,
            t_cfg.name,
            t_cfg.num_classes
        );
        ensure!(
            s_cfg.input_dim == t_cfg.input_dim,
            "student expects {} input features but teacher expects {}",
            s_cfg.input_dim,
            t_cfg.input_dim
        );
        loaders.check_compatible(s_cfg.input_dim, s_cfg.num_classes)?;

        Ok(Self {
            student,
            teacher,
            loaders,
            config,
            weights_path,
            history: History::default(),
            epochs_run: 0,
        })
    }

    /// `<weights_dir>/<student name>.safetensors`
    pub fn default_weights_path(weights_dir: &Path, student_name: &str) -> PathBuf {
        weights_dir.join(format!("{student_name}.safetensors"))
    }

    pub fn student(&self) -> &TrainableStudent {
        &self.student
    }

    /// Consume the `Distiller` and return the student (holding the best weights
    /// after [`run`](Self::run)).
    pub fn into_student(self) -> TrainableStudent {
        self.student
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    /// Run both stages and leave the student holding the best weights.
    pub fn run(&mut self) -> Result<DistillOutcome> {
        if let Some(dir) = self.weights_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create weights dir: {}", dir.display()))?;
        }

        let device = device_name(self.student.device());
        self.say(format!("Training a model {} using {}", self.student.name(), device));
        info!(
            student = %self.student.name(),
            teacher = %self.teacher.name(),
            device,
            train = self.loaders.dataset_size(Phase::Train),
            val = self.loaders.dataset_size(Phase::Val),
            batch_size = self.config.batch_size,
            temperature = self.config.loss.temperature,
            alpha = self.config.loss.alpha,
            "Starting distillation"
        );

        let since = Instant::now();
        let mut best = BestCheckpoint { acc: 0.0, state: self.student.snapshot()? };

        // ── Stage 1 ───────────────────────────────────────────────────────────
        self.student.freeze_backbone();
        self.train_kd(Stage::Frozen, &mut best, since)?;
        self.student.restore(&best.state)?;

        self.say(format!(
            "Classifier training time: {}",
            format_elapsed(since.elapsed().as_secs_f64())
        ));
        self.say(format!(
            "\nUnfreeze all layers of {}\n{}\n",
            self.student.name(),
            "=".repeat(44)
        ));

        // ── Stage 2 ───────────────────────────────────────────────────────────
        self.student.unfreeze_all();
        self.train_kd(Stage::Full, &mut best, since)?;

        state::save(&best.state, &self.weights_path).with_context(|| {
            format!("Failed to save best weights to {}", self.weights_path.display())
        })?;
        self.student.restore(&best.state)?;

        let elapsed_secs = since.elapsed().as_secs_f64();
        self.say(format!("All net training time: {}", format_elapsed(elapsed_secs)));
        info!(
            best_acc = best.acc,
            path = %self.weights_path.display(),
            elapsed_secs,
            "Distillation complete"
        );

        Ok(DistillOutcome {
            best_acc: best.acc,
            best_state: best.state,
            history: self.history.clone(),
            weights_path: self.weights_path.clone(),
            elapsed_secs,
        })
    }

    /// One stage: `epochs` × (`train`, `val`).
    fn train_kd(&mut self, stage: Stage, best: &mut BestCheckpoint, since: Instant) -> Result<()> {
        let stage_cfg = *self.config.stage(stage);
        if stage_cfg.epochs == 0 {
            info!(stage = stage.name(), "Stage has no epochs; skipping");
            return Ok(());
        }

        let vars = match stage {
            Stage::Frozen => self.student.head_vars()?,
            Stage::Full => self.student.all_vars(),
        };
        info!(
            stage = stage.name(),
            epochs = stage_cfg.epochs,
            vars = vars.len(),
            lr = stage_cfg.optimizer.lr,
            weight_decay = stage_cfg.optimizer.weight_decay,
            "Starting stage"
        );
        let mut optimizer = Adam::new(vars, stage_cfg.optimizer).context("Failed to create Adam optimiser")?;
        let mut scheduler = ReduceLrOnPlateau::new(stage_cfg.scheduler);

        for epoch in 1..=stage_cfg.epochs {
            self.epochs_run += 1;
            self.say(format!("\nEpoch: {}/{}\n{}", epoch, stage_cfg.epochs, "=".repeat(38)));

            for phase in Phase::ALL {
                let lr = optimizer.learning_rate();
                let metrics = self.run_phase(phase, &mut optimizer, stage, epoch)?;
                let size = self.loaders.dataset_size(phase);
                let epoch_loss = metrics.epoch_loss(size);
                let epoch_acc = metrics.epoch_acc(size);

                if phase == Phase::Train {
                    scheduler.step(100.0 * epoch_acc, &mut optimizer);
                }

                self.say(format!(
                    "{} - loss = {:.6}, accuracy = {:.3}",
                    phase,
                    epoch_loss,
                    100.0 * epoch_acc
                ));
                info!(
                    stage = stage.name(),
                    epoch,
                    phase = phase.name(),
                    loss = epoch_loss,
                    accuracy = epoch_acc,
                    lr,
                    "Phase complete"
                );

                let elapsed = since.elapsed().as_secs_f64();
                self.history.push(EpochRecord {
                    stage,
                    epoch,
                    phase,
                    loss: epoch_loss,
                    accuracy: epoch_acc,
                    lr,
                    elapsed_secs: elapsed,
                });

                if phase == Phase::Val {
                    self.say(format!("Time: {}", format_elapsed(elapsed)));

                    if epoch_acc > best.acc {
                        best.acc = epoch_acc;
                        best.state = self.student.snapshot()?;
                        state::save(&best.state, &self.weights_path).with_context(|| {
                            format!("Failed to save checkpoint to {}", self.weights_path.display())
                        })?;
                        info!(
                            best_acc = epoch_acc,
                            path = %self.weights_path.display(),
                            "New best student checkpoint"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass over a phase's loader.
    fn run_phase(
        &self,
        phase: Phase,
        optimizer: &mut Adam,
        stage: Stage,
        epoch: usize,
    ) -> Result<RunningMetrics> {
        let (mode, shuffle) = match phase {
            Phase::Train => (Mode::Train, Some(self.config.seed.wrapping_add(self.epochs_run as u64))),
            Phase::Val => (Mode::Eval, None),
        };
        let loader = self.loaders.get(phase);
        let batches = loader.batch_indices(self.config.batch_size, shuffle);
        let device = self.student.device().clone();

        let pb = self.progress_bar(batches.len() as u64, phase, stage, epoch);
        let mut metrics = RunningMetrics::default();

        for indices in &batches {
            let batch = loader.to_batch(indices, &device)?;

            let student_logits = self.student.forward(&batch.features, mode)?;
            let student_logits = match phase {
                Phase::Train => student_logits,
                Phase::Val => student_logits.detach(),
            };
            let teacher_logits = self.teacher.logits(&batch.features)?;

            let loss = self
                .config
                .loss
                .compute(&student_logits, &batch.targets, &teacher_logits)
                .context("Loss computation failed")?;

            if phase == Phase::Train {
                optimizer
                    .backward_step(&loss)
                    .context("Backward/optimizer step failed")?;
            }

            let batch_loss = loss.to_scalar::<f32>().context("Loss is not a scalar")? as f64;
            let corrects = count_correct(&student_logits, &batch.targets)?;
            metrics.update(batch_loss, corrects, batch.len());

            pb.set_message(format!("loss {batch_loss:.4}"));
            pb.inc(1);
        }
        pb.finish_and_clear();

        debug!(phase = phase.name(), seen = metrics.seen, "Phase pass finished");
        Ok(metrics)
    }

    fn progress_bar(&self, total: u64, phase: Phase, stage: Stage, epoch: usize) -> ProgressBar {
        if !self.config.console {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{prefix:>14} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .map(|s| s.progress_chars("█▓░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_prefix(format!("{} {} e{}", stage.name(), phase, epoch));
        pb
    }

    fn say(&self, line: String) {
        if self.config.console {
            println!("{line}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
