//! Model export utilities.
//!
//! After distillation, this module writes the student to a directory that
//! `ModelDir::open` (and therefore `kdtrain eval` or a later `--student`
//! run) can load directly.
//!
//! ```text
//! <output_dir>/
//!   model.safetensors   — best student weights
//!   config.json         — classifier architecture, carrying the student name
//!   history.json        — per-epoch loss / accuracy / lr records
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use kdtrain_core::loader::{CONFIG_FILE, WEIGHTS_FILE};
use kdtrain_core::{state, StateDict};

use crate::metrics::History;
use crate::student::TrainableStudent;

pub const HISTORY_FILE: &str = "history.json";

/// Paths written by [`export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedModel {
    pub dir: PathBuf,
    pub weights: PathBuf,
    pub config: PathBuf,
    pub history: PathBuf,
}

/// Write `best_state` plus the student's architecture and the run history to
/// `output_dir`.
pub fn export(
    student: &TrainableStudent,
    best_state: &StateDict,
    history: &History,
    output_dir: &Path,
) -> Result<ExportedModel> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output dir: {}", output_dir.display()))?;

    // ── Weights ───────────────────────────────────────────────────────────────
    let weights = output_dir.join(WEIGHTS_FILE);
    state::save(best_state, &weights)
        .with_context(|| format!("Cannot write {}", weights.display()))?;
    info!(path = %weights.display(), tensors = best_state.len(), "Student weights saved");

    // ── config.json ───────────────────────────────────────────────────────────
    let config = output_dir.join(CONFIG_FILE);
    let config_json = serde_json::to_string_pretty(student.config())?;
    std::fs::write(&config, config_json)
        .with_context(|| format!("Cannot write {}", config.display()))?;
    info!(path = %config.display(), name = %student.name(), "config.json written");

    // ── history.json ──────────────────────────────────────────────────────────
    let history_path = output_dir.join(HISTORY_FILE);
    history.save_json(&history_path)?;

    info!(output_dir = %output_dir.display(), records = history.len(), "Export complete");
    Ok(ExportedModel {
        dir: output_dir.to_path_buf(),
        weights,
        config,
        history: history_path,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
