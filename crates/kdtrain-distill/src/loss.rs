//! Knowledge-distillation loss.
//!
//! The student is pulled towards two targets at once:
//!
//! ```text
//! L = KL(softmax(t / T) ‖ softmax(s / T)) · α · T²  +  CE(s, y) · (1 − α)
//! ```
//!
//! `s` / `t` are student / teacher logits, `y` the hard labels, `T` the
//! softening temperature and `α` the weight of the soft term. The `T²`
//! factor keeps soft-target gradients on the same scale as the hard-label
//! term when `T` changes. The KL term is summed over classes and averaged
//! over the batch.

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use serde::{Deserialize, Serialize};

/// Softening temperature used when none is configured.
pub const DEFAULT_TEMPERATURE: f64 = 6.0;
/// Soft-target weight used when none is configured.
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Temperature / weighting pair for [`loss_fn_kd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdLoss {
    pub temperature: f64,
    pub alpha: f64,
}

impl Default for KdLoss {
    fn default() -> Self {
        Self { temperature: DEFAULT_TEMPERATURE, alpha: DEFAULT_ALPHA }
    }
}

impl KdLoss {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.temperature > 0.0 && self.temperature.is_finite(),
            "temperature must be positive, got {}",
            self.temperature
        );
        ensure!(
            (0.0..=1.0).contains(&self.alpha),
            "alpha must be in [0, 1], got {}",
            self.alpha
        );
        Ok(())
    }

    pub fn compute(&self, student: &Tensor, targets: &Tensor, teacher: &Tensor) -> Result<Tensor> {
        loss_fn_kd(student, targets, teacher, self.temperature, self.alpha)
    }
}

/// Scalar distillation loss for one batch.
///
/// `student` and `teacher` are `[batch, classes]` logits, `targets` is a
/// `[batch]` U32 tensor of class indices.
pub fn loss_fn_kd(
    student: &Tensor,
    targets: &Tensor,
    teacher: &Tensor,
    temperature: f64,
    alpha: f64,
) -> Result<Tensor> {
    ensure!(
        student.dims() == teacher.dims(),
        "student logits {:?} and teacher logits {:?} differ in shape",
        student.dims(),
        teacher.dims()
    );

    let soft = soft_target_kl(student, teacher, temperature)?
        .affine(alpha * temperature * temperature, 0.0)?;
    let hard = candle_nn::loss::cross_entropy(student, targets)
        .context("cross_entropy failed")?
        .affine(1.0 - alpha, 0.0)?;
    Ok(soft.add(&hard)?)
}

/// `KL(softmax(t/T) ‖ softmax(s/T))`, summed over classes, mean over batch.
pub fn soft_target_kl(student: &Tensor, teacher: &Tensor, temperature: f64) -> Result<Tensor> {
    let inv_t = 1.0 / temperature;
    let log_p_student = log_softmax(&student.affine(inv_t, 0.0)?, D::Minus1)?;
    let teacher_scaled = teacher.affine(inv_t, 0.0)?;
    let p_teacher = softmax(&teacher_scaled, D::Minus1)?;
    let log_p_teacher = log_softmax(&teacher_scaled, D::Minus1)?;

    let kl = p_teacher
        .mul(&log_p_teacher.sub(&log_p_student)?)?
        .sum(D::Minus1)?
        .mean_all()?;
    Ok(kl)
}

/// Rows whose arg-max prediction equals the target.
pub fn count_correct(logits: &Tensor, targets: &Tensor) -> Result<usize> {
    let correct = logits
        .argmax(D::Minus1)?
        .eq(targets)?
        .to_dtype(DType::U32)?
        .sum_all()?
        .to_scalar::<u32>()?;
    Ok(correct as usize)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
