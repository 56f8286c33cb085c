//! # kdtrain-distill
//!
//! Knowledge distillation of a pretrained *teacher* classifier into a smaller
//! *student* classifier.
//!
//! The student is trained against a blend of two targets: the teacher's
//! temperature-softened output distribution and the ground-truth labels
//! (see [`loss::loss_fn_kd`]). Training runs in two stages:
//!
//! | stage    | trainable params | optimiser            | plateau scheduler     |
//! |----------|------------------|----------------------|-----------------------|
//! | `frozen` | head only        | Adam lr 1e-3, wd 1e-5 | max, ×0.2, patience 3 |
//! | `full`   | everything       | Adam lr 1e-4          | max, ×0.2, patience 2 |
//!
//! Stage 2 resumes from the best stage-1 checkpoint, and the best
//! validation checkpoint across both stages is what ends up on disk.
//!
//! ## Usage
//!
//! ```text
//! kdtrain distill \
//!   --teacher   ./models/ResNetTeacher \
//!   --size      small \
//!   --dataset   ./data/features \
//!   --output    ./out/StudentSmall
//! ```

pub mod dataset;
pub mod distiller;
pub mod export;
pub mod loss;
pub mod metrics;
pub mod optim;
pub mod presets;
pub mod scheduler;
pub mod student;
pub mod teacher;

pub use dataset::{DataLoader, Loaders, Phase};
pub use distiller::{DistillConfig, DistillOutcome, Distiller, StageConfig};
pub use export::{export, ExportedModel};
pub use loss::KdLoss;
pub use metrics::{format_elapsed, History, Stage};
pub use presets::SizePreset;
pub use student::TrainableStudent;
pub use teacher::Teacher;
