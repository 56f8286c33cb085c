//! # kdtrain-core
//!
//! Model definition, model-directory loading, parameter snapshots and device
//! selection for kdtrain.
//!
//! ## Feature Flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable CUDA GPU acceleration |
//! | `metal` | Enable Apple Metal GPU acceleration |

pub mod device;
pub mod error;
pub mod loader;
pub mod model;
pub mod state;

pub use device::{device_name, select_device, DevicePreference};
pub use error::{CoreError, CoreResult};
pub use loader::{init_classifier, load_classifier, ModelDir};
pub use model::{Classifier, ClassifierConfig, Mode};
pub use state::StateDict;
