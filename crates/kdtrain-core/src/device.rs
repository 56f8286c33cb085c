use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

/// Where the user asked training to run.
///
/// Parsed from `cpu`, `auto`, `cuda`, `cuda:<id>` or `metal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Cpu,
    /// First available accelerator, else CPU.
    Auto,
    Cuda(usize),
    Metal,
}

impl DevicePreference {
    /// Map the config-file pair `(prefer_gpu, cuda_device_id)` to a preference.
    pub fn from_flags(prefer_gpu: bool, cuda_device_id: usize) -> Self {
        if !prefer_gpu {
            Self::Cpu
        } else if cuda_device_id == 0 {
            Self::Auto
        } else {
            Self::Cuda(cuda_device_id)
        }
    }
}

impl FromStr for DevicePreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "auto" | "gpu" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda(0)),
            "metal" => Ok(Self::Metal),
            other => {
                let id = other
                    .strip_prefix("cuda:")
                    .and_then(|id| id.parse::<usize>().ok())
                    .ok_or_else(|| CoreError::Config {
                        field: "device".to_string(),
                        reason: format!("unknown device '{s}' (expected cpu, auto, cuda[:id] or metal)"),
                    })?;
                Ok(Self::Cuda(id))
            }
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Resolve a [`DevicePreference`] to a concrete candle [`Device`].
///
/// Accelerators are only reachable when the matching cargo feature is
/// compiled in; any failure to acquire one falls back to CPU with a warning.
pub fn select_device(pref: DevicePreference) -> CoreResult<Device> {
    if pref == DevicePreference::Cpu {
        info!("Using CPU device");
        return Ok(Device::Cpu);
    }

    #[cfg(feature = "cuda")]
    if let DevicePreference::Auto | DevicePreference::Cuda(_) = pref {
        let id = match pref {
            DevicePreference::Cuda(id) => id,
            _ => 0,
        };
        match Device::new_cuda(id) {
            Ok(dev) => {
                info!(cuda_device_id = id, "Using CUDA device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "CUDA unavailable, falling back"),
        }
    }

    #[cfg(feature = "metal")]
    if let DevicePreference::Auto | DevicePreference::Metal = pref {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!("Using Metal device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "Metal unavailable, falling back"),
        }
    }

    if let Some(feature) = missing_backend(pref) {
        warn!(
            requested = %pref,
            "Binary was not compiled with {feature} support; rebuild with the matching cargo feature"
        );
    }

    info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Cargo feature that `pref` needs but this build lacks, if any.
fn missing_backend(pref: DevicePreference) -> Option<&'static str> {
    match pref {
        DevicePreference::Cuda(_) if !cfg!(feature = "cuda") => Some("cuda"),
        DevicePreference::Metal if !cfg!(feature = "metal") => Some("metal"),
        DevicePreference::Auto if !cfg!(any(feature = "cuda", feature = "metal")) => {
            Some("cuda or metal")
        }
        _ => None,
    }
}

/// Returns a human-readable description of a device.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_preferences() {
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("AUTO".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(0));
        assert_eq!("cuda:3".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(3));
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert!("cuda:x".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for pref in [DevicePreference::Cpu, DevicePreference::Cuda(2), DevicePreference::Metal] {
            assert_eq!(pref.to_string().parse::<DevicePreference>().unwrap(), pref);
        }
    }

    #[test]
    fn from_flags_respects_prefer_gpu() {
        assert_eq!(DevicePreference::from_flags(false, 5), DevicePreference::Cpu);
        assert_eq!(DevicePreference::from_flags(true, 0), DevicePreference::Auto);
        assert_eq!(DevicePreference::from_flags(true, 1), DevicePreference::Cuda(1));
    }

    #[test]
    fn cpu_preference_returns_cpu() {
        let device = select_device(DevicePreference::Cpu).unwrap();
        assert!(matches!(device, Device::Cpu));
        assert_eq!(device_name(&device), "cpu");
    }

    #[test]
    fn missing_backend_names_the_absent_feature() {
        assert_eq!(missing_backend(DevicePreference::Cpu), None);
        assert_eq!(
            missing_backend(DevicePreference::Cuda(1)).is_some(),
            !cfg!(feature = "cuda")
        );
        assert_eq!(
            missing_backend(DevicePreference::Metal).is_some(),
            !cfg!(feature = "metal")
        );
        #[cfg(all(feature = "metal", not(feature = "cuda")))]
        assert_eq!(missing_backend(DevicePreference::Cuda(0)), Some("cuda"));
        #[cfg(all(feature = "cuda", not(feature = "metal")))]
        assert_eq!(missing_backend(DevicePreference::Metal), Some("metal"));
    }

    #[test]
    fn gpu_without_features_falls_back_to_cpu() {
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        {
            let device = select_device(DevicePreference::Auto).unwrap();
            assert!(matches!(device, Device::Cpu));
        }
    }
}
