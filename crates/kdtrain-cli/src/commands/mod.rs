pub mod distill;
pub mod eval;

use anyhow::{Context, Result};
use candle_core::Device;
use tracing::info;

use kdtrain_core::{device_name, select_device, DevicePreference};

use crate::config::AppConfig;

/// `--device` wins; otherwise `--gpu` or `device.prefer_gpu` from config.
pub fn resolve_device(flag: Option<&str>, gpu: bool, config: &AppConfig) -> Result<Device> {
    let pref = match flag {
        Some(raw) => raw
            .parse::<DevicePreference>()
            .with_context(|| format!("Invalid --device '{raw}'"))?,
        None => DevicePreference::from_flags(
            gpu || config.device.prefer_gpu,
            config.device.cuda_device_id,
        ),
    };
    let device = select_device(pref).context("Failed to select device")?;
    info!(requested = %pref, device = device_name(&device), "Device selected");
    Ok(device)
}
