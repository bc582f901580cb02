use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera_profile::CameraType;
use crate::capture::CaptureOptions;
use crate::dehaze::DehazeConfig;
use crate::settings::ProcessingSettings;
use crate::white_balance::{EstimatorConfig, MAX_HISTORY, MIN_HISTORY};

pub const DEFAULT_CONFIG_FILE: &str = "aiscale_config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub processing: ProcessingSettings,
    pub white_balance: EstimatorConfig,
    pub dehaze: DehazeConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub device_index: u32,
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub save_dir: PathBuf,
    pub snapshot_timeout_ms: u64,
    pub snapshot_retries: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_index: 0,
            frame_interval_ms: 33,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("captures"),
            snapshot_timeout_ms: 500,
            snapshot_retries: 3,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save_to_file(&config_path)?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents).with_context(|| "Failed to parse configuration file")?;
        config.validate()?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!(
                "Invalid camera resolution: {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }

        let wb = &self.white_balance;
        if !(MIN_HISTORY..=MAX_HISTORY).contains(&wb.history_capacity) {
            return Err(anyhow::anyhow!(
                "White balance history must hold {}-{} entries, got {}",
                MIN_HISTORY,
                MAX_HISTORY,
                wb.history_capacity
            ));
        }
        if wb.sample_step == 0 {
            return Err(anyhow::anyhow!("Invalid white balance sample step"));
        }
        if !(0.0..1.0).contains(&wb.dark_fraction)
            || !(0.0..=1.0).contains(&wb.bright_fraction)
            || wb.dark_fraction >= wb.bright_fraction
        {
            return Err(anyhow::anyhow!("Invalid white balance validity thresholds"));
        }

        let dehaze = &self.dehaze;
        if dehaze.patch_radius == 0 {
            return Err(anyhow::anyhow!("Invalid dehaze patch radius"));
        }
        if !(0.0..=1.0).contains(&dehaze.max_omega) || !(0.0..1.0).contains(&dehaze.min_transmission) {
            return Err(anyhow::anyhow!("Invalid dehaze omega or transmission floor"));
        }
        if !(dehaze.top_fraction > 0.0 && dehaze.top_fraction <= 1.0) {
            return Err(anyhow::anyhow!("Invalid dehaze top fraction: {}", dehaze.top_fraction));
        }

        if self.processing.clamped() != self.processing {
            return Err(anyhow::anyhow!("Processing settings out of range"));
        }

        if self.capture.snapshot_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Invalid snapshot timeout"));
        }

        Ok(())
    }

    /// Camera family the configured device would be classified as.
    pub fn expected_camera_type(&self) -> CameraType {
        CameraType::classify(self.camera.width, self.camera.height, self.camera.device_index)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            frame_interval: Duration::from_millis(self.camera.frame_interval_ms),
            snapshot_timeout: Duration::from_millis(self.capture.snapshot_timeout_ms),
            snapshot_retries: self.capture.snapshot_retries,
            estimator: self.white_balance,
            dehaze: self.dehaze,
        }
    }
}

// Device presets
impl Config {
    pub fn macbook_builtin() -> Self {
        Config {
            camera: CameraConfig {
                width: 1280,
                height: 720,
                device_index: 0,
                frame_interval_ms: 33,
            },
            ..Default::default()
        }
    }

    pub fn usb_external() -> Self {
        Config {
            camera: CameraConfig {
                width: 1920,
                height: 1080,
                device_index: 1,
                frame_interval_ms: 33,
            },
            white_balance: EstimatorConfig {
                history_capacity: 8,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
