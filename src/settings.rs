use std::sync::Mutex;

use crossbeam::atomic::AtomicCell;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::gain_model::{MAX_TEMPERATURE, MAX_TINT, MIN_TEMPERATURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WbMode {
    Auto,
    Manual,
}

impl std::fmt::Display for WbMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WbMode::Auto => write!(f, "auto"),
            WbMode::Manual => write!(f, "manual"),
        }
    }
}

/// Correction settings for one frame. Always consumed as a whole snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub wb_mode: WbMode,
    /// Manual white balance, 2000..=10000 K.
    pub temperature_kelvin: f32,
    /// Green/magenta shift, -50..=50; positive is more magenta.
    pub tint: f32,
    /// Level offset, -100..=100.
    pub brightness: f32,
    /// Percentage, 10..=200; 100 leaves the frame alone.
    pub contrast: f32,
    /// -100..=100; scales saturation by `1 + saturation / 100`.
    pub saturation: f32,
    /// Extra level offset added to brightness, -100..=100.
    pub exposure_comp: f32,
    /// 0..=100.
    pub dehaze_amount: f32,
    /// 0.1..=3.0.
    pub gamma: f32,
    /// 0..=100; extra saturation for muted colors.
    pub vibrance: f32,
    /// Tiled local-contrast equalization after the color stage.
    pub clahe_enabled: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            wb_mode: WbMode::Auto,
            temperature_kelvin: 6500.0,
            tint: 0.0,
            brightness: 0.0,
            contrast: 100.0,
            saturation: 0.0,
            exposure_comp: 0.0,
            dehaze_amount: 0.0,
            gamma: 1.0,
            vibrance: 0.0,
            clahe_enabled: false,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl ProcessingSettings {
    /// Same settings with every field forced into its valid range.
    /// Non-finite values fall back to the neutral default.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            wb_mode: self.wb_mode,
            temperature_kelvin: clamp_or(self.temperature_kelvin, MIN_TEMPERATURE, MAX_TEMPERATURE, d.temperature_kelvin),
            tint: clamp_or(self.tint, -MAX_TINT, MAX_TINT, d.tint),
            brightness: clamp_or(self.brightness, -100.0, 100.0, d.brightness),
            contrast: clamp_or(self.contrast, 10.0, 200.0, d.contrast),
            saturation: clamp_or(self.saturation, -100.0, 100.0, d.saturation),
            exposure_comp: clamp_or(self.exposure_comp, -100.0, 100.0, d.exposure_comp),
            dehaze_amount: clamp_or(self.dehaze_amount, 0.0, 100.0, d.dehaze_amount),
            gamma: clamp_or(self.gamma, 0.1, 3.0, d.gamma),
            vibrance: clamp_or(self.vibrance, 0.0, 100.0, d.vibrance),
            clahe_enabled: self.clahe_enabled,
        }
    }

    pub fn with_update(&self, update: &SettingsUpdate) -> Self {
        Self {
            wb_mode: update.wb_mode.unwrap_or(self.wb_mode),
            temperature_kelvin: update.temperature_kelvin.unwrap_or(self.temperature_kelvin),
            tint: update.tint.unwrap_or(self.tint),
            brightness: update.brightness.unwrap_or(self.brightness),
            contrast: update.contrast.unwrap_or(self.contrast),
            saturation: update.saturation.unwrap_or(self.saturation),
            exposure_comp: update.exposure_comp.unwrap_or(self.exposure_comp),
            dehaze_amount: update.dehaze_amount.unwrap_or(self.dehaze_amount),
            gamma: update.gamma.unwrap_or(self.gamma),
            vibrance: update.vibrance.unwrap_or(self.vibrance),
            clahe_enabled: update.clahe_enabled.unwrap_or(self.clahe_enabled),
        }
        .clamped()
    }

    pub fn contrast_multiplier(&self) -> f32 {
        self.contrast / 100.0
    }

    pub fn level_offset(&self) -> f32 {
        self.brightness + self.exposure_comp
    }

    pub fn tone_is_neutral(&self) -> bool {
        self.contrast == 100.0 && self.level_offset() == 0.0
    }

    pub fn gamma_is_neutral(&self) -> bool {
        self.gamma == 1.0
    }

    pub fn color_is_neutral(&self) -> bool {
        self.saturation == 0.0 && self.vibrance == 0.0
    }
}

/// Partial settings change coming from the UI. Unset fields are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub wb_mode: Option<WbMode>,
    pub temperature_kelvin: Option<f32>,
    pub tint: Option<f32>,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub exposure_comp: Option<f32>,
    pub dehaze_amount: Option<f32>,
    pub gamma: Option<f32>,
    pub vibrance: Option<f32>,
    pub clahe_enabled: Option<bool>,
}

/// Settings cell shared between the UI and the capture loop.
///
/// Readers get a whole snapshot in one atomic load; they never see half of
/// an update.
pub struct SharedSettings {
    current: AtomicCell<ProcessingSettings>,
    writer: Mutex<()>,
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(ProcessingSettings::default())
    }
}

impl SharedSettings {
    pub fn new(initial: ProcessingSettings) -> Self {
        Self {
            current: AtomicCell::new(initial.clamped()),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> ProcessingSettings {
        self.current.load()
    }

    pub fn replace(&self, settings: ProcessingSettings) {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.current.store(settings.clamped());
    }

    /// Applies `update` on top of the current snapshot and returns the result.
    pub fn update(&self, update: &SettingsUpdate) -> ProcessingSettings {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = self.current.load().with_update(update);
        self.current.store(next);
        debug!("Processing settings updated: {:?}", next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_defaults_are_neutral() {
        let s = ProcessingSettings::default();
        assert!(s.tone_is_neutral());
        assert!(s.gamma_is_neutral());
        assert!(s.color_is_neutral());
        assert_eq!(s.dehaze_amount, 0.0);
        assert!(!s.clahe_enabled);
        assert_eq!(s.clamped(), s);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let s = ProcessingSettings::default().with_update(&SettingsUpdate {
            temperature_kelvin: Some(15_000.0),
            tint: Some(-80.0),
            contrast: Some(0.0),
            dehaze_amount: Some(140.0),
            gamma: Some(f32::NAN),
            ..Default::default()
        });
        assert_eq!(s.temperature_kelvin, 10_000.0);
        assert_eq!(s.tint, -50.0);
        assert_eq!(s.contrast, 10.0);
        assert_eq!(s.dehaze_amount, 100.0);
        assert_eq!(s.gamma, 1.0);
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let shared = SharedSettings::default();
        shared.update(&SettingsUpdate {
            wb_mode: Some(WbMode::Manual),
            brightness: Some(25.0),
            ..Default::default()
        });
        let s = shared.update(&SettingsUpdate {
            exposure_comp: Some(-5.0),
            ..Default::default()
        });
        assert_eq!(s.wb_mode, WbMode::Manual);
        assert_eq!(s.brightness, 25.0);
        assert_eq!(s.level_offset(), 20.0);
        assert_eq!(shared.snapshot(), s);

        let s = shared.update(&SettingsUpdate {
            clahe_enabled: Some(true),
            ..Default::default()
        });
        assert!(s.clahe_enabled);
        assert_eq!(s.brightness, 25.0);
    }

    #[test]
    fn test_snapshots_never_tear() {
        let shared = Arc::new(SharedSettings::default());
        let a = ProcessingSettings {
            brightness: 10.0,
            contrast: 110.0,
            saturation: 10.0,
            ..Default::default()
        };
        let b = ProcessingSettings {
            brightness: -10.0,
            contrast: 90.0,
            saturation: -10.0,
            ..Default::default()
        };

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..2000 {
                    shared.replace(if i % 2 == 0 { a } else { b });
                }
            })
        };
        for _ in 0..2000 {
            let s = shared.snapshot();
            assert!(s == a || s == b || s == ProcessingSettings::default());
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let s: ProcessingSettings =
            toml::from_str("wb_mode = \"manual\"\ntemperature_kelvin = 4200.0\nclahe_enabled = true").unwrap();
        assert_eq!(s.wb_mode, WbMode::Manual);
        assert!(s.clahe_enabled);
        assert_eq!(s.temperature_kelvin, 4200.0);
        assert_eq!(s.contrast, 100.0);
    }
}
