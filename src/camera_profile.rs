use serde::{Deserialize, Serialize};

use crate::gains::GainVector;

/// Camera family, detected once when a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    /// Built-in laptop camera (FaceTime HD class).
    Macbook,
    /// USB sensor with a known blue bias.
    External,
}

impl std::fmt::Display for CameraType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Native modes reported by built-in FaceTime HD cameras.
const BUILTIN_RESOLUTIONS: &[(u32, u32)] = &[(1280, 720), (1920, 1080), (1760, 1328), (1552, 1552)];

impl CameraType {
    pub fn all() -> &'static [CameraType] {
        &[CameraType::Macbook, CameraType::External]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraType::Macbook => "macbook",
            CameraType::External => "external",
        }
    }

    /// Resolution fingerprinting: the first device on a Mac that reports one
    /// of the built-in camera modes is the laptop camera, everything else is
    /// treated as an external USB sensor.
    pub fn classify(width: u32, height: u32, device_index: u32) -> CameraType {
        Self::classify_for_platform(width, height, device_index, cfg!(target_os = "macos"))
    }

    pub fn classify_for_platform(width: u32, height: u32, device_index: u32, is_macos: bool) -> CameraType {
        if is_macos && device_index == 0 && BUILTIN_RESOLUTIONS.contains(&(width, height)) {
            CameraType::Macbook
        } else {
            CameraType::External
        }
    }

    pub fn profile(&self) -> CameraProfile {
        match self {
            CameraType::Macbook => CameraProfile {
                camera_type: *self,
                base_correction: GainVector::new(0.98, 1.0, 1.02),
                fallback: GainVector::new(0.95, 1.0, 1.05),
                deviation_limit: 0.5,
                blue_cast_ratio: 1.10,
                blue_reduction: 0.90,
            },
            CameraType::External => CameraProfile {
                camera_type: *self,
                base_correction: GainVector::new(0.85, 1.0, 1.15),
                fallback: GainVector::new(0.80, 1.0, 1.20),
                deviation_limit: 0.5,
                blue_cast_ratio: 1.10,
                blue_reduction: 0.90,
            },
        }
    }
}

/// Per-camera constants consumed by the white balance estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraProfile {
    pub camera_type: CameraType,
    /// Prior blended into every auto estimate.
    pub base_correction: GainVector,
    /// Returned when no estimate can be made and nothing better is known.
    pub fallback: GainVector,
    /// Raw estimates further than this from neutral lean on the prior.
    pub deviation_limit: f32,
    /// Blue mean / green mean ratio that triggers the blue reduction.
    pub blue_cast_ratio: f32,
    pub blue_reduction: f32,
}

impl Default for CameraProfile {
    fn default() -> Self {
        CameraType::External.profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(CameraType::classify_for_platform(1280, 720, 0, true), CameraType::Macbook);
        assert_eq!(CameraType::classify_for_platform(1280, 720, 1, true), CameraType::External);
        assert_eq!(CameraType::classify_for_platform(1280, 720, 0, false), CameraType::External);
        assert_eq!(CameraType::classify_for_platform(640, 480, 0, true), CameraType::External);
    }

    #[test]
    fn test_external_profile_is_stronger() {
        let mac = CameraType::Macbook.profile();
        let ext = CameraType::External.profile();
        assert!(ext.base_correction.blue() < mac.base_correction.blue());
        assert!(ext.base_correction.red() > mac.base_correction.red());
        for cam in CameraType::all() {
            let p = cam.profile();
            assert_eq!(p.camera_type, *cam);
            assert!(p.fallback.mean() <= 1.5);
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(CameraType::External.to_string(), "external");
        let parsed: CameraType = toml::from_str::<std::collections::HashMap<String, CameraType>>("t = \"macbook\"")
            .unwrap()["t"];
        assert_eq!(parsed, CameraType::Macbook);
    }
}
