//! Live color correction for camera feeds: automatic and manual white
//! balance, tone and color adjustments, and dark-channel dehazing.

pub mod adjustments;
pub mod camera_profile;
pub mod capture;
pub mod config;
pub mod dehaze;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod gain_model;
pub mod gains;
pub mod local_contrast;
pub mod processor;
pub mod settings;
pub mod storage;
pub mod white_balance;

pub use camera_profile::{CameraProfile, CameraType};
pub use capture::{CaptureLoop, FrameSource, ProcessedFrame};
pub use config::Config;
pub use dehaze::dehaze;
pub use diagnostics::DiagnosticsRecord;
pub use error::PipelineError;
pub use frame::Frame;
pub use gain_model::gains_for;
pub use gains::GainVector;
pub use processor::FrameProcessor;
pub use settings::{ProcessingSettings, SettingsUpdate, SharedSettings, WbMode};
pub use white_balance::WhiteBalanceEstimator;
