use thiserror::Error;

/// Soft failures raised inside a correction stage.
///
/// These never leave the pipeline: each stage boundary logs them and keeps
/// its input frame (or last-known-good gains) instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("degenerate frame: {0}")]
    DegenerateFrame(&'static str),

    #[error("non-finite {what}: {value}")]
    NonFinite { what: &'static str, value: f32 },

    #[error("buffer length {actual} does not match {width}x{height}x3")]
    ShapeMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("transmission map is flat ({0:.4})")]
    FlatTransmission(f32),
}

impl PipelineError {
    /// Input the stage cannot work with, as opposed to a numerical fault.
    /// These are expected on covered lenses or blown-out frames.
    pub fn is_degenerate_input(&self) -> bool {
        matches!(self, PipelineError::DegenerateFrame(_) | PipelineError::FlatTransmission(_))
    }
}

pub type StageResult<T> = std::result::Result<T, PipelineError>;
