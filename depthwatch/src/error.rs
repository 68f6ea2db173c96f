// THEORY:
// One error enum covers every way a capture run can end abnormally. Every variant
// is fatal: the capture loop never retries, it stops the device, closes it and
// hands the error up. The binary turns any of them into exit code -1.
//
// Missing depth (NaN points) is deliberately absent here. It is ordinary data.

use std::time::Duration;

/// Errors that end a capture run.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Discovery found zero devices.
    #[error("no depth device connected")]
    DeviceNotFound,

    /// The backend could not open the requested device.
    #[error("failure opening device {serial:?}")]
    DeviceOpenFailed { serial: String },

    /// A command-line or configuration value is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No frame arrived within the allowed wait.
    #[error("timeout: no frame within {0:?}")]
    FrameTimeout(Duration),

    /// The device refused to start (or restart) its streams.
    #[error("failed to start device streams")]
    StreamStartFailed,

    /// A frame arrived whose grid dimensions differ from the calibrated background.
    #[error("grid dimensions changed from {expected:?} to {found:?}")]
    GridMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A configuration file could not be parsed.
    #[error("bad configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Encoding or writing a preview image failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Process exit status for this error. Every failure maps to -1.
    pub fn exit_code(&self) -> i32 {
        -1
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
