//! Exit codes following sysexits.h conventions.
//!
//! Scripts can tell a bad carrier from a missing file or a write failure
//! without parsing stderr.

use aigcmark_core::WatermarkError;

/// Successful execution, including "no watermark detected".
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments or configuration).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Input data could not be decoded as an image.
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Worker timed out or died.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
#[derive(Debug)]
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Classify an error by the first engine error found in its chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<WatermarkError>())
            .map(code_for)
            .unwrap_or(GENERAL_ERROR);

        Self {
            code,
            message: Some(message),
        }
    }
}

/// Exit code for an engine error.
pub fn code_for(err: &WatermarkError) -> i32 {
    match err {
        WatermarkError::DecodeError(_) => DATA_ERROR,
        WatermarkError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => INPUT_ERROR,
        WatermarkError::Io(_) => IO_ERROR,
        WatermarkError::ConfigError(_) => USAGE_ERROR,
        WatermarkError::Timeout { .. } | WatermarkError::TaskFailed(_) => UNAVAILABLE,
        _ => GENERAL_ERROR,
    }
}
