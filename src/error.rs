//! Common error and result types.

use crate::matcher::Candidate;
use crate::store::TrackId;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the identification engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Unplayable audio, unsupported parameters or empty input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Input is digital silence and carries no spectral content.
    #[error("input audio is silent")]
    SilentAudio,

    /// Input is shorter than the minimum the pipeline can frame.
    #[error("input too short: {got_ms} ms (minimum {min_ms} ms)")]
    TooShort { got_ms: u64, min_ms: u64 },

    /// Sample rate outside the supported range.
    #[error("unsupported sample rate: {0} Hz (supported: 8000..=192000)")]
    UnsupportedSampleRate(u32),

    /// Numerical failure in the DSP stages.
    #[error("processing error: {0}")]
    Processing(String),

    /// Persistence failure, constraint violation or corruption.
    #[error("storage error: {0}")]
    Storage(String),

    /// Referenced track does not exist.
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),

    /// Cooperative cancellation between pipeline stages.
    #[error("operation cancelled")]
    Cancelled,

    /// Identification exceeded its wall-clock budget. Candidates gathered
    /// before the deadline are carried along as tentative results.
    #[error("identification timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        tentative: Vec<Candidate>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
