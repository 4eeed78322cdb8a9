//! Error types for the Krate engines

use thiserror::Error;

/// Core error type. Only configuration and state loading can fail; the
/// audio path itself is total over valid configuration.
#[derive(Error, Debug)]
pub enum KrateError {
    #[error("Invalid FFT size: {0} (must be a power of two in 1024..=8192)")]
    InvalidFftSize(usize),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Truncated state stream at {0}")]
    TruncatedState(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type KrateResult<T> = Result<T, KrateError>;
