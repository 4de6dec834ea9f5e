//! Error types for uplim

use thiserror::Error;

/// uplim error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error (bad input, bad configuration, insufficient window)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error (numerical failure in a search or integration step)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Optimizer failure reported by the likelihood engine (after retry)
    #[error("Optimizer error: {0}")]
    Optimizer(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
