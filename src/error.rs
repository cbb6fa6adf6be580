// src/error.rs

use thiserror::Error;

/// Fatal setup-time failures.
///
/// Numerical precondition violations (odd extents handed to the spectral
/// coupler, out-of-range level access, incompatible mesh operands) are
/// programming errors and panic at the point of detection instead.
#[derive(Debug, Error)]
pub enum GridError {
    /// Inconsistent or malformed configuration; names the offending parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Degenerate or oversized refinement geometry.
    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
