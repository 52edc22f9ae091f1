//! Render configuration errors.
//!
//! These are the failures a caller can provoke through bad configuration.
//! They are reported before any rays are generated. Numerical degeneracies
//! never surface here (paths terminate silently), and contract violations
//! such as queue overflow panic instead of returning.

use thiserror::Error;

/// Errors raised by the render entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("invalid image resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("samples per pixel must be positive")]
    InvalidSampleCount,

    #[error("{technique} requires at least one light in the scene")]
    NoLights { technique: &'static str },
}

pub type RenderResult<T> = Result<T, RenderError>;
