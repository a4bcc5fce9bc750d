//! Error types for the particle filter

use thiserror::Error;

/// Precondition violations reported by the particle filter and its accessors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("particle filter used before initialization")]
    Uninitialized,

    #[error("particle filter requires at least one particle")]
    NoParticles,

    #[error("invalid noise parameter {name}: {value}")]
    InvalidNoise { name: &'static str, value: f64 },

    #[error("time step must be finite and non-negative, got {0}")]
    InvalidTimestep(f64),

    #[error("sensor range must be finite and non-negative, got {0}")]
    InvalidRange(f64),

    #[error("cannot associate observations against an empty map")]
    EmptyMap,

    #[error(
        "association lists differ in length: {associations} ids, {sense_x} x values, {sense_y} y values"
    )]
    AssociationLengthMismatch {
        associations: usize,
        sense_x: usize,
        sense_y: usize,
    },

    #[error("particle index {index} out of range for {len} particles")]
    ParticleIndexOutOfRange { index: usize, len: usize },

    #[error("expected {expected} weights, got {got}")]
    WeightCountMismatch { expected: usize, got: usize },

    #[error("weight {index} must be finite and non-negative, got {value}")]
    InvalidWeight { index: usize, value: f64 },
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Checks that a standard deviation may be used to draw Gaussian noise (finite, `>= 0`).
pub(crate) fn check_std(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidNoise { name, value })
    }
}

/// Checks that a standard deviation may normalize a density (finite, `> 0`).
pub(crate) fn check_positive_std(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidNoise { name, value })
    }
}
