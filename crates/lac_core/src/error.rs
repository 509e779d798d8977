//! Error taxonomy shared by the model, the integrator and the sweep.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::conservation::Pool;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Why the stiff solver stopped before reaching the end of the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Step size control shrank the step below the resolvable minimum.
    StepSizeTooSmall,
    /// The configured step budget ran out.
    MaxStepsExceeded,
    /// The right-hand side produced NaN or infinity.
    NonFiniteState,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::StepSizeTooSmall => "step size fell below the minimum",
            FailureReason::MaxStepsExceeded => "step budget exhausted",
            FailureReason::NonFiniteState => "non-finite derivative encountered",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Integration failed at t = {t}: {reason}")]
    IntegrationFailure { t: f64, reason: FailureReason },

    #[error("{pool} pool drifted at t = {t}: expected {expected:e}, observed {observed:e}")]
    InvariantViolation {
        pool: Pool,
        t: f64,
        expected: f64,
        observed: f64,
    },
}

impl ModelError {
    pub(crate) fn settings(message: impl Into<String>) -> Self {
        ModelError::InvalidSettings(message.into())
    }

    /// True for errors raised by the solver rather than by input validation.
    pub fn is_integration_failure(&self) -> bool {
        matches!(self, ModelError::IntegrationFailure { .. })
    }
}
