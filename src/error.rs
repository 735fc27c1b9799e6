use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Data,
    Graph,
    Weights,
    Moran,
    Kernel,
    Bandwidth,
    Gwr,
    Ols,
    Lag,
    Sac,
    Impacts,
    Batch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Data => "data",
            Stage::Graph => "graph",
            Stage::Weights => "weights",
            Stage::Moran => "moran",
            Stage::Kernel => "kernel",
            Stage::Bandwidth => "bandwidth",
            Stage::Gwr => "gwr",
            Stage::Ols => "ols",
            Stage::Lag => "lag",
            Stage::Sac => "sac",
            Stage::Impacts => "impacts",
            Stage::Batch => "batch",
        };
        f.write_str(name)
    }
}

/// Errors raised by the spatial analysis core.
///
/// Every variant names the stage it came from and, where one exists, the
/// offending units or model so callers can aggregate failures.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SpatialError {
    /// Malformed or empty polygon geometry.
    #[error("[{stage}] malformed geometry for {}: {reason}", unit_list(.units))]
    Geometry { stage: Stage, units: Vec<String>, reason: String },

    /// Zero-neighbor units encountered with zero-policy disabled.
    #[error("[{stage}] isolates with zero-policy disabled: {}", unit_list(.units))]
    Isolate { stage: Stage, units: Vec<String> },

    /// A variable is absent or undefined for some units at fit time.
    #[error("[{stage}] missing data for variable '{variable}': {}", unit_list(.units))]
    MissingData { stage: Stage, variable: String, units: Vec<String> },

    /// Collinear or rank-deficient system.
    #[error("[{stage}] singular or ill-conditioned system ({context}), condition number {condition:.3e}")]
    SingularMatrix { stage: Stage, context: String, condition: f64 },

    /// An iterative search exhausted its budget.
    #[error("[{stage}] no convergence after {iterations} iteration(s) ({context})")]
    Convergence { stage: Stage, context: String, iterations: usize },

    /// Inconsistent configuration or input shapes.
    #[error("[{stage}] invalid input: {reason}")]
    InvalidInput { stage: Stage, reason: String },
}

impl SpatialError {
    /// The stage this error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            SpatialError::Geometry { stage, .. }
            | SpatialError::Isolate { stage, .. }
            | SpatialError::MissingData { stage, .. }
            | SpatialError::SingularMatrix { stage, .. }
            | SpatialError::Convergence { stage, .. }
            | SpatialError::InvalidInput { stage, .. } => *stage,
        }
    }

    pub(crate) fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        SpatialError::InvalidInput { stage, reason: reason.into() }
    }

    pub(crate) fn singular(stage: Stage, context: impl Into<String>, condition: f64) -> Self {
        SpatialError::SingularMatrix { stage, context: context.into(), condition }
    }

    pub(crate) fn convergence(stage: Stage, context: impl Into<String>, iterations: usize) -> Self {
        SpatialError::Convergence { stage, context: context.into(), iterations }
    }

    /// Re-tag an error with a different stage, keeping its payload.
    pub(crate) fn at(self, stage: Stage) -> Self {
        match self {
            SpatialError::Geometry { units, reason, .. } => SpatialError::Geometry { stage, units, reason },
            SpatialError::Isolate { units, .. } => SpatialError::Isolate { stage, units },
            SpatialError::MissingData { variable, units, .. } => SpatialError::MissingData { stage, variable, units },
            SpatialError::SingularMatrix { context, condition, .. } => SpatialError::SingularMatrix { stage, context, condition },
            SpatialError::Convergence { context, iterations, .. } => SpatialError::Convergence { stage, context, iterations },
            SpatialError::InvalidInput { reason, .. } => SpatialError::InvalidInput { stage, reason },
        }
    }
}

/// Render a unit id list for error messages, truncated after a few ids.
/// An empty list means the variable or unit set is absent altogether.
fn unit_list(units: &[String]) -> String {
    const SHOWN: usize = 8;
    match units.len() {
        0 => "absent".to_string(),
        n if n <= SHOWN => format!("{n} unit(s) [{}]", units.join(", ")),
        n => format!("{n} unit(s) [{}, ...]", units[..SHOWN].join(", ")),
    }
}

/// Result alias used throughout the core.
pub type Result<T, E = SpatialError> = std::result::Result<T, E>;
