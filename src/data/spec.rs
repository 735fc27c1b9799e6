use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError, Stage};

/// Name given to the intercept column of every design matrix.
pub const INTERCEPT: &str = "(Intercept)";

/// A response variable and its predictors. An intercept is always implied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SpecParts", into = "SpecParts")]
pub struct RegressionSpec {
    response: String,
    predictors: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct SpecParts {
    response: String,
    predictors: Vec<String>,
}

impl RegressionSpec {
    /// Build a spec, rejecting empty names, an empty predictor list and a
    /// predictor equal to the response. Repeated predictors keep their first
    /// occurrence.
    pub fn new<S: Into<String>>(response: impl Into<String>, predictors: impl IntoIterator<Item = S>) -> Result<Self> {
        let response = response.into().trim().to_string();
        if response.is_empty() {
            return Err(SpatialError::invalid(Stage::Data, "response name is empty"));
        }

        let mut unique: Vec<String> = Vec::new();
        for name in predictors {
            let name = name.into().trim().to_string();
            if name.is_empty() {
                return Err(SpatialError::invalid(Stage::Data, format!("empty predictor name in model for '{response}'")));
            }
            if name == response {
                return Err(SpatialError::invalid(Stage::Data, format!("'{name}' is both response and predictor")));
            }
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        if unique.is_empty() {
            return Err(SpatialError::invalid(Stage::Data, format!("model for '{response}' has no predictors")));
        }

        Ok(Self { response, predictors: unique })
    }

    #[inline] pub fn response(&self) -> &str { &self.response }

    #[inline] pub fn predictors(&self) -> &[String] { &self.predictors }

    /// Coefficient names in design order, intercept first.
    pub fn coefficient_names(&self) -> Vec<String> {
        std::iter::once(INTERCEPT.to_string()).chain(self.predictors.iter().cloned()).collect()
    }
}

impl fmt::Display for RegressionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.response, self.predictors.join(" + "))
    }
}

impl TryFrom<SpecParts> for RegressionSpec {
    type Error = SpatialError;

    fn try_from(parts: SpecParts) -> Result<Self> { Self::new(parts.response, parts.predictors) }
}

impl From<RegressionSpec> for SpecParts {
    fn from(spec: RegressionSpec) -> Self { Self { response: spec.response, predictors: spec.predictors } }
}

/// Design matrix with a leading intercept column, response vector and column names.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub names: Vec<String>,
}

impl Design {
    #[inline] pub fn n(&self) -> usize { self.x.nrows() }

    #[inline] pub fn p(&self) -> usize { self.x.ncols() }
}
