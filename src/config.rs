//! Analysis configuration. Every setting is explicit: deserialization requires
//! each field and Rust callers build the structs directly.

use serde::{Deserialize, Serialize};

use crate::autocorr::{Alternative, VarianceAssumption};
use crate::data::AuxiliaryWeights;
use crate::error::{Result, SpatialError, Stage};
use crate::geom::DistanceMetric;
use crate::graph::ContiguityRule;
use crate::gwr::{Bandwidth, Criterion, Kernel};
use crate::regression::{ModelType, TraceMethod};
use crate::weights::WeightStyle;

/// Settings for a full run over one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    pub graph: GraphConfig,
    pub weights: WeightsConfig,
    pub moran: MoranConfig,
    pub gwr: GwrConfig,
    pub regression: RegressionConfig,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        self.graph.validate()?;
        self.weights.validate()?;
        self.moran.validate()?;
        self.gwr.validate()?;
        self.regression.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    pub rule: ContiguityRule,
    /// Distance within which boundaries count as touching.
    pub snap_tolerance: f64,
    /// Metric for centroid-based rules.
    pub metric: DistanceMetric,
    /// Make k-nearest relations symmetric by union.
    pub symmetrize: bool,
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.snap_tolerance.is_finite() || self.snap_tolerance < 0.0 {
            return Err(SpatialError::invalid(Stage::Graph, format!(
                "snap tolerance must be finite and non-negative, got {}", self.snap_tolerance,
            )));
        }
        match self.rule {
            ContiguityRule::KNearest { k: 0 } => Err(SpatialError::invalid(Stage::Graph, "k must be at least 1")),
            ContiguityRule::DistanceThreshold { distance } if !(distance.is_finite() && distance > 0.0) => {
                Err(SpatialError::invalid(Stage::Graph, format!("distance threshold must be positive, got {distance}")))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightsConfig {
    pub style: WeightStyle,
    /// Allow units without neighbors (their rows stay zero).
    pub zero_policy: bool,
    /// Scale each link (i, j) by `aux_i * aux_j`.
    pub auxiliary: Option<AuxiliaryWeights>,
}

impl WeightsConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.auxiliary {
            Some(AuxiliaryWeights::Variable(name)) if name.trim().is_empty() => {
                Err(SpatialError::invalid(Stage::Weights, "auxiliary weight variable name is empty"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoranConfig {
    /// Number of permutations; zero skips the permutation test.
    pub nsim: usize,
    pub seed: u64,
    pub assumption: VarianceAssumption,
    pub alternative: Alternative,
    /// Exclude isolates from n when computing the statistic.
    pub adjust_n: bool,
}

impl MoranConfig {
    pub fn validate(&self) -> Result<()> { Ok(()) }
}

/// How the GWR bandwidth is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BandwidthSearch {
    /// Golden-section search over a distance range.
    Fixed { min: f64, max: f64 },
    /// Integer search over a neighbor-count range.
    Adaptive { min: usize, max: usize },
    /// Use the bandwidth as given.
    Given { bandwidth: Bandwidth },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl OptimizerConfig {
    pub fn validate(&self, stage: Stage) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SpatialError::invalid(stage, "optimizer needs at least one iteration"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SpatialError::invalid(stage, format!("optimizer tolerance must be positive, got {}", self.tolerance)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GwrConfig {
    pub kernel: Kernel,
    pub bandwidth: BandwidthSearch,
    pub criterion: Criterion,
    pub metric: DistanceMetric,
    /// Smallest share of well-conditioned local fits for a bandwidth to count.
    pub min_valid_fraction: f64,
    /// Local systems with a larger condition number are treated as singular.
    pub condition_threshold: f64,
    pub optimizer: OptimizerConfig,
}

impl GwrConfig {
    pub fn validate(&self) -> Result<()> {
        match self.bandwidth {
            BandwidthSearch::Fixed { min, max } => {
                if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
                    return Err(SpatialError::invalid(Stage::Bandwidth, format!("empty or non-positive bandwidth range [{min}, {max}]")));
                }
            }
            BandwidthSearch::Adaptive { min, max } => {
                if min == 0 || min > max {
                    return Err(SpatialError::invalid(Stage::Bandwidth, format!("empty neighbor-count range [{min}, {max}]")));
                }
            }
            BandwidthSearch::Given { bandwidth } => bandwidth.validate()?,
        }
        if !(self.min_valid_fraction > 0.0 && self.min_valid_fraction <= 1.0) {
            return Err(SpatialError::invalid(Stage::Bandwidth, format!(
                "minimum valid fraction must lie in (0, 1], got {}", self.min_valid_fraction,
            )));
        }
        if !(self.condition_threshold.is_finite() && self.condition_threshold > 1.0) {
            return Err(SpatialError::invalid(Stage::Gwr, format!(
                "condition threshold must exceed 1, got {}", self.condition_threshold,
            )));
        }
        self.optimizer.validate(Stage::Bandwidth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImpactConfig {
    /// Simulation draws for confidence bounds; zero skips them.
    pub draws: usize,
    pub seed: u64,
    /// Two-sided confidence level of the bounds, e.g. 0.95.
    pub confidence: f64,
    pub trace: TraceMethod,
}

impl ImpactConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(SpatialError::invalid(Stage::Impacts, format!("confidence must lie in (0, 1), got {}", self.confidence)));
        }
        match self.trace {
            TraceMethod::MonteCarlo { samples, powers } if samples == 0 || powers < 2 => {
                Err(SpatialError::invalid(Stage::Impacts, "Monte Carlo traces need samples >= 1 and powers >= 2"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionConfig {
    pub models: Vec<ModelType>,
    /// Per-unit weights for OLS.
    pub weights: Option<AuxiliaryWeights>,
    pub optimizer: OptimizerConfig,
    pub impacts: ImpactConfig,
}

impl RegressionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(SpatialError::invalid(Stage::Batch, "no model types requested"));
        }
        if let Some((i, model)) = self.models.iter().enumerate().find(|(i, m)| self.models[..*i].contains(m)) {
            return Err(SpatialError::invalid(Stage::Batch, format!("model type {model:?} listed twice (position {i})")));
        }
        self.optimizer.validate(Stage::Lag)?;
        self.impacts.validate()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn example_json() -> &'static str {
        r#"{
            "graph": { "rule": { "kind": "queen" }, "snap_tolerance": 0.0, "metric": "planar", "symmetrize": false },
            "weights": { "style": "row_standardized", "zero_policy": true, "auxiliary": null },
            "moran": { "nsim": 99, "seed": 7, "assumption": "randomization", "alternative": "greater", "adjust_n": false },
            "gwr": {
                "kernel": "bisquare",
                "bandwidth": { "mode": "adaptive", "min": 5, "max": 20 },
                "criterion": "cross_validation",
                "metric": "planar",
                "min_valid_fraction": 0.9,
                "condition_threshold": 1e10,
                "optimizer": { "max_iterations": 50, "tolerance": 1e-4 }
            },
            "regression": {
                "models": ["ols", "lag", "sac"],
                "weights": { "variable": "pop" },
                "optimizer": { "max_iterations": 500, "tolerance": 1e-8 },
                "impacts": { "draws": 200, "seed": 11, "confidence": 0.95, "trace": { "kind": "monte_carlo", "samples": 50, "powers": 30 } }
            }
        }"#
    }

    #[test]
    fn parses_and_validates() {
        let config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.graph.rule, ContiguityRule::Queen);
        assert_eq!(config.gwr.bandwidth, BandwidthSearch::Adaptive { min: 5, max: 20 });
        assert_eq!(config.regression.weights, Some(AuxiliaryWeights::Variable("pop".into())));
        assert_eq!(config.regression.impacts.trace, TraceMethod::MonteCarlo { samples: 50, powers: 30 });
    }

    #[test]
    fn missing_fields_are_errors() {
        let json = r#"{ "rule": { "kind": "rook" }, "snap_tolerance": 0.0, "metric": "planar" }"#;
        assert!(serde_json::from_str::<GraphConfig>(json).is_err());
    }

    #[test]
    fn impossible_settings_are_rejected() {
        let mut config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.graph.rule = ContiguityRule::KNearest { k: 0 };
        assert!(config.validate().is_err());

        let mut config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.graph.snap_tolerance = -1.0;
        assert!(config.validate().is_err());

        let mut config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.gwr.bandwidth = BandwidthSearch::Fixed { min: 3.0, max: 1.0 };
        assert!(config.validate().is_err());

        let mut config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.regression.models = vec![ModelType::Ols, ModelType::Ols];
        assert!(config.validate().is_err());

        let mut config: AnalysisConfig = serde_json::from_str(example_json()).unwrap();
        config.regression.impacts.confidence = 1.0;
        assert!(config.validate().is_err());
    }
}
