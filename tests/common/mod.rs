// Shared fixtures for the integration scenarios.
#![allow(dead_code)]

use geo::{Coord, MultiPolygon, Rect};
use spatialreg::{
    Alternative, ContiguityRule, Dataset, DistanceMetric, GraphConfig, ImpactConfig, ModelType, MoranConfig,
    OptimizerConfig, RegressionConfig, SpatialUnit, TraceMethod, VarianceAssumption, WeightStyle, WeightsConfig,
};

/// Unit square with its lower-left corner at (x, y).
pub fn square(x: f64, y: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![Rect::new(Coord { x, y }, Coord { x: x + 1.0, y: y + 1.0 }).to_polygon()])
}

/// m × m grid of unit squares with ids `r{row}c{col}`; `values` gives each
/// cell's attributes.
pub fn grid(m: usize, values: impl Fn(usize, usize) -> Vec<(&'static str, f64)>) -> Dataset {
    let units = (0..m * m)
        .map(|i| {
            let (r, c) = (i / m, i % m);
            values(r, c).into_iter().fold(
                SpatialUnit::new(format!("r{r}c{c}"), square(c as f64, r as f64)),
                |unit, (name, v)| unit.with_value(name, v),
            )
        })
        .collect();
    Dataset::new(units).unwrap()
}

pub fn graph_config(rule: ContiguityRule) -> GraphConfig {
    GraphConfig { rule, snap_tolerance: 0.0, metric: DistanceMetric::Planar, symmetrize: false }
}

pub fn weights_config(style: WeightStyle, zero_policy: bool) -> WeightsConfig {
    WeightsConfig { style, zero_policy, auxiliary: None }
}

pub fn moran_config(nsim: usize, seed: u64) -> MoranConfig {
    MoranConfig {
        nsim,
        seed,
        assumption: VarianceAssumption::Randomization,
        alternative: Alternative::Greater,
        adjust_n: false,
    }
}

pub fn regression_config(models: Vec<ModelType>) -> RegressionConfig {
    RegressionConfig {
        models,
        weights: None,
        optimizer: OptimizerConfig { max_iterations: 500, tolerance: 1e-8 },
        impacts: ImpactConfig { draws: 200, seed: 5, confidence: 0.95, trace: TraceMethod::Exact },
    }
}

/// Deterministic pseudo-noise in [-0.5, 0.5).
pub fn wobble(i: usize) -> f64 {
    ((i as f64 * 12.9898).sin() * 43758.5453).fract().abs() - 0.5
}
