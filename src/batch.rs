//! Runs many specifications against one dataset and weight matrix.

use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{GwrConfig, RegressionConfig};
use crate::data::{Dataset, RegressionSpec};
use crate::error::Result;
use crate::gwr::{fit_gwr, GwrResult};
use crate::regression::{fit_model, GlobalModelResult, ModelType};
use crate::weights::SpatialWeightMatrix;

/// Result of one model family for one specification.
#[derive(Debug, Clone)]
pub struct ModelOutcome {
    pub model: ModelType,
    pub result: Result<GlobalModelResult>,
}

#[derive(Debug, Clone)]
pub struct SpecificationReport {
    pub spec: RegressionSpec,
    pub models: Vec<ModelOutcome>,
    /// Present when a GWR configuration was supplied.
    pub gwr: Option<Result<GwrResult>>,
}

impl SpecificationReport {
    pub fn outcome(&self, model: ModelType) -> Option<&Result<GlobalModelResult>> {
        self.models.iter().find(|o| o.model == model).map(|o| &o.result)
    }
}

/// Evaluate every specification in parallel. A failing model or GWR fit is
/// recorded in its report and never stops the others.
pub fn run_batch(
    dataset: &Dataset,
    specs: &[RegressionSpec],
    w: &SpatialWeightMatrix,
    config: &RegressionConfig,
    gwr: Option<&GwrConfig>,
) -> Vec<SpecificationReport> {
    let reports = specs.par_iter()
        .map(|spec| {
            let models = config.models.iter()
                .map(|&model| {
                    let result = fit_model(dataset, spec, w, model, config);
                    if let Err(e) = &result {
                        warn!("[batch::run_batch] {model} {spec} failed: {e}");
                    }
                    ModelOutcome { model, result }
                })
                .collect();
            let gwr = gwr.map(|cfg| {
                fit_gwr(dataset, spec, cfg).inspect_err(|e| warn!("[batch::run_batch] gwr {spec} failed: {e}"))
            });
            SpecificationReport { spec: spec.clone(), models, gwr }
        })
        .collect::<Vec<_>>();
    info!("[batch::run_batch] evaluated {} specifications", reports.len());
    reports
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelTally {
    pub model: ModelType,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFit {
    pub spec: String,
    pub model: ModelType,
    pub aic: f64,
}

/// Success counts per model family and fitted models ranked by AIC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub specifications: usize,
    pub models: Vec<ModelTally>,
    pub gwr_succeeded: usize,
    pub gwr_failed: usize,
    /// Ascending AIC.
    pub ranking: Vec<RankedFit>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[SpecificationReport]) -> Self {
        let mut models: Vec<ModelTally> = Vec::new();
        let mut ranking = Vec::new();
        for report in reports {
            for outcome in &report.models {
                let tally = match models.iter_mut().position(|t| t.model == outcome.model) {
                    Some(i) => &mut models[i],
                    None => {
                        models.push(ModelTally { model: outcome.model, succeeded: 0, failed: 0 });
                        let last = models.len() - 1;
                        &mut models[last]
                    }
                };
                match &outcome.result {
                    Ok(fit) => {
                        tally.succeeded += 1;
                        ranking.push(RankedFit { spec: report.spec.to_string(), model: outcome.model, aic: fit.aic });
                    }
                    Err(_) => tally.failed += 1,
                }
            }
        }
        ranking.sort_by(|a, b| a.aic.total_cmp(&b.aic));

        let gwr = reports.iter().filter_map(|r| r.gwr.as_ref());
        Self {
            specifications: reports.len(),
            models,
            gwr_succeeded: gwr.clone().filter(|r| r.is_ok()).count(),
            gwr_failed: gwr.filter(|r| r.is_err()).count(),
            ranking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImpactConfig, OptimizerConfig};
    use crate::error::SpatialError;
    use crate::regression::TraceMethod;
    use crate::weights::WeightStyle;
    use crate::data::SpatialUnit;
    use geo::{Coord, MultiPolygon, Rect};

    fn path_weights(n: usize) -> SpatialWeightMatrix {
        let ids = (0..n).map(|i| format!("u{i}")).collect::<Vec<_>>();
        let triples = (0..n - 1).flat_map(|i| {
            [(ids[i].clone(), ids[i + 1].clone(), 1.0), (ids[i + 1].clone(), ids[i].clone(), 1.0)]
        });
        SpatialWeightMatrix::from_triples(ids.clone(), WeightStyle::Binary, false, triples.collect::<Vec<_>>(), None).unwrap()
    }

    fn dataset(n: usize) -> Dataset {
        let units = (0..n)
            .map(|i| {
                let cell = Rect::new(Coord { x: i as f64, y: 0.0 }, Coord { x: i as f64 + 1.0, y: 1.0 }).to_polygon();
                let a = ((i * 7) % 5) as f64;
                let b = ((i * 3) % 4) as f64;
                SpatialUnit::new(format!("u{i}"), MultiPolygon(vec![cell]))
                    .with_value("a", a)
                    .with_value("b", b)
                    .with_value("y", 1.0 + a - 0.5 * b + 0.1 * ((i * 5) % 3) as f64)
            })
            .collect();
        Dataset::new(units).unwrap()
    }

    fn config() -> RegressionConfig {
        RegressionConfig {
            models: vec![ModelType::Ols],
            weights: None,
            optimizer: OptimizerConfig { max_iterations: 200, tolerance: 1e-8 },
            impacts: ImpactConfig { draws: 0, seed: 1, confidence: 0.95, trace: TraceMethod::Exact },
        }
    }

    #[test]
    fn failing_specification_does_not_stop_others() {
        let data = dataset(20);
        let w = path_weights(20);
        let specs = vec![
            RegressionSpec::new("y", ["a"]).unwrap(),
            RegressionSpec::new("y", ["missing"]).unwrap(),
            RegressionSpec::new("y", ["a", "b"]).unwrap(),
        ];
        let reports = run_batch(&data, &specs, &w, &config(), None);
        assert_eq!(reports.len(), 3);
        assert!(reports[0].outcome(ModelType::Ols).unwrap().is_ok());
        assert!(matches!(reports[1].outcome(ModelType::Ols), Some(Err(SpatialError::MissingData { .. }))));
        assert!(reports[2].outcome(ModelType::Ols).unwrap().is_ok());
        assert!(reports.iter().all(|r| r.gwr.is_none()));

        let summary = BatchSummary::from_reports(&reports);
        assert_eq!(summary.specifications, 3);
        assert_eq!(summary.models, vec![ModelTally { model: ModelType::Ols, succeeded: 2, failed: 1 }]);
        assert_eq!(summary.ranking.len(), 2);
        assert!(summary.ranking[0].aic <= summary.ranking[1].aic);
        // The two-predictor model fits the generating process better.
        assert_eq!(summary.ranking[0].spec, "y ~ a + b");
    }
}
