use std::collections::BTreeMap;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{BandwidthSearch, GwrConfig};
use crate::error::{Result, SpatialError, Stage};
use crate::gwr::{Bandwidth, LocalRegressionEngine};

/// 1/φ, the golden-section step.
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Adaptive searches switch to a full scan once the bracket is this narrow.
const SCAN_WIDTH: usize = 3;

/// Score minimized by the bandwidth search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Σ_i (y_i − ŷ_{≠i})² with unit i left out of its own fit.
    CrossValidation,
    /// Corrected Akaike criterion of the full fit.
    Aicc,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandwidthEvaluation {
    pub bandwidth: Bandwidth,
    /// +∞ when too few local systems were well conditioned.
    pub score: f64,
    pub valid_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthSelection {
    pub bandwidth: Bandwidth,
    pub score: f64,
    pub criterion: Criterion,
    pub evaluations: Vec<BandwidthEvaluation>,
}

/// Searches a bandwidth range for the best criterion score.
pub struct BandwidthSelector<'a, 'e> {
    engine: &'a LocalRegressionEngine<'e>,
    config: &'a GwrConfig,
}

impl<'a, 'e> BandwidthSelector<'a, 'e> {
    pub fn new(engine: &'a LocalRegressionEngine<'e>, config: &'a GwrConfig) -> Self { Self { engine, config } }

    /// Score one candidate bandwidth.
    pub fn evaluate(&self, bandwidth: Bandwidth) -> Result<BandwidthEvaluation> {
        bandwidth.validate()?;
        let n = self.engine.n();
        let (score, valid_fraction) = match self.config.criterion {
            Criterion::CrossValidation => {
                let y = &self.engine.design().y;
                let errors = (0..n).into_par_iter()
                    .filter_map(|i| self.engine.loo_prediction(i, bandwidth).ok().map(|pred| (y[i] - pred).powi(2)))
                    .collect::<Vec<_>>();
                let fraction = errors.len() as f64 / n as f64;
                // Rescale so scores with a few failed units stay comparable.
                let cv = errors.iter().sum::<f64>() * n as f64 / errors.len().max(1) as f64;
                (cv, fraction)
            }
            Criterion::Aicc => match self.engine.fit(bandwidth) {
                Ok((_, diagnostics)) => (diagnostics.aicc, diagnostics.n_used as f64 / n as f64),
                Err(SpatialError::SingularMatrix { .. }) => (f64::INFINITY, 0.0),
                Err(e) => return Err(e),
            },
        };
        let valid = valid_fraction >= self.config.min_valid_fraction && score.is_finite();
        let evaluation = BandwidthEvaluation {
            bandwidth,
            score: if valid { score } else { f64::INFINITY },
            valid_fraction,
        };
        debug!("[gwr::bandwidth] {:?} -> {:.6} (valid {:.3})", bandwidth, evaluation.score, valid_fraction);
        Ok(evaluation)
    }

    /// Run the configured search. A given bandwidth is evaluated once.
    pub fn select(&self) -> Result<BandwidthSelection> {
        self.config.validate()?;
        let evaluations = match self.config.bandwidth {
            BandwidthSearch::Fixed { min, max } => self.golden(min, max)?,
            BandwidthSearch::Adaptive { min, max } => self.golden_adaptive(min, max)?,
            BandwidthSearch::Given { bandwidth } => vec![self.evaluate(bandwidth)?],
        };

        let best = evaluations.iter()
            .filter(|e| e.score.is_finite())
            .min_by(|a, b| a.score.total_cmp(&b.score).then(a.bandwidth.value().total_cmp(&b.bandwidth.value())))
            .copied()
            .ok_or_else(|| SpatialError::convergence(
                Stage::Bandwidth,
                format!("no valid bandwidth in {:?}", self.config.bandwidth),
                evaluations.len(),
            ))?;

        info!(
            "[gwr::bandwidth] selected {:?} ({:?} = {:.6}) after {} evaluations",
            best.bandwidth, self.config.criterion, best.score, evaluations.len(),
        );
        Ok(BandwidthSelection {
            bandwidth: best.bandwidth,
            score: best.score,
            criterion: self.config.criterion,
            evaluations,
        })
    }

    /// Golden-section search over a distance interval.
    fn golden(&self, min: f64, max: f64) -> Result<Vec<BandwidthEvaluation>> {
        let budget = self.config.optimizer.max_iterations;
        let tol = self.config.optimizer.tolerance;
        let mut evaluations = Vec::new();
        let mut eval = |h: f64| -> Result<f64> {
            let e = self.evaluate(Bandwidth::Fixed(h))?;
            evaluations.push(e);
            Ok(e.score)
        };

        if max - min <= tol * (1.0 + max) {
            eval(max)?;
            return Ok(evaluations);
        }

        let (mut a, mut b) = (min, max);
        let mut c = b - INV_PHI * (b - a);
        let mut d = a + INV_PHI * (b - a);
        let (mut fc, mut fd) = (eval(c)?, eval(d)?);
        let mut iterations = 0;
        while b - a > tol * (1.0 + b) {
            iterations += 1;
            if iterations > budget {
                return Err(SpatialError::convergence(Stage::Bandwidth, format!("golden-section bracket [{a:.6}, {b:.6}]"), budget));
            }
            // Ties (including two invalid scores) move toward larger bandwidths.
            if fc < fd {
                b = d;
                d = c;
                fd = fc;
                c = b - INV_PHI * (b - a);
                fc = eval(c)?;
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + INV_PHI * (b - a);
                fd = eval(d)?;
            }
        }
        Ok(evaluations)
    }

    /// Golden-section search over neighbor counts, finished by a full scan of
    /// the narrowed bracket.
    fn golden_adaptive(&self, min: usize, max: usize) -> Result<Vec<BandwidthEvaluation>> {
        let n = self.engine.n();
        let max = max.min(n.saturating_sub(1));
        if min > max {
            return Err(SpatialError::invalid(Stage::Bandwidth, format!("neighbor range starts at {min} but only {n} units")));
        }

        let budget = self.config.optimizer.max_iterations;
        let mut cache: BTreeMap<usize, BandwidthEvaluation> = BTreeMap::new();
        let mut score = |k: usize| -> Result<f64> {
            if let Some(e) = cache.get(&k) {
                return Ok(e.score);
            }
            let e = self.evaluate(Bandwidth::Adaptive(k))?;
            cache.insert(k, e);
            Ok(e.score)
        };

        let (mut a, mut b) = (min, max);
        let mut iterations = 0;
        while b - a > SCAN_WIDTH {
            iterations += 1;
            if iterations > budget {
                return Err(SpatialError::convergence(Stage::Bandwidth, format!("adaptive bracket [{a}, {b}]"), budget));
            }
            let step = (INV_PHI * (b - a) as f64).round() as usize;
            let c = (b - step).max(a + 1);
            let d = (a + step).min(b - 1).max(c + 1);
            if score(c)? < score(d)? { b = d } else { a = c }
        }
        for k in a..=b {
            score(k)?;
        }
        Ok(cache.into_values().collect())
    }
}
