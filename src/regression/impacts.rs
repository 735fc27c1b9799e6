use log::{debug, warn};
use nalgebra::Cholesky;
use ndarray::{Array1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ImpactConfig;
use crate::error::{Result, SpatialError, Stage};
use crate::linalg::to_dmatrix;
use crate::stats::{mean_var, quantile_sorted};
use crate::weights::{SpatialWeightMatrix, Spectrum};

/// How tr((I − ρW)⁻¹) is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceMethod {
    /// Σ 1/(1 − ρλ_i) over the real spectrum of W.
    Exact,
    /// Truncated power series with Hutchinson estimates of tr(W^j), j ≥ 3.
    MonteCarlo { samples: usize, powers: usize },
}

/// Simulated spread of one effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpactInterval {
    pub lower: f64,
    pub upper: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictorImpact {
    pub name: String,
    pub direct: f64,
    pub indirect: f64,
    pub total: f64,
    pub direct_interval: Option<ImpactInterval>,
    pub indirect_interval: Option<ImpactInterval>,
    pub total_interval: Option<ImpactInterval>,
}

/// Direct, indirect and total effects of each predictor in a model with a
/// spatial lag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Impacts {
    pub method: TraceMethod,
    pub rho: f64,
    pub confidence: f64,
    /// Simulation draws whose ρ stayed feasible.
    pub draws_used: usize,
    pub predictors: Vec<PredictorImpact>,
}

/// Average diagonal and average row sum of (I − ρW)⁻¹ as functions of ρ.
enum Multipliers<'a> {
    Spectral { spectrum: &'a Spectrum, n: f64 },
    /// tr(W^j) and 1ᵗW^j1 for j = 0..=powers.
    Series { traces: Vec<f64>, sums: Vec<f64>, n: f64 },
}

impl<'a> Multipliers<'a> {
    fn new(w: &'a SpatialWeightMatrix, method: TraceMethod, seed: u64) -> Result<Self> {
        let n = w.n() as f64;
        match method {
            TraceMethod::Exact => w.spectrum()
                .map(|spectrum| Multipliers::Spectral { spectrum, n })
                .ok_or_else(|| SpatialError::invalid(Stage::Impacts, "exact traces need a weight matrix with a real spectrum")),
            TraceMethod::MonteCarlo { samples, powers } => {
                let mut sums = Vec::with_capacity(powers + 1);
                let mut v = Array1::ones(w.n());
                sums.push(n);
                for _ in 0..powers {
                    v = w.lag(v.view());
                    sums.push(v.sum());
                }

                let mut rng = StdRng::seed_from_u64(seed);
                let seeds = (0..samples).map(|_| rng.random::<u64>()).collect::<Vec<_>>();
                let estimates = seeds.into_par_iter()
                    .map(|seed| {
                        let mut rng = StdRng::seed_from_u64(seed);
                        let u = Array1::from_iter((0..w.n()).map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 }));
                        let mut v = u.clone();
                        (0..powers).map(|_| { v = w.lag(v.view()); u.dot(&v) }).collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>();

                let traces = (0..=powers)
                    .map(|j| match j {
                        0 => n,
                        1 => 0.0,
                        2 => w.trace_w2(),
                        j => estimates.iter().map(|e| e[j - 1]).sum::<f64>() / samples as f64,
                    })
                    .collect();
                debug!("[regression::impacts] {samples} trace samples, {powers} powers");
                Ok(Multipliers::Series { traces, sums, n })
            }
        }
    }

    fn series(terms: &[f64], rho: f64, n: f64) -> f64 {
        terms.iter().rev().fold(0.0, |acc, t| acc * rho + t) / n
    }

    /// tr((I − ρW)⁻¹)/n.
    fn direct(&self, rho: f64) -> f64 {
        match self {
            Multipliers::Spectral { spectrum, n } => spectrum.inverse_trace(rho) / n,
            Multipliers::Series { traces, n, .. } => Self::series(traces, rho, *n),
        }
    }

    /// 1ᵗ(I − ρW)⁻¹1/n.
    fn total(&self, rho: f64) -> f64 {
        match self {
            Multipliers::Spectral { spectrum, n } => spectrum.inverse_sum(rho) / n,
            Multipliers::Series { sums, n, .. } => Self::series(sums, rho, *n),
        }
    }

    /// (direct, indirect, total) for a coefficient.
    fn effects(&self, beta: f64, rho: f64) -> [f64; 3] {
        let direct = beta * self.direct(rho);
        let total = beta * self.total(rho);
        [direct, total - direct, total]
    }
}

/// Impacts of every non-intercept coefficient. `covariance` covers (β, ρ) in
/// that order.
pub(crate) fn compute_impacts(
    names: &[String],
    beta: &Array1<f64>,
    covariance: ArrayView2<f64>,
    rho: f64,
    (lower, upper): (f64, f64),
    w: &SpatialWeightMatrix,
    config: &ImpactConfig,
) -> Result<Impacts> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let multipliers = Multipliers::new(w, config.trace, rng.random::<u64>())?;
    let p = beta.len();

    let draws = if config.draws > 0 {
        let chol = Cholesky::new(to_dmatrix(&covariance.to_owned()))
            .ok_or_else(|| SpatialError::singular(Stage::Impacts, "coefficient covariance", f64::INFINITY))?;
        let l = chol.l();
        let seeds = (0..config.draws).map(|_| rng.random::<u64>()).collect::<Vec<_>>();
        seeds.into_par_iter()
            .filter_map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let z = nalgebra::DVector::from_iterator(p + 1, (0..=p).map(|_| rng.sample::<f64, _>(StandardNormal)));
                let shock = &l * z;
                let r = rho + shock[p];
                (r > lower && r < upper).then(|| {
                    (1..p).map(|k| multipliers.effects(beta[k] + shock[k], r)).collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };
    if config.draws > 0 && draws.is_empty() {
        warn!("[regression::impacts] every one of {} draws left the feasible rho interval", config.draws);
    }

    let alpha = 1.0 - config.confidence;
    let interval = |k: usize, effect: usize| -> Option<ImpactInterval> {
        if draws.is_empty() {
            return None;
        }
        let mut values = draws.iter().map(|d| d[k][effect]).collect::<Vec<_>>();
        values.sort_by(f64::total_cmp);
        let (_, var) = mean_var(&values);
        Some(ImpactInterval {
            lower: quantile_sorted(&values, alpha / 2.0),
            upper: quantile_sorted(&values, 1.0 - alpha / 2.0),
            std_dev: var.sqrt(),
        })
    };

    let predictors = (1..p)
        .map(|k| {
            let [direct, indirect, total] = multipliers.effects(beta[k], rho);
            PredictorImpact {
                name: names[k].clone(),
                direct,
                indirect,
                total,
                direct_interval: interval(k - 1, 0),
                indirect_interval: interval(k - 1, 1),
                total_interval: interval(k - 1, 2),
            }
        })
        .collect();

    Ok(Impacts {
        method: config.trace,
        rho,
        confidence: config.confidence,
        draws_used: draws.len(),
        predictors,
    })
}
