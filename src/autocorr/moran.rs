use log::{debug, info};
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MoranConfig;
use crate::data::Dataset;
use crate::error::{Result, SpatialError, Stage};
use crate::stats::{mean_var, normal_cdf};
use crate::weights::SpatialWeightMatrix;

/// Relative variance below which a variable counts as constant.
const CONSTANT_TOL: f64 = 1e-12;

/// Sampling assumption behind the analytic variance of I.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceAssumption {
    Normality,
    /// Kurtosis-corrected variance under random permutation.
    Randomization,
}

/// Direction of the alternative hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    Greater,
    Less,
    TwoSided,
}

impl Alternative {
    /// Normal-theory p-value for a z-score.
    fn p_value(&self, z: f64) -> f64 {
        match self {
            Alternative::Greater => 1.0 - normal_cdf(z),
            Alternative::Less => normal_cdf(z),
            Alternative::TwoSided => 2.0 * (1.0 - normal_cdf(z.abs())),
        }
    }
}

/// Moments of I under the null and the resulting test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticMoran {
    pub assumption: VarianceAssumption,
    pub alternative: Alternative,
    pub expectation: f64,
    pub variance: f64,
    /// Absent for a constant variable.
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
}

/// Permutation reference distribution summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermutationMoran {
    pub nsim: usize,
    pub seed: u64,
    /// (#{simulated ≥ observed} + 1) / (nsim + 1) for the greater alternative.
    pub p_value: f64,
    pub mean: f64,
    pub variance: f64,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoranResult {
    pub statistic: f64,
    /// Units counted in n (isolates excluded when adjusting).
    pub n: usize,
    pub constant: bool,
    pub analytic: AnalyticMoran,
    /// Absent when no permutations were requested or x is constant.
    pub permutation: Option<PermutationMoran>,
}

/// Global Moran's I of `x` under `w`.
pub fn moran(x: ArrayView1<f64>, w: &SpatialWeightMatrix, config: &MoranConfig) -> Result<MoranResult> {
    config.validate()?;
    let n_all = w.n();
    if x.len() != n_all {
        return Err(SpatialError::invalid(Stage::Moran, format!("{} values for {n_all} units", x.len())));
    }
    let missing = x.iter().enumerate()
        .filter(|(_, v)| v.is_nan())
        .map(|(i, _)| w.ids()[i].clone())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(SpatialError::MissingData { stage: Stage::Moran, variable: "x".into(), units: missing });
    }

    let s0 = w.s0();
    if s0 <= 0.0 {
        return Err(SpatialError::invalid(Stage::Moran, "weights sum to zero (S0 = 0)"));
    }
    let n = if config.adjust_n { n_all - w.isolates().len() } else { n_all };
    if n < 2 {
        return Err(SpatialError::invalid(Stage::Moran, format!("need at least 2 units, got {n}")));
    }
    let nf = n as f64;

    let mean = x.sum() / n_all as f64;
    let z: Array1<f64> = x.mapv(|v| v - mean);
    let zz = z.dot(&z);
    let constant = zz <= CONSTANT_TOL * x.dot(&x);

    let cross = |z: ArrayView1<f64>| z.dot(&w.lag(z));
    let statistic = if constant { 0.0 } else { nf / s0 * cross(z.view()) / zz };

    let expectation = -1.0 / (nf - 1.0);
    let (s1, s2, s02, nn) = (w.s1(), w.s2(), s0 * s0, nf * nf);
    let variance = match config.assumption {
        VarianceAssumption::Normality => (nn * s1 - nf * s2 + 3.0 * s02) / (s02 * (nn - 1.0)) - expectation.powi(2),
        VarianceAssumption::Randomization => {
            let kurtosis = if constant { 0.0 } else { n_all as f64 * z.mapv(|v| v.powi(4)).sum() / (zz * zz) };
            let a = nf * (s1 * (nn - 3.0 * nf + 3.0) - nf * s2 + 3.0 * s02);
            let b = kurtosis * (s1 * (nn - nf) - 2.0 * nf * s2 + 6.0 * s02);
            (a - b) / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0) * s02) - expectation.powi(2)
        }
    };
    // The randomization variance is undefined for n <= 3.
    let z_score = (!constant && variance.is_finite() && variance > 0.0).then(|| (statistic - expectation) / variance.sqrt());
    let analytic = AnalyticMoran {
        assumption: config.assumption,
        alternative: config.alternative,
        expectation,
        variance,
        z_score,
        p_value: z_score.map(|z| config.alternative.p_value(z)),
    };

    let permutation = (config.nsim > 0 && !constant).then(|| {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let seeds = (0..config.nsim).map(|_| rng.random::<u64>()).collect::<Vec<_>>();
        let scale = nf / s0 / zz;
        let sims = seeds.into_par_iter()
            .map(|seed| {
                let mut shuffled = z.to_vec();
                shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
                scale * cross(ArrayView1::from(&shuffled[..]))
            })
            .collect::<Vec<f64>>();
        debug!("[autocorr::moran] {} permutations drawn from seed {}", config.nsim, config.seed);

        let greater = sims.iter().filter(|&&s| s >= statistic).count();
        let less = sims.iter().filter(|&&s| s <= statistic).count();
        let tail = |count: usize| (count + 1) as f64 / (config.nsim + 1) as f64;
        let p_value = match config.alternative {
            Alternative::Greater => tail(greater),
            Alternative::Less => tail(less),
            Alternative::TwoSided => (2.0 * tail(greater).min(tail(less))).min(1.0),
        };
        let (mean, variance) = mean_var(&sims);
        PermutationMoran {
            nsim: config.nsim,
            seed: config.seed,
            p_value,
            mean,
            variance,
            z_score: (variance > 0.0).then(|| (statistic - mean) / variance.sqrt()),
        }
    });

    info!(
        "[autocorr::moran] I = {statistic:.6}, E[I] = {expectation:.6}, z = {}, n = {n}",
        z_score.map_or("n/a".to_string(), |z| format!("{z:.4}")),
    );
    Ok(MoranResult { statistic, n, constant, analytic, permutation })
}

/// Moran's I for a named dataset variable.
pub fn moran_for_variable(dataset: &Dataset, name: &str, w: &SpatialWeightMatrix, config: &MoranConfig) -> Result<MoranResult> {
    let x = dataset.column(name, Stage::Moran)?;
    moran(x.view(), w, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AdjacencyGraph;
    use crate::weights::{WeightMatrixFactory, WeightStyle};
    use crate::config::WeightsConfig;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn config(nsim: usize) -> MoranConfig {
        MoranConfig {
            nsim,
            seed: 42,
            assumption: VarianceAssumption::Randomization,
            alternative: Alternative::Greater,
            adjust_n: false,
        }
    }

    /// Row-standardized ring of n units.
    fn ring(n: usize) -> SpatialWeightMatrix {
        let ids = (0..n).map(|i| format!("u{i}")).collect();
        let rows = (0..n).map(|i| vec![((i + 1) % n) as u32, ((i + n - 1) % n) as u32]).collect();
        let graph = AdjacencyGraph::from_neighbors(ids, rows).unwrap();
        let cfg = WeightsConfig { style: WeightStyle::RowStandardized, zero_policy: false, auxiliary: None };
        WeightMatrixFactory::new(&cfg).build(&graph, None).unwrap()
    }

    #[test]
    fn smooth_ring_is_positively_autocorrelated() {
        let w = ring(12);
        let x = Array1::from_iter((0..12).map(|i| (i as f64 * std::f64::consts::PI / 6.0).sin()));
        let result = moran(x.view(), &w, &config(199)).unwrap();
        // For a sinusoid on a ring, Wz = cos(π/6) z.
        assert_relative_eq!(result.statistic, (std::f64::consts::PI / 6.0).cos(), epsilon = 1e-10);
        assert_relative_eq!(result.analytic.expectation, -1.0 / 11.0);
        assert!(result.analytic.z_score.unwrap() > 2.0);
        let perm = result.permutation.unwrap();
        assert!(perm.p_value > 0.0 && perm.p_value <= 1.0);
        assert!(perm.p_value < 0.05);
    }

    #[test]
    fn alternating_ring_is_negative() {
        let w = ring(10);
        let x = Array1::from_iter((0..10).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }));
        let result = moran(x.view(), &w, &config(0)).unwrap();
        assert_relative_eq!(result.statistic, -1.0, epsilon = 1e-12);
        assert!(result.permutation.is_none());
    }

    #[test]
    fn constant_variable_is_zero() {
        let w = ring(6);
        let result = moran(Array1::from_elem(6, 3.5).view(), &w, &config(99)).unwrap();
        assert_eq!(result.statistic, 0.0);
        assert!(result.constant);
        assert!(result.analytic.z_score.is_none());
        assert!(result.analytic.p_value.is_none());
        assert!(result.permutation.is_none());
    }

    #[test]
    fn normality_variance_matches_closed_form() {
        let w = ring(8);
        let mut cfg = config(0);
        cfg.assumption = VarianceAssumption::Normality;
        let x = array![1.0, 3.0, 2.0, 5.0, 4.0, 6.0, 8.0, 7.0];
        let result = moran(x.view(), &w, &cfg).unwrap();
        let (n, s0, s1, s2) = (8.0, w.s0(), w.s1(), w.s2());
        let expected = (n * n * s1 - n * s2 + 3.0 * s0 * s0) / (s0 * s0 * (n * n - 1.0)) - (1.0 / 49.0);
        assert_relative_eq!(result.analytic.variance, expected, epsilon = 1e-12);
    }

    #[test]
    fn permutations_are_reproducible() {
        let w = ring(15);
        let x = Array1::from_iter((0..15).map(|i| ((i * 7) % 5) as f64));
        let a = moran(x.view(), &w, &config(99)).unwrap();
        let b = moran(x.view(), &w, &config(99)).unwrap();
        assert_eq!(a.permutation, b.permutation);
    }

    #[test]
    fn shape_and_missing_checks() {
        let w = ring(5);
        assert!(matches!(moran(array![1.0, 2.0].view(), &w, &config(0)), Err(SpatialError::InvalidInput { .. })));
        let x = array![1.0, f64::NAN, 2.0, 3.0, 4.0];
        match moran(x.view(), &w, &config(0)) {
            Err(SpatialError::MissingData { units, .. }) => assert_eq!(units, vec!["u1"]),
            other => panic!("expected missing data, got {other:?}"),
        }
    }
}
