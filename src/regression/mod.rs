mod impacts;
mod lag;
mod model;
mod ols;
mod optimize;
mod sac;

pub use impacts::{ImpactInterval, Impacts, PredictorImpact, TraceMethod};
pub use model::{fit_model, fit_models, Coefficient, GlobalModelResult, ModelKind, ModelType};

use lag::fit_lag;
use ols::fit_ols;
use sac::fit_sac;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImpactConfig, OptimizerConfig, RegressionConfig};
    use crate::data::{Dataset, RegressionSpec, SpatialUnit};
    use crate::error::SpatialError;
    use crate::weights::{SpatialWeightMatrix, WeightStyle};
    use approx::assert_relative_eq;
    use geo::{Coord, MultiPolygon, Rect};
    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// Row-standardized rook lattice on an m × m grid.
    fn lattice(m: usize) -> SpatialWeightMatrix {
        let ids = (0..m * m).map(|i| format!("c{i}")).collect();
        let rows = (0..m * m)
            .map(|i| {
                let (r, c) = (i / m, i % m);
                let mut nbrs = Vec::new();
                if r > 0 { nbrs.push(i - m) }
                if c > 0 { nbrs.push(i - 1) }
                if c + 1 < m { nbrs.push(i + 1) }
                if r + 1 < m { nbrs.push(i + m) }
                let k = nbrs.len() as f64;
                nbrs.into_iter().map(|j| (j as u32, 1.0 / k)).collect()
            })
            .collect::<Vec<Vec<(u32, f64)>>>();
        let sums = rows.iter().map(|r| r.len() as f64).collect();
        SpatialWeightMatrix::from_csr(ids, rows, WeightStyle::RowStandardized, false, sums)
    }

    /// y = (I − ρW)⁻¹(1 + 2a − b + ε) on the lattice.
    fn simulated(m: usize, rho: f64, seed: u64) -> (Dataset, SpatialWeightMatrix) {
        let w = lattice(m);
        let n = m * m;
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let a = (0..n).map(|_| noise.sample(&mut rng) * 2.0).collect::<Vec<_>>();
        let b = (0..n).map(|_| noise.sample(&mut rng) * 2.0).collect::<Vec<_>>();
        let rhs = DVector::from_iterator(n, (0..n).map(|i| 1.0 + 2.0 * a[i] - b[i] + noise.sample(&mut rng)));
        let y = (DMatrix::identity(n, n) - w.to_dense() * rho).lu().solve(&rhs).unwrap();

        let units = (0..n)
            .map(|i| {
                let (r, c) = ((i / m) as f64, (i % m) as f64);
                let cell = Rect::new(Coord { x: c, y: r }, Coord { x: c + 1.0, y: r + 1.0 }).to_polygon();
                SpatialUnit::new(format!("c{i}"), MultiPolygon(vec![cell]))
                    .with_value("a", a[i])
                    .with_value("b", b[i])
                    .with_value("y", y[i])
            })
            .collect();
        (Dataset::new(units).unwrap(), w)
    }

    fn config(models: Vec<ModelType>) -> RegressionConfig {
        RegressionConfig {
            models,
            weights: None,
            optimizer: OptimizerConfig { max_iterations: 500, tolerance: 1e-8 },
            impacts: ImpactConfig { draws: 100, seed: 3, confidence: 0.95, trace: TraceMethod::Exact },
        }
    }

    #[test]
    fn lag_recovers_rho() {
        let (data, w) = simulated(15, 0.6, 17);
        let spec = RegressionSpec::new("y", ["a", "b"]).unwrap();
        let fit = fit_model(&data, &spec, &w, ModelType::Lag, &config(vec![ModelType::Lag])).unwrap();

        let rho = fit.rho().unwrap();
        assert!((rho - 0.6).abs() < 0.15, "rho = {rho}");
        assert_relative_eq!(fit.coefficient("a").unwrap().estimate, 2.0, epsilon = 0.15);
        assert_relative_eq!(fit.coefficient("b").unwrap().estimate, -1.0, epsilon = 0.15);
        let ModelKind::Lag { rho: ref rho_coef } = fit.kind else { panic!("expected lag kind") };
        assert!(rho_coef.std_error > 0.0 && rho_coef.p_value < 0.01);

        let impacts = fit.impacts.as_ref().unwrap();
        for impact in &impacts.predictors {
            assert_relative_eq!(impact.direct + impact.indirect, impact.total, epsilon = 1e-12);
        }
        // Row-standardized W: total = β/(1 − ρ).
        let a = &impacts.predictors[0];
        assert_relative_eq!(a.total, fit.coefficient("a").unwrap().estimate / (1.0 - rho), epsilon = 1e-8);
    }

    #[test]
    fn lag_beats_ols_on_spatial_data() {
        let (data, w) = simulated(12, 0.5, 4);
        let spec = RegressionSpec::new("y", ["a", "b"]).unwrap();
        let results = fit_models(&data, &spec, &w, &config(vec![ModelType::Ols, ModelType::Lag, ModelType::Sac]));
        assert_eq!(results.len(), 3);
        let ols = results[0].as_ref().unwrap();
        let lag = results[1].as_ref().unwrap();
        let sac = results[2].as_ref().unwrap();
        assert!(lag.log_likelihood > ols.log_likelihood);
        // SAC nests LAG (λ = 0), so its likelihood cannot be lower.
        assert!(sac.log_likelihood >= lag.log_likelihood - 1e-6);
        assert!(sac.lambda().is_some());
        assert!(ols.impacts.is_none() && lag.impacts.is_some() && sac.impacts.is_some());
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let (data, _) = simulated(4, 0.2, 1);
        let other = lattice(3);
        let spec = RegressionSpec::new("y", ["a"]).unwrap();
        assert!(matches!(
            fit_model(&data, &spec, &other, ModelType::Lag, &config(vec![ModelType::Lag])),
            Err(SpatialError::InvalidInput { .. }),
        ));
    }

    #[test]
    fn failures_stay_per_model() {
        let (data, w) = simulated(5, 0.3, 2);
        let spec = RegressionSpec::new("y", ["missing"]).unwrap();
        let results = fit_models(&data, &spec, &w, &config(vec![ModelType::Ols, ModelType::Lag]));
        match (&results[0], &results[1]) {
            (Err(SpatialError::MissingData { stage: s0, .. }), Err(SpatialError::MissingData { stage: s1, .. })) => {
                assert_eq!(*s0, crate::error::Stage::Ols);
                assert_eq!(*s1, crate::error::Stage::Lag);
            }
            other => panic!("expected per-model missing data, got {other:?}"),
        }
    }
}
