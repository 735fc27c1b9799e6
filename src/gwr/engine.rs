use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::Serialize;

use crate::data::{Design, RegressionSpec};
use crate::error::{Result, SpatialError, Stage};
use crate::gwr::{Bandwidth, BandwidthSelection, KernelWeighter};
use crate::linalg::spd_inverse;

/// Local regression at one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_values: Vec<f64>,
    /// 1 − weighted RSS / weighted TSS.
    pub local_r2: f64,
    /// Diagonal hat-matrix entry S_ii.
    pub leverage: f64,
    /// Σ_j S_ij², this unit's contribution to tr(SᵗS).
    pub hat_row_ss: f64,
    pub fitted: f64,
    pub residual: f64,
    /// Distance bandwidth used at this unit.
    pub local_bandwidth: f64,
}

/// Run-level diagnostics over the units whose local fit succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GwrDiagnostics {
    pub n: usize,
    pub n_used: usize,
    pub failed: Vec<String>,
    pub rss: f64,
    pub trace_s: f64,
    pub trace_sts: f64,
    /// n − 2tr(S) + tr(SᵗS).
    pub effective_df: f64,
    pub sigma2: f64,
    pub aicc: f64,
    pub aic: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
}

/// A fitted GWR surface. Units whose local system was ill-conditioned carry
/// their error and are excluded from the diagnostics.
#[derive(Debug, Clone)]
pub struct GwrResult {
    pub spec: RegressionSpec,
    pub names: Vec<String>,
    pub ids: Vec<String>,
    pub bandwidth: Bandwidth,
    pub selection: Option<BandwidthSelection>,
    pub fits: Vec<Result<LocalFit>>,
    pub diagnostics: GwrDiagnostics,
}

/// Pieces of one local weighted least-squares solve.
struct LocalSystem {
    beta: Array1<f64>,
    /// (XᵗWX)⁻¹XᵗW, p × n.
    projection: Array2<f64>,
}

/// Per-unit weighted least squares over a kernel neighborhood.
pub struct LocalRegressionEngine<'a> {
    design: &'a Design,
    ids: &'a [String],
    weighter: KernelWeighter<'a>,
    condition_threshold: f64,
}

impl<'a> LocalRegressionEngine<'a> {
    pub fn new(design: &'a Design, ids: &'a [String], weighter: KernelWeighter<'a>, condition_threshold: f64) -> Result<Self> {
        if design.n() != ids.len() || weighter.len() != ids.len() {
            return Err(SpatialError::invalid(Stage::Gwr, format!(
                "design has {} rows, {} ids, {} centroids", design.n(), ids.len(), weighter.len(),
            )));
        }
        Ok(Self { design, ids, weighter, condition_threshold })
    }

    #[inline] pub fn n(&self) -> usize { self.design.n() }

    #[inline] pub(crate) fn design(&self) -> &Design { self.design }

    fn solve(&self, unit: usize, weights: &[f64]) -> Result<LocalSystem> {
        let w = Array1::from(weights.to_vec());
        let xtw = &self.design.x.t() * &w.view().insert_axis(Axis(0));
        let xtwx = xtw.dot(&self.design.x);
        let inv = spd_inverse(&xtwx, self.condition_threshold, Stage::Gwr, &self.ids[unit])?;
        let projection = inv.dot(&xtw);
        let beta = projection.dot(&self.design.y);
        Ok(LocalSystem { beta, projection })
    }

    /// Leave-one-out prediction at `unit` (its own weight set to zero).
    pub(crate) fn loo_prediction(&self, unit: usize, bandwidth: Bandwidth) -> Result<f64> {
        let mut weights = self.weighter.weights(unit, bandwidth)?;
        weights[unit] = 0.0;
        let system = self.solve(unit, &weights)?;
        Ok(self.design.x.row(unit).dot(&system.beta))
    }

    /// Local fit at one unit, before σ²-dependent inference.
    fn fit_unit(&self, unit: usize, bandwidth: Bandwidth) -> Result<(LocalFit, Array1<f64>)> {
        let distances = self.weighter.distances(unit);
        let local_bandwidth = self.weighter.local_bandwidth(unit, &distances, bandwidth)?;
        let weights = self.weighter.weights_from(unit, &distances, bandwidth)?;
        let system = self.solve(unit, &weights)?;

        let x = &self.design.x;
        let y = &self.design.y;
        let xi = x.row(unit);
        let hat_row = xi.dot(&system.projection);
        let fitted = xi.dot(&system.beta);

        let local = x.dot(&system.beta);
        let wsum = weights.iter().sum::<f64>();
        let ybar = weights.iter().zip(y.iter()).map(|(w, v)| w * v).sum::<f64>() / wsum;
        let (wrss, wtss) = weights.iter().zip(y.iter()).zip(local.iter())
            .fold((0.0, 0.0), |(rss, tss), ((w, v), f)| (rss + w * (v - f).powi(2), tss + w * (v - ybar).powi(2)));

        // diag(CCᵗ) scales σ² into coefficient variances.
        let variance_factors = system.projection.map_axis(Axis(1), |row| row.dot(&row));

        let fit = LocalFit {
            coefficients: system.beta.to_vec(),
            std_errors: Vec::new(),
            t_values: Vec::new(),
            local_r2: if wtss > 0.0 { 1.0 - wrss / wtss } else { f64::NAN },
            leverage: hat_row[unit],
            hat_row_ss: hat_row.dot(&hat_row),
            fitted,
            residual: y[unit] - fitted,
            local_bandwidth,
        };
        Ok((fit, variance_factors))
    }

    /// Fit every unit in parallel and compute run diagnostics.
    pub fn fit(&self, bandwidth: Bandwidth) -> Result<(Vec<Result<LocalFit>>, GwrDiagnostics)> {
        bandwidth.validate()?;
        let raw = (0..self.n()).into_par_iter()
            .map(|i| self.fit_unit(i, bandwidth))
            .collect::<Vec<_>>();

        let failed = raw.iter().enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| self.ids[i].clone())
            .collect::<Vec<_>>();
        let ok = raw.iter().enumerate()
            .filter_map(|(i, r)| r.as_ref().ok().map(|(fit, _)| (i, fit)))
            .collect::<Vec<_>>();
        if ok.is_empty() {
            return Err(SpatialError::singular(Stage::Gwr, format!("every local system at bandwidth {bandwidth:?}"), f64::INFINITY));
        }
        if !failed.is_empty() {
            warn!("[gwr::fit] {} of {} local fits failed: {}", failed.len(), self.n(), failed.join(", "));
        }

        let n_used = ok.len();
        let n = n_used as f64;
        let rss = ok.iter().map(|(_, f)| f.residual * f.residual).sum::<f64>();
        let trace_s = ok.iter().map(|(_, f)| f.leverage).sum::<f64>();
        let trace_sts = ok.iter().map(|(_, f)| f.hat_row_ss).sum::<f64>();
        let effective_df = n - 2.0 * trace_s + trace_sts;
        let sigma2 = rss / effective_df;
        let sigma_ml = (rss / n).sqrt();
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let aicc = 2.0 * n * sigma_ml.ln() + n * ln_2pi + n * (n + trace_s) / (n - 2.0 - trace_s);
        let aic = 2.0 * n * sigma_ml.ln() + n * ln_2pi + n + trace_s;
        let ybar = ok.iter().map(|(i, _)| self.design.y[*i]).sum::<f64>() / n;
        let tss = ok.iter().map(|(i, _)| (self.design.y[*i] - ybar).powi(2)).sum::<f64>();
        let r_squared = 1.0 - rss / tss;
        let adj_r_squared = 1.0 - (1.0 - r_squared) * (n - 1.0) / (effective_df - 1.0);

        let fits = raw.into_iter()
            .map(|r| r.map(|(mut fit, factors)| {
                fit.std_errors = factors.iter().map(|f| (sigma2 * f).sqrt()).collect();
                fit.t_values = fit.coefficients.iter().zip(&fit.std_errors).map(|(b, se)| b / se).collect();
                fit
            }))
            .collect::<Vec<_>>();

        let diagnostics = GwrDiagnostics {
            n: self.n(),
            n_used,
            failed,
            rss,
            trace_s,
            trace_sts,
            effective_df,
            sigma2,
            aicc,
            aic,
            r_squared,
            adj_r_squared,
        };
        info!(
            "[gwr::fit] bandwidth {:?}: {} of {} units, tr(S) = {:.3}, AICc = {:.4}, R² = {:.4}",
            bandwidth, diagnostics.n_used, diagnostics.n, trace_s, aicc, r_squared,
        );
        Ok((fits, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::DistanceMetric;
    use crate::gwr::Kernel;
    use approx::assert_relative_eq;
    use geo::Coord;
    use ndarray::Array2;

    /// Units on a line with y = 1 + 2x exactly.
    fn linear(n: usize) -> (Design, Vec<String>, Vec<Coord<f64>>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else { (i as f64 * 0.37).sin() * 3.0 });
        let y = x.column(1).mapv(|v| 1.0 + 2.0 * v);
        let ids = (0..n).map(|i| format!("u{i}")).collect();
        let centroids = (0..n).map(|i| Coord { x: i as f64, y: 0.0 }).collect();
        (Design { x, y, names: vec!["(Intercept)".into(), "x".into()] }, ids, centroids)
    }

    #[test]
    fn exact_linear_data_is_recovered_everywhere() {
        let (design, ids, centroids) = linear(20);
        let weighter = KernelWeighter::new(&centroids, Kernel::Gaussian, DistanceMetric::Planar);
        let engine = LocalRegressionEngine::new(&design, &ids, weighter, 1e10).unwrap();
        let (fits, diag) = engine.fit(Bandwidth::Fixed(3.0)).unwrap();
        for fit in fits.iter().map(|f| f.as_ref().unwrap()) {
            assert_relative_eq!(fit.coefficients[0], 1.0, epsilon = 1e-8);
            assert_relative_eq!(fit.coefficients[1], 2.0, epsilon = 1e-8);
            assert!(fit.residual.abs() < 1e-8);
            assert!(fit.leverage > 0.0 && fit.leverage <= 1.0);
        }
        assert_eq!(diag.n_used, 20);
        assert!(diag.trace_s > 2.0 - 1e-9);
        assert!(diag.rss < 1e-12);
    }

    #[test]
    fn ill_conditioned_units_are_isolated() {
        // x is constant in the first half, so tight bisquare windows there are singular.
        let n = 20;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else if i < 10 { 1.0 } else { i as f64 });
        let y = Array1::from_iter((0..n).map(|i| i as f64 * 0.5 + (i % 3) as f64));
        let design = Design { x, y, names: vec!["(Intercept)".into(), "x".into()] };
        let ids = (0..n).map(|i| format!("u{i}")).collect::<Vec<_>>();
        let centroids = (0..n).map(|i| Coord { x: i as f64, y: 0.0 }).collect::<Vec<_>>();
        let weighter = KernelWeighter::new(&centroids, Kernel::Bisquare, DistanceMetric::Planar);
        let engine = LocalRegressionEngine::new(&design, &ids, weighter, 1e10).unwrap();

        let (fits, diag) = engine.fit(Bandwidth::Adaptive(4)).unwrap();
        match &fits[0] {
            Err(SpatialError::SingularMatrix { stage, context, .. }) => {
                assert_eq!(*stage, Stage::Gwr);
                assert_eq!(context, "u0");
            }
            other => panic!("expected singular unit, got {other:?}"),
        }
        assert!(fits[19].is_ok());
        assert!(diag.failed.contains(&"u0".to_string()));
        assert_eq!(diag.n_used + diag.failed.len(), n);
        assert!(diag.rss.is_finite());
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let (design, ids, centroids) = linear(5);
        let weighter = KernelWeighter::new(&centroids[..4], Kernel::Gaussian, DistanceMetric::Planar);
        assert!(LocalRegressionEngine::new(&design, &ids, weighter, 1e10).is_err());
    }
}
