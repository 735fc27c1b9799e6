use nalgebra::Cholesky;
use ndarray::{s, Array1, Array2};

use crate::config::RegressionConfig;
use crate::data::{Design, RegressionSpec};
use crate::error::{Result, SpatialError, Stage};
use crate::linalg::{to_dmatrix, to_dvector};
use crate::regression::impacts::compute_impacts;
use crate::regression::lag::estimate_rho;
use crate::regression::model::{asymptotic_covariance, likelihood_steps, logdet_curvature, r_squared, spatial_step, LagProjection};
use crate::regression::optimize::nelder_mead;
use crate::regression::{Coefficient, GlobalModelResult, ModelKind};
use crate::weights::{LogDet, SpatialWeightMatrix};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Initial simplex edge in ρ and λ.
const SIMPLEX_STEP: f64 = 0.05;

/// Spatially lagged pieces shared by every likelihood evaluation.
struct SacTerms<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    wx: Array2<f64>,
    wy: Array1<f64>,
    wwy: Array1<f64>,
}

impl<'a> SacTerms<'a> {
    fn new(design: &'a Design, w: &SpatialWeightMatrix) -> Self {
        let wy = w.lag(design.y.view());
        let wwy = w.lag(wy.view());
        let mut wx = Array2::zeros(design.x.raw_dim());
        for (k, column) in design.x.columns().into_iter().enumerate() {
            wx.column_mut(k).assign(&w.lag(column));
        }
        Self { x: &design.x, y: &design.y, wx, wy, wwy }
    }

    /// (I − λW)(I − ρW)y and (I − λW)X.
    fn filtered(&self, rho: f64, lambda: f64) -> (Array1<f64>, Array2<f64>) {
        let y = self.y - &(&self.wy * (rho + lambda)) + &(&self.wwy * (rho * lambda));
        let x = self.x - &(&self.wx * lambda);
        (y, x)
    }

    /// GLS coefficients and ML variance for fixed (ρ, λ).
    fn profile(&self, rho: f64, lambda: f64) -> Option<(Array1<f64>, f64)> {
        let (y, x) = self.filtered(rho, lambda);
        let chol = Cholesky::new(to_dmatrix(&x.t().dot(&x)))?;
        let beta = chol.solve(&to_dvector(&x.t().dot(&y)));
        let beta = Array1::from_iter(beta.iter().copied());
        let e = &y - &x.dot(&beta);
        Some((beta, e.dot(&e) / y.len() as f64))
    }
}

/// Lag model with autoregressive errors, by a Nelder–Mead search over the
/// concentrated likelihood started from the lag-model ρ.
pub(crate) fn fit_sac(spec: &RegressionSpec, design: &Design, w: &SpatialWeightMatrix, config: &RegressionConfig) -> Result<GlobalModelResult> {
    let context = spec.to_string();
    let (n, p) = (design.n(), design.p());
    let nf = n as f64;
    let terms = SacTerms::new(design, w);
    let logdet = LogDet::new(w);
    let bounds = logdet.bounds();
    let (lower, upper) = bounds;

    let projection = LagProjection::new(terms.x, terms.y, &terms.wy, Stage::Sac, &context)?;
    let start = estimate_rho(&projection, &logdet, config, Stage::Sac)?;

    let feasible = |v: f64| v > lower && v < upper;
    let objective = |theta: &[f64]| {
        let (rho, lambda) = (theta[0], theta[1]);
        if !(feasible(rho) && feasible(lambda)) {
            return f64::INFINITY;
        }
        match terms.profile(rho, lambda) {
            Some((_, sigma2)) => 0.5 * nf * sigma2.ln() - logdet.eval(rho) - logdet.eval(lambda),
            None => f64::INFINITY,
        }
    };
    let toward_interior = |v: f64| if v + SIMPLEX_STEP < upper { SIMPLEX_STEP } else { -SIMPLEX_STEP };
    let minimum = nelder_mead(
        objective,
        &[start.rho, 0.0],
        &[toward_interior(start.rho), toward_interior(0.0)],
        &config.optimizer,
        Stage::Sac,
    )?;
    let (rho, lambda) = (minimum.x[0], minimum.x[1]);
    let (beta, sigma2) = terms.profile(rho, lambda)
        .ok_or_else(|| SpatialError::singular(Stage::Sac, context.clone(), f64::INFINITY))?;
    let log_likelihood = -0.5 * nf * (LN_2PI + sigma2.ln()) - 0.5 * nf + logdet.eval(rho) + logdet.eval(lambda);

    // θ = (β, ρ, λ, σ²).
    let smooth = |theta: &[f64]| {
        let b = Array1::from(theta[..p].to_vec());
        let (r, l, s2) = (theta[p], theta[p + 1], theta[p + 2]);
        let u = terms.y - &(&terms.wy * r) - terms.x.dot(&b);
        let e = &u - &(w.lag(u.view()) * l);
        -0.5 * nf * (LN_2PI + s2.ln()) - e.dot(&e) / (2.0 * s2)
    };
    let (rho_step, lambda_step) = (spatial_step(rho, bounds), spatial_step(lambda, bounds));
    let theta = beta.iter().copied().chain([rho, lambda, sigma2]).collect::<Vec<_>>();
    let covariance = asymptotic_covariance(
        smooth,
        &theta,
        &likelihood_steps(&beta, &[rho_step, lambda_step], sigma2),
        &[
            (p, logdet_curvature(&logdet, rho, rho_step)),
            (p + 1, logdet_curvature(&logdet, lambda, lambda_step)),
        ],
        Stage::Sac,
    )?;
    let se = |k: usize| covariance[[k, k]].sqrt();

    let coefficients = design.names.iter().enumerate()
        .map(|(k, name)| Coefficient::normal(name, beta[k], se(k)))
        .collect::<Vec<_>>();
    let fitted = &terms.wy * rho + terms.x.dot(&beta);

    // Impacts depend on (β, ρ) only.
    let impacts = compute_impacts(
        &design.names,
        &beta,
        covariance.slice(s![..=p, ..=p]),
        rho,
        bounds,
        w,
        &config.impacts,
    )?;

    Ok(GlobalModelResult {
        spec: spec.clone(),
        kind: ModelKind::Sac {
            rho: Coefficient::normal("rho", rho, se(p)),
            lambda: Coefficient::normal("lambda", lambda, se(p + 1)),
        },
        coefficients,
        sigma2,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * (p + 3) as f64,
        n,
        r_squared: r_squared(terms.y, &fitted),
        iterations: start.iterations + minimum.iterations,
        impacts: Some(impacts),
    })
}
