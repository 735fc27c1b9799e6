use ndarray::{Array1, Axis};

use crate::data::{Design, RegressionSpec};
use crate::error::{Result, SpatialError, Stage};
use crate::linalg::spd_inverse;
use crate::regression::model::CONDITION_LIMIT;
use crate::regression::{Coefficient, GlobalModelResult, ModelKind};

/// Ordinary least squares, weighted by ω when given.
pub(crate) fn fit_ols(spec: &RegressionSpec, design: &Design, weights: Option<&Array1<f64>>) -> Result<GlobalModelResult> {
    let (n, p) = (design.n(), design.p());
    let omega = match weights {
        Some(w) if w.len() != n => {
            return Err(SpatialError::invalid(Stage::Ols, format!("{} weights for {n} units", w.len())));
        }
        Some(w) => {
            if let Some(v) = w.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(SpatialError::invalid(Stage::Ols, format!("regression weights must be positive and finite, got {v}")));
            }
            w.clone()
        }
        None => Array1::ones(n),
    };

    let (x, y) = (&design.x, &design.y);
    let xtw = &x.t() * &omega.view().insert_axis(Axis(0));
    let inv = spd_inverse(&xtw.dot(x), CONDITION_LIMIT, Stage::Ols, &spec.to_string())?;
    let beta = inv.dot(&xtw.dot(y));

    let residuals = y - &x.dot(&beta);
    let rss = (&residuals * &residuals * &omega).sum();
    let df = (n - p) as f64;
    let sigma2 = rss / df;

    let coefficients = design.names.iter().enumerate()
        .map(|(k, name)| Coefficient::student(name, beta[k], (sigma2 * inv[[k, k]]).sqrt(), df))
        .collect();

    let wsum = omega.sum();
    let ybar = (&omega * y).sum() / wsum;
    let tss = (&omega * &y.mapv(|v| (v - ybar).powi(2))).sum();

    let nf = n as f64;
    let log_likelihood = -0.5 * nf * ((2.0 * std::f64::consts::PI).ln() + (rss / nf).ln() + 1.0)
        + 0.5 * omega.mapv(f64::ln).sum();

    Ok(GlobalModelResult {
        spec: spec.clone(),
        kind: ModelKind::Ols,
        coefficients,
        sigma2,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * (p + 1) as f64,
        n,
        r_squared: 1.0 - rss / tss,
        iterations: 0,
        impacts: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn design() -> Design {
        let xs = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let noise = array![0.1, -0.2, 0.05, 0.15, -0.1, 0.0];
        let x = Array2::from_shape_fn((6, 2), |(i, j)| if j == 0 { 1.0 } else { xs[i] });
        let y = xs.mapv(|v| 1.5 + 0.8 * v) + noise;
        Design { x, y, names: vec!["(Intercept)".into(), "x".into()] }
    }

    #[test]
    fn matches_closed_form_simple_regression() {
        let d = design();
        let spec = RegressionSpec::new("y", ["x"]).unwrap();
        let fit = fit_ols(&spec, &d, None).unwrap();

        let xs = d.x.column(1).to_owned();
        let (xm, ym) = (xs.mean().unwrap(), d.y.mean().unwrap());
        let sxy = ((&xs - xm) * (&d.y - ym)).sum();
        let sxx = (&xs - xm).mapv(|v| v * v).sum();
        let slope = sxy / sxx;
        assert_relative_eq!(fit.coefficients[1].estimate, slope, epsilon = 1e-10);
        assert_relative_eq!(fit.coefficients[0].estimate, ym - slope * xm, epsilon = 1e-10);

        let resid = &d.y - &d.x.dot(&array![fit.coefficients[0].estimate, slope]);
        let s2 = resid.mapv(|v| v * v).sum() / 4.0;
        assert_relative_eq!(fit.sigma2, s2, epsilon = 1e-12);
        assert_relative_eq!(fit.coefficients[1].std_error, (s2 / sxx).sqrt(), epsilon = 1e-10);
        assert!(fit.coefficients[1].p_value < 1e-3);
        assert!(fit.r_squared > 0.95);
        assert_eq!(fit.rho(), None);
        assert!(fit.impacts.is_none());
    }

    #[test]
    fn unit_weights_match_unweighted_fit() {
        let d = design();
        let spec = RegressionSpec::new("y", ["x"]).unwrap();
        let plain = fit_ols(&spec, &d, None).unwrap();
        let weighted = fit_ols(&spec, &d, Some(&Array1::ones(6))).unwrap();
        assert_relative_eq!(plain.log_likelihood, weighted.log_likelihood, epsilon = 1e-12);

        let doubled = fit_ols(&spec, &d, Some(&Array1::from_elem(6, 2.0))).unwrap();
        assert_relative_eq!(doubled.coefficients[1].estimate, plain.coefficients[1].estimate, epsilon = 1e-10);
    }

    #[test]
    fn collinear_design_is_singular() {
        let mut d = design();
        d.x = Array2::from_shape_fn((6, 3), |(i, j)| match j { 0 => 1.0, _ => (i + 1) as f64 });
        d.names.push("x2".into());
        let spec = RegressionSpec::new("y", ["x", "x2"]).unwrap();
        assert!(matches!(fit_ols(&spec, &d, None), Err(SpatialError::SingularMatrix { stage: Stage::Ols, .. })));
    }

    #[test]
    fn non_positive_weights_are_rejected() {
        let d = design();
        let spec = RegressionSpec::new("y", ["x"]).unwrap();
        let w = array![1.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        assert!(matches!(fit_ols(&spec, &d, Some(&w)), Err(SpatialError::InvalidInput { .. })));
    }
}
