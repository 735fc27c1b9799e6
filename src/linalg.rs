//! Conversions between ndarray storage and nalgebra decompositions.

use nalgebra::{Cholesky, DMatrix, DVector, SVD};
use ndarray::{Array1, Array2};

use crate::error::{Result, SpatialError, Stage};

pub(crate) fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |r, c| a[[r, c]])
}

pub(crate) fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(r, c)| m[(r, c)])
}

pub(crate) fn to_dvector(v: &Array1<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}

/// Ratio of the largest to the smallest singular value (infinite when rank deficient).
pub(crate) fn condition_number(m: &DMatrix<f64>) -> f64 {
    let sv = SVD::new(m.clone(), false, false).singular_values;
    let max = sv.iter().copied().fold(0.0, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    if min > 0.0 && max.is_finite() { max / min } else { f64::INFINITY }
}

/// Cholesky factor of a symmetric positive definite matrix whose condition
/// number stays below `threshold`.
pub(crate) fn spd_factor(a: &Array2<f64>, threshold: f64, stage: Stage, context: &str) -> Result<Cholesky<f64, nalgebra::Dyn>> {
    let m = to_dmatrix(a);
    let condition = condition_number(&m);
    if !(condition <= threshold) {
        return Err(SpatialError::singular(stage, context, condition));
    }
    Cholesky::new(m).ok_or_else(|| SpatialError::singular(stage, context, condition))
}

/// Inverse of a well-conditioned symmetric positive definite matrix.
pub(crate) fn spd_inverse(a: &Array2<f64>, threshold: f64, stage: Stage, context: &str) -> Result<Array2<f64>> {
    Ok(to_array2(&spd_factor(a, threshold, stage, context)?.inverse()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn inverse_of_spd_matrix() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let inv = spd_inverse(&a, 1e12, Stage::Ols, "test").unwrap();
        let eye = a.dot(&inv);
        assert_relative_eq!(eye[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(eye[[0, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        match spd_inverse(&a, 1e12, Stage::Gwr, "u7") {
            Err(SpatialError::SingularMatrix { stage, context, .. }) => {
                assert_eq!(stage, Stage::Gwr);
                assert_eq!(context, "u7");
            }
            other => panic!("expected singular matrix, got {other:?}"),
        }
    }

    #[test]
    fn condition_number_of_diagonal() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 0.1]));
        assert_relative_eq!(condition_number(&m), 100.0, epsilon = 1e-9);
    }
}
