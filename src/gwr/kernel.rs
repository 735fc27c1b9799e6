use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError, Stage};
use crate::geom::DistanceMetric;

/// Distance-decay kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// exp(−½(d/h)²), positive everywhere.
    Gaussian,
    /// (1 − (d/h)²)² inside the bandwidth, zero outside.
    Bisquare,
}

impl Kernel {
    /// Weight at distance `d` for bandwidth `h`. A zero bandwidth keeps only
    /// coincident points.
    #[inline]
    pub fn weight(&self, d: f64, h: f64) -> f64 {
        if h <= 0.0 {
            return if d == 0.0 { 1.0 } else { 0.0 };
        }
        let u = d / h;
        match self {
            Kernel::Gaussian => (-0.5 * u * u).exp(),
            Kernel::Bisquare if u < 1.0 => (1.0 - u * u).powi(2),
            Kernel::Bisquare => 0.0,
        }
    }
}

/// Kernel bandwidth: a distance, or a neighbor count whose k-th nearest
/// distance sets the local distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    Fixed(f64),
    Adaptive(usize),
}

impl Bandwidth {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Bandwidth::Fixed(h) if !(h.is_finite() && h > 0.0) => {
                Err(SpatialError::invalid(Stage::Kernel, format!("fixed bandwidth must be positive, got {h}")))
            }
            Bandwidth::Adaptive(0) => Err(SpatialError::invalid(Stage::Kernel, "adaptive bandwidth needs k >= 1")),
            _ => Ok(()),
        }
    }

    /// Numeric value: the distance, or k.
    pub fn value(&self) -> f64 {
        match *self {
            Bandwidth::Fixed(h) => h,
            Bandwidth::Adaptive(k) => k as f64,
        }
    }
}

/// Produces per-unit kernel weights around a focal unit.
#[derive(Debug, Clone, Copy)]
pub struct KernelWeighter<'a> {
    centroids: &'a [Coord<f64>],
    kernel: Kernel,
    metric: DistanceMetric,
}

impl<'a> KernelWeighter<'a> {
    pub fn new(centroids: &'a [Coord<f64>], kernel: Kernel, metric: DistanceMetric) -> Self {
        Self { centroids, kernel, metric }
    }

    #[inline] pub fn len(&self) -> usize { self.centroids.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.centroids.is_empty() }

    #[inline] pub fn kernel(&self) -> Kernel { self.kernel }

    /// Distances from the focal unit to every unit.
    pub fn distances(&self, focal: usize) -> Vec<f64> {
        self.metric.distances_from(self.centroids[focal], self.centroids)
    }

    /// Local distance bandwidth at the focal unit.
    pub fn local_bandwidth(&self, focal: usize, distances: &[f64], bandwidth: Bandwidth) -> Result<f64> {
        match bandwidth {
            Bandwidth::Fixed(h) => Ok(h),
            Bandwidth::Adaptive(k) => {
                let mut others = distances.iter().enumerate()
                    .filter(|&(j, _)| j != focal)
                    .map(|(_, &d)| d)
                    .collect::<Vec<_>>();
                if k == 0 || k > others.len() {
                    return Err(SpatialError::invalid(Stage::Kernel, format!(
                        "adaptive bandwidth k = {k} needs 1..={} neighbors", others.len(),
                    )));
                }
                let (_, kth, _) = others.select_nth_unstable_by(k - 1, f64::total_cmp);
                Ok(*kth)
            }
        }
    }

    /// Kernel weights around the focal unit; the focal unit always gets 1.
    pub fn weights(&self, focal: usize, bandwidth: Bandwidth) -> Result<Vec<f64>> {
        let distances = self.distances(focal);
        self.weights_from(focal, &distances, bandwidth)
    }

    pub(crate) fn weights_from(&self, focal: usize, distances: &[f64], bandwidth: Bandwidth) -> Result<Vec<f64>> {
        let h = self.local_bandwidth(focal, distances, bandwidth)?;
        let mut weights = distances.iter().map(|&d| self.kernel.weight(d, h)).collect::<Vec<_>>();
        weights[focal] = 1.0;
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(n: usize) -> Vec<Coord<f64>> { (0..n).map(|i| Coord { x: i as f64, y: 0.0 }).collect() }

    #[test]
    fn gaussian_and_bisquare_shapes() {
        assert_relative_eq!(Kernel::Gaussian.weight(1.0, 1.0), (-0.5f64).exp());
        assert_relative_eq!(Kernel::Bisquare.weight(0.5, 1.0), 0.5625);
        assert_eq!(Kernel::Bisquare.weight(1.0, 1.0), 0.0);
        assert_eq!(Kernel::Bisquare.weight(2.0, 1.0), 0.0);
        assert!(Kernel::Gaussian.weight(50.0, 1.0) >= 0.0);
    }

    #[test]
    fn adaptive_bandwidth_is_kth_neighbor_distance() {
        let centroids = line(6);
        let weighter = KernelWeighter::new(&centroids, Kernel::Bisquare, DistanceMetric::Planar);
        let d = weighter.distances(0);
        assert_eq!(weighter.local_bandwidth(0, &d, Bandwidth::Adaptive(3)).unwrap(), 3.0);

        let w = weighter.weights(0, Bandwidth::Adaptive(3)).unwrap();
        assert_eq!(w[0], 1.0);
        assert_relative_eq!(w[1], (1.0 - 1.0 / 9.0f64).powi(2));
        assert_eq!(w[3], 0.0);
        assert_eq!(w[5], 0.0);
        assert!(weighter.weights(0, Bandwidth::Adaptive(6)).is_err());
    }

    #[test]
    fn zero_adaptive_bandwidth_keeps_coincident_units() {
        let centroids = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 }];
        let weighter = KernelWeighter::new(&centroids, Kernel::Gaussian, DistanceMetric::Planar);
        let w = weighter.weights(0, Bandwidth::Adaptive(1)).unwrap();
        assert_eq!(w, vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn bandwidth_validation() {
        assert!(Bandwidth::Fixed(0.0).validate().is_err());
        assert!(Bandwidth::Fixed(f64::NAN).validate().is_err());
        assert!(Bandwidth::Adaptive(0).validate().is_err());
        assert!(Bandwidth::Adaptive(4).validate().is_ok());
    }
}
