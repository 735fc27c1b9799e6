use geo::{Coord, Distance, Euclidean, Haversine, Point};
use serde::{Deserialize, Serialize};

/// How distances between unit centroids are measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance in the coordinate units of the geometries.
    Planar,
    /// Haversine distance in kilometres; coordinates are lon/lat degrees.
    GreatCircle,
}

impl DistanceMetric {
    /// Distance between two coordinates under this metric.
    #[inline]
    pub fn distance(&self, a: Coord<f64>, b: Coord<f64>) -> f64 {
        match self {
            DistanceMetric::Planar => Euclidean.distance(a, b),
            DistanceMetric::GreatCircle => Haversine.distance(Point::from(a), Point::from(b)) / 1000.0,
        }
    }

    /// Distances from `focal` to every coordinate in `points`.
    pub fn distances_from(&self, focal: Coord<f64>, points: &[Coord<f64>]) -> Vec<f64> {
        points.iter().map(|&p| self.distance(focal, p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_is_euclidean() {
        let d = DistanceMetric::Planar.distance(Coord { x: 0.0, y: 0.0 }, Coord { x: 3.0, y: 4.0 });
        assert_eq!(d, 5.0);
    }

    #[test]
    fn great_circle_quarter_meridian() {
        // Equator to pole along a meridian is a quarter of the circumference.
        let d = DistanceMetric::GreatCircle.distance(Coord { x: 10.0, y: 0.0 }, Coord { x: 10.0, y: 90.0 });
        let expected = std::f64::consts::PI * Haversine.radius() / 2000.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn great_circle_is_symmetric_and_zero_on_diagonal() {
        let a = Coord { x: -87.6, y: 41.9 };
        let b = Coord { x: -118.2, y: 34.1 };
        let m = DistanceMetric::GreatCircle;
        assert_eq!(m.distance(a, a), 0.0);
        assert!((m.distance(a, b) - m.distance(b, a)).abs() < 1e-9);
        // Chicago to Los Angeles is roughly 2800 km.
        assert!((m.distance(a, b) - 2800.0).abs() < 50.0);
    }
}
