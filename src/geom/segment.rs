use geo::{Coord, Distance, Euclidean, Length, Line};
use rstar::{RTreeObject, AABB};

/// One edge of a unit's polygon boundary, tagged with the unit index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Segment {
    unit: u32,
    line: Line<f64>,
}

impl Segment {
    #[inline]
    pub(crate) fn new(unit: u32, a: Coord<f64>, b: Coord<f64>) -> Self { Self { unit, line: Line::new(a, b) } }

    #[inline] pub(crate) fn unit(&self) -> usize { self.unit as usize }

    #[inline] pub(crate) fn length(&self) -> f64 { Euclidean.length(&self.line) }

    /// Envelope of the segment grown by `pad` on every side.
    pub(crate) fn padded_envelope(&self, pad: f64) -> AABB<[f64; 2]> {
        let Line { start: a, end: b } = self.line;
        AABB::from_corners(
            [a.x.min(b.x) - pad, a.y.min(b.y) - pad],
            [a.x.max(b.x) + pad, a.y.max(b.y) + pad],
        )
    }

    /// Minimum Euclidean distance between two segments (zero if they cross or touch).
    #[inline]
    pub(crate) fn distance_to(&self, other: &Segment) -> f64 { Euclidean.distance(&self.line, &other.line) }

    /// Length of the shared run of `other` along this segment, counting `other`
    /// as collinear when both its endpoints lie within `tol` of this segment's
    /// supporting line. Returns zero for non-collinear or disjoint segments.
    pub(crate) fn collinear_overlap(&self, other: &Segment, tol: f64) -> f64 {
        let len = self.length();
        if len == 0.0 {
            return 0.0;
        }
        let dir = self.line.delta() / len;
        let offset = |p: Coord<f64>| p - self.line.start;
        // Perpendicular offset and position along the line, in units of `dir`.
        let across = |p: Coord<f64>| { let v = offset(p); (dir.x * v.y - dir.y * v.x).abs() };
        let along = |p: Coord<f64>| { let v = offset(p); dir.x * v.x + dir.y * v.y };
        if across(other.line.start) > tol || across(other.line.end) > tol {
            return 0.0;
        }
        let (t1, t2) = (along(other.line.start), along(other.line.end));
        let lo = t1.min(t2).max(0.0);
        let hi = t1.max(t2).min(len);
        (hi - lo).max(0.0)
    }
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope { self.padded_envelope(0.0) }
}
