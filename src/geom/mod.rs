mod bbox;
mod distance;
mod geom;
mod segment;

use bbox::BoundingBox;
pub use distance::DistanceMetric;
pub use geom::Geometries;
pub(crate) use segment::Segment;
