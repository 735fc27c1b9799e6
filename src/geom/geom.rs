use geo::{Area, BoundingRect, Centroid, Coord, CoordsIter, MultiPolygon};
use rstar::{RTree, AABB};

use crate::error::{Result, SpatialError, Stage};
use crate::geom::{BoundingBox, Segment};

/// Unit polygons with their ids, centroids and an R-tree over bounding boxes.
#[derive(Debug, Clone)]
pub struct Geometries {
    ids: Vec<String>,
    shapes: Vec<MultiPolygon<f64>>,
    centroids: Vec<Coord<f64>>,
    rtree: RTree<BoundingBox>,
}

impl Geometries {
    /// Construct from parallel id, shape and optional centroid lists. A missing
    /// centroid is derived from the polygon; degenerate shapes get NaN and are
    /// reported by [`Geometries::validate`].
    pub fn new(ids: Vec<String>, shapes: Vec<MultiPolygon<f64>>, centroids: Vec<Option<Coord<f64>>>) -> Result<Self> {
        if ids.len() != shapes.len() || ids.len() != centroids.len() {
            return Err(SpatialError::invalid(Stage::Graph, format!(
                "ids ({}), shapes ({}) and centroids ({}) must have equal length",
                ids.len(), shapes.len(), centroids.len(),
            )));
        }

        let centroids = shapes.iter().zip(centroids)
            .map(|(shape, given)| given.unwrap_or_else(|| shape.centroid()
                .map(|p| p.0)
                .unwrap_or(Coord { x: f64::NAN, y: f64::NAN })))
            .collect();

        Ok(Self {
            rtree: RTree::bulk_load(
                shapes.iter().enumerate()
                    .filter_map(|(i, shape)| shape.bounding_rect().map(|rect| BoundingBox::new(i, rect)))
                    .collect()
            ),
            ids,
            shapes,
            centroids,
        })
    }

    #[inline] pub fn len(&self) -> usize { self.shapes.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.shapes.is_empty() }

    #[inline] pub fn ids(&self) -> &[String] { &self.ids }

    #[inline] pub fn shapes(&self) -> &[MultiPolygon<f64>] { &self.shapes }

    #[inline] pub fn centroids(&self) -> &[Coord<f64>] { &self.centroids }

    /// Check every unit and report all malformed ones at once.
    pub fn validate(&self) -> Result<()> {
        let mut bad = Vec::new();
        let mut reasons = Vec::new();
        for (i, shape) in self.shapes.iter().enumerate() {
            if let Some(reason) = malformed(shape) {
                bad.push(self.ids[i].clone());
                if !reasons.contains(&reason) { reasons.push(reason) }
            }
        }
        if bad.is_empty() {
            return Ok(());
        }
        Err(SpatialError::Geometry { stage: Stage::Graph, units: bad, reason: reasons.join("; ") })
    }

    /// Query the R-tree for units whose bounding box meets the envelope.
    #[inline]
    pub(crate) fn query(&self, envelope: &AABB<[f64; 2]>) -> impl Iterator<Item = usize> + '_ {
        self.rtree.locate_in_envelope_intersecting(envelope).map(|bbox| bbox.idx())
    }

    /// Bounding box of unit `i` grown by `pad`, if the unit has any coordinates.
    pub(crate) fn padded_envelope(&self, i: usize, pad: f64) -> Option<AABB<[f64; 2]>> {
        let rect = self.shapes[i].bounding_rect()?;
        Some(AABB::from_corners(
            [rect.min().x - pad, rect.min().y - pad],
            [rect.max().x + pad, rect.max().y + pad],
        ))
    }

    /// Boundary segments of every ring (exterior and holes) of unit `i`.
    pub(crate) fn segments(&self, i: usize) -> Vec<Segment> {
        self.shapes[i].iter()
            .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
            .flat_map(|ring| ring.lines())
            .map(|line| Segment::new(i as u32, line.start, line.end))
            .collect()
    }
}

/// Describe why a shape is unusable, if it is.
fn malformed(shape: &MultiPolygon<f64>) -> Option<&'static str> {
    if shape.0.is_empty() {
        return Some("no polygons");
    }
    let short_ring = shape.iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .any(|ring| ring.0.len() < 4);
    if short_ring {
        return Some("ring with fewer than 4 coordinates");
    }
    if shape.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Some("non-finite coordinates");
    }
    if shape.unsigned_area() <= 0.0 {
        return Some("zero area");
    }
    None
}
