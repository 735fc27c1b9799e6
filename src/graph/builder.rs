use ahash::AHashMap;
use geo::Relate;
use log::{info, warn};
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::error::{Result, SpatialError, Stage};
use crate::geom::{DistanceMetric, Geometries, Segment};
use crate::graph::{AdjacencyGraph, NeighborSummary};

/// Smallest shared boundary length that makes two units rook neighbors.
const MIN_SHARED_LENGTH: f64 = 1e-9;

/// Rule deciding which units are neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContiguityRule {
    /// Boundaries share at least one point.
    Queen,
    /// Boundaries share an edge of positive length.
    Rook,
    /// The k nearest centroids.
    KNearest { k: usize },
    /// All centroids within a distance, inclusive.
    DistanceThreshold { distance: f64 },
}

type CentroidPoint = GeomWithData<[f64; 2], usize>;

/// Derives an [`AdjacencyGraph`] from unit geometries.
pub struct GraphBuilder<'a> {
    geometries: &'a Geometries,
    config: &'a GraphConfig,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(geometries: &'a Geometries, config: &'a GraphConfig) -> Self { Self { geometries, config } }

    /// Build the neighbor relation and its summary. Malformed geometries abort
    /// the build, listing every offending unit.
    pub fn build(&self) -> Result<(AdjacencyGraph, NeighborSummary)> {
        self.config.validate()?;
        self.geometries.validate()?;

        let tol = self.config.snap_tolerance;
        let rows = match self.config.rule {
            ContiguityRule::Queen if tol == 0.0 => self.relate(false)?,
            ContiguityRule::Rook if tol == 0.0 => self.relate(true)?,
            ContiguityRule::Queen => self.snapped(false),
            ContiguityRule::Rook => self.snapped(true),
            ContiguityRule::KNearest { k } => self.k_nearest(k)?,
            ContiguityRule::DistanceThreshold { distance } => self.within(distance)?,
        };

        let mut graph = AdjacencyGraph::from_neighbors(self.geometries.ids().to_vec(), rows)?;
        if self.config.symmetrize && !graph.is_symmetric() {
            graph = graph.symmetrized();
        }

        let summary = graph.summary();
        info!(
            "[graph::build] {:?}: {} units, {} links, neighbors mean {:.2} median {} min {} max {}, symmetric {}",
            self.config.rule, summary.n_units, summary.n_links, summary.mean,
            summary.median, summary.min, summary.max, summary.symmetric,
        );
        if !summary.isolates.is_empty() {
            warn!("[graph::build] {} isolate(s): {}", summary.isolates.len(), summary.isolates.join(", "));
        }
        Ok((graph, summary))
    }

    /// Exact contiguity from the DE-9IM relation of candidate pairs.
    /// Queen needs any shared point; rook needs touching boundaries whose
    /// boundary/boundary intersection is one-dimensional.
    fn relate(&self, rook: bool) -> Result<Vec<Vec<u32>>> {
        let shapes = self.geometries.shapes();
        let upper = (0..shapes.len()).into_par_iter()
            .map(|i| -> Result<Vec<usize>> {
                let Some(search) = self.geometries.padded_envelope(i, 0.0) else { return Ok(Vec::new()) };
                let mut found = Vec::new();
                for j in self.geometries.query(&search) {
                    if j <= i { continue } // check each unordered pair once

                    let im = shapes[i].relate(&shapes[j]);
                    let hit = if rook {
                        im.is_touches() && im.matches("****1****")
                            .map_err(|e| SpatialError::invalid(Stage::Graph, e.to_string()))?
                    } else {
                        im.is_intersects()
                    };
                    if hit { found.push(j) }
                }
                Ok(found)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(mirror(upper))
    }

    /// Tolerance-based contiguity over an R-tree of boundary segments.
    fn snapped(&self, rook: bool) -> Vec<Vec<u32>> {
        let tol = self.config.snap_tolerance;
        let n = self.geometries.len();
        let tree = RTree::bulk_load((0..n).flat_map(|i| self.geometries.segments(i)).collect::<Vec<Segment>>());
        let threshold = tol.max(MIN_SHARED_LENGTH);

        let upper: Vec<Vec<usize>> = (0..n).into_par_iter()
            .map(|i| {
                let mut shared: AHashMap<usize, f64> = AHashMap::new();
                for seg in self.geometries.segments(i) {
                    for other in tree.locate_in_envelope_intersecting(&seg.padded_envelope(tol)) {
                        let j = other.unit();
                        if j <= i { continue }
                        if rook {
                            *shared.entry(j).or_insert(0.0) += seg.collinear_overlap(other, tol);
                        } else if !shared.contains_key(&j) && seg.distance_to(other) <= tol {
                            shared.insert(j, 0.0);
                        }
                    }
                }
                shared.into_iter()
                    .filter(|&(_, len)| !rook || len > threshold)
                    .map(|(j, _)| j)
                    .collect::<Vec<_>>()
            })
            .collect();
        mirror(upper)
    }

    fn centroids(&self) -> Result<&[geo::Coord<f64>]> {
        let centroids = self.geometries.centroids();
        let bad = centroids.iter().enumerate()
            .filter(|(_, c)| !(c.x.is_finite() && c.y.is_finite()))
            .map(|(i, _)| self.geometries.ids()[i].clone())
            .collect::<Vec<_>>();
        if !bad.is_empty() {
            return Err(SpatialError::Geometry { stage: Stage::Graph, units: bad, reason: "non-finite centroid".into() });
        }
        Ok(centroids)
    }

    fn centroid_tree(centroids: &[geo::Coord<f64>]) -> RTree<CentroidPoint> {
        RTree::bulk_load(centroids.iter().enumerate().map(|(i, c)| CentroidPoint::new([c.x, c.y], i)).collect())
    }

    /// k nearest centroids per unit, ties broken by the lower index.
    fn k_nearest(&self, k: usize) -> Result<Vec<Vec<u32>>> {
        let n = self.geometries.len();
        if k >= n {
            return Err(SpatialError::invalid(Stage::Graph, format!("k = {k} must be smaller than the number of units ({n})")));
        }
        let centroids = self.centroids()?;
        let metric = self.config.metric;

        let rows = match metric {
            DistanceMetric::Planar => {
                let tree = Self::centroid_tree(centroids);
                let start = initial_radius(centroids, k);
                (0..n).into_par_iter()
                    .map(|i| {
                        let c = centroids[i];
                        let mut radius = start;
                        loop {
                            // Every point within `radius` lies in the square; once the k-th
                            // distance fits inside it the candidate set is complete.
                            let square = AABB::from_corners([c.x - radius, c.y - radius], [c.x + radius, c.y + radius]);
                            let found = tree.locate_in_envelope_intersecting(&square)
                                .filter(|p| p.data != i)
                                .map(|p| (metric.distance(c, centroids[p.data]), p.data))
                                .collect::<Vec<_>>();
                            if found.len() >= k {
                                let mut dists = found.iter().map(|&(d, _)| d).collect::<Vec<_>>();
                                let (_, kth, _) = dists.select_nth_unstable_by(k - 1, f64::total_cmp);
                                if *kth <= radius { break nearest_k(found, k) }
                            }
                            radius *= 2.0;
                        }
                    })
                    .collect()
            }
            DistanceMetric::GreatCircle => (0..n).into_par_iter()
                .map(|i| {
                    let found = (0..n)
                        .filter(|&j| j != i)
                        .map(|j| (metric.distance(centroids[i], centroids[j]), j))
                        .collect::<Vec<_>>();
                    nearest_k(found, k)
                })
                .collect(),
        };
        Ok(rows)
    }

    /// All pairs of centroids within `distance` of each other.
    fn within(&self, distance: f64) -> Result<Vec<Vec<u32>>> {
        let n = self.geometries.len();
        let centroids = self.centroids()?;
        let metric = self.config.metric;

        let upper: Vec<Vec<usize>> = match metric {
            DistanceMetric::Planar => {
                let tree = Self::centroid_tree(centroids);
                (0..n).into_par_iter()
                    .map(|i| {
                        let c = centroids[i];
                        let square = AABB::from_corners([c.x - distance, c.y - distance], [c.x + distance, c.y + distance]);
                        tree.locate_in_envelope_intersecting(&square)
                            .map(|p| p.data)
                            .filter(|&j| j > i && metric.distance(c, centroids[j]) <= distance)
                            .collect()
                    })
                    .collect()
            }
            DistanceMetric::GreatCircle => (0..n).into_par_iter()
                .map(|i| (i + 1..n)
                    .filter(|&j| metric.distance(centroids[i], centroids[j]) <= distance)
                    .collect())
                .collect(),
        };
        Ok(mirror(upper))
    }
}

/// Build a neighbor graph for `geometries` under `config`.
pub fn build_graph(geometries: &Geometries, config: &GraphConfig) -> Result<(AdjacencyGraph, NeighborSummary)> {
    GraphBuilder::new(geometries, config).build()
}

/// Starting half-width for the planar k-nearest square search, sized so that
/// a uniform layout holds about k points.
fn initial_radius(centroids: &[geo::Coord<f64>], k: usize) -> f64 {
    let (lo, hi) = centroids.iter().fold(
        ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]),
        |(lo, hi), c| ([lo[0].min(c.x), lo[1].min(c.y)], [hi[0].max(c.x), hi[1].max(c.y)]),
    );
    let extent = (hi[0] - lo[0]).max(hi[1] - lo[1]);
    if extent > 0.0 { extent * ((k + 1) as f64 / centroids.len() as f64).sqrt() } else { 1.0 }
}

/// Sort candidates by (distance, index) and keep the first k.
fn nearest_k(mut found: Vec<(f64, usize)>, k: usize) -> Vec<u32> {
    found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    found.into_iter().take(k).map(|(_, j)| j as u32).collect()
}

/// Expand upper-triangle pair lists (j > i) into symmetric neighbor lists.
fn mirror(upper: Vec<Vec<usize>>) -> Vec<Vec<u32>> {
    let mut rows = vec![Vec::new(); upper.len()];
    for (i, js) in upper.into_iter().enumerate() {
        for j in js {
            rows[i].push(j as u32);
            rows[j].push(i as u32);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord, MultiPolygon};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size),
        ]])
    }

    fn geometries(shapes: Vec<MultiPolygon<f64>>) -> Geometries {
        let n = shapes.len();
        Geometries::new((0..n).map(|i| format!("u{i}")).collect(), shapes, vec![None; n]).unwrap()
    }

    fn config(rule: ContiguityRule, snap_tolerance: f64) -> GraphConfig {
        GraphConfig { rule, snap_tolerance, metric: DistanceMetric::Planar, symmetrize: false }
    }

    fn row(graph: &AdjacencyGraph, i: usize) -> Vec<u32> { graph.neighbors(i).to_vec() }

    /// Two squares sharing an edge and a third touching the second at a corner.
    fn corner_layout() -> Geometries {
        geometries(vec![square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0), square(2.0, 1.0, 1.0)])
    }

    #[test]
    fn rook_ignores_corner_contact() {
        let (graph, _) = build_graph(&corner_layout(), &config(ContiguityRule::Rook, 0.0)).unwrap();
        assert_eq!(row(&graph, 0), vec![1]);
        assert_eq!(row(&graph, 1), vec![0]);
        assert!(row(&graph, 2).is_empty());
    }

    #[test]
    fn queen_includes_corner_contact() {
        let (graph, summary) = build_graph(&corner_layout(), &config(ContiguityRule::Queen, 0.0)).unwrap();
        assert_eq!(row(&graph, 1), vec![0, 2]);
        assert_eq!(summary.n_links, 4);
        assert!(summary.isolates.is_empty());
    }

    #[test]
    fn snapping_closes_small_gaps() {
        // Second square sits 0.01 to the right of the first.
        let geoms = geometries(vec![square(0.0, 0.0, 1.0), square(1.01, 0.0, 1.0)]);
        let (exact, _) = build_graph(&geoms, &config(ContiguityRule::Rook, 0.0)).unwrap();
        assert_eq!(exact.link_count(), 0);

        let (rook, _) = build_graph(&geoms, &config(ContiguityRule::Rook, 0.05)).unwrap();
        assert_eq!(row(&rook, 0), vec![1]);
        let (queen, _) = build_graph(&geoms, &config(ContiguityRule::Queen, 0.05)).unwrap();
        assert_eq!(row(&queen, 0), vec![1]);
    }

    #[test]
    fn snapped_rook_needs_shared_length() {
        // Corner contact after snapping is not a shared edge.
        let geoms = geometries(vec![square(0.0, 0.0, 1.0), square(1.01, 1.01, 1.0)]);
        let (rook, _) = build_graph(&geoms, &config(ContiguityRule::Rook, 0.05)).unwrap();
        assert_eq!(rook.link_count(), 0);
        let (queen, _) = build_graph(&geoms, &config(ContiguityRule::Queen, 0.05)).unwrap();
        assert_eq!(queen.link_count(), 2);
    }

    #[test]
    fn k_nearest_breaks_ties_by_index() {
        let geoms = geometries((0..4).map(|i| square(i as f64 * 2.0, 0.0, 1.0)).collect());
        let (graph, summary) = build_graph(&geoms, &config(ContiguityRule::KNearest { k: 1 }, 0.0)).unwrap();
        // Unit 1 is equidistant from 0 and 2; the lower index wins.
        assert_eq!(row(&graph, 1), vec![0]);
        assert_eq!(row(&graph, 3), vec![2]);
        assert!(!summary.symmetric);

        let mut cfg = config(ContiguityRule::KNearest { k: 1 }, 0.0);
        cfg.symmetrize = true;
        let (sym, summary) = build_graph(&geoms, &cfg).unwrap();
        assert!(summary.symmetric);
        assert_eq!(row(&sym, 2), vec![1, 3]);
    }

    #[test]
    fn great_circle_k_nearest_matches_planar_ordering() {
        let shapes = (0..5).map(|i| square(i as f64, 0.0, 0.5)).collect::<Vec<_>>();
        let geoms = geometries(shapes);
        let mut cfg = config(ContiguityRule::KNearest { k: 2 }, 0.0);
        cfg.metric = DistanceMetric::GreatCircle;
        let (graph, _) = build_graph(&geoms, &cfg).unwrap();
        assert_eq!(row(&graph, 0), vec![1, 2]);
        assert_eq!(row(&graph, 2), vec![1, 3]);
    }

    #[test]
    fn distance_threshold_is_inclusive_and_symmetric() {
        let centroids = vec![Some(Coord { x: 0.0, y: 0.0 }), Some(Coord { x: 1.0, y: 0.0 }), Some(Coord { x: 3.0, y: 0.0 })];
        let shapes = vec![square(0.0, 0.0, 0.1), square(1.0, 0.0, 0.1), square(3.0, 0.0, 0.1)];
        let geoms = Geometries::new(vec!["a".into(), "b".into(), "c".into()], shapes, centroids).unwrap();
        let (graph, summary) = build_graph(&geoms, &config(ContiguityRule::DistanceThreshold { distance: 1.0 }, 0.0)).unwrap();
        assert_eq!(row(&graph, 0), vec![1]);
        assert_eq!(row(&graph, 1), vec![0]);
        assert_eq!(summary.isolates, vec!["c"]);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let geoms = corner_layout();
        assert!(build_graph(&geoms, &config(ContiguityRule::KNearest { k: 3 }, 0.0)).is_err());
        assert!(build_graph(&geoms, &config(ContiguityRule::KNearest { k: 0 }, 0.0)).is_err());
        assert!(build_graph(&geoms, &config(ContiguityRule::DistanceThreshold { distance: 0.0 }, 0.0)).is_err());
        assert!(build_graph(&geoms, &config(ContiguityRule::Queen, -0.1)).is_err());
    }
}
