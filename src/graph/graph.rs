use serde::Serialize;

use crate::error::{Result, SpatialError, Stage};

/// A neighbor relation over units in compressed sparse row format.
/// Rows are sorted and deduplicated, with no self-loops. Units with an empty
/// row are isolates.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyGraph {
    ids: Vec<String>,
    offsets: Vec<u32>,
    edges: Vec<u32>,
}

impl AdjacencyGraph {
    /// Construct a graph from per-unit neighbor lists. Lists are sorted and
    /// deduplicated; self-loops and out-of-range indices are rejected.
    pub fn from_neighbors(ids: Vec<String>, mut neighbors: Vec<Vec<u32>>) -> Result<Self> {
        let n = ids.len();
        if neighbors.len() != n {
            return Err(SpatialError::invalid(Stage::Graph, format!(
                "{} neighbor lists for {n} units", neighbors.len(),
            )));
        }

        let mut self_loops = Vec::new();
        for (i, row) in neighbors.iter_mut().enumerate() {
            row.sort_unstable();
            row.dedup();
            if let Some(&j) = row.iter().find(|&&j| j as usize >= n) {
                return Err(SpatialError::invalid(Stage::Graph, format!(
                    "unit '{}' references neighbor index {j} out of range", ids[i],
                )));
            }
            if row.binary_search(&(i as u32)).is_ok() {
                self_loops.push(ids[i].clone());
            }
        }
        if !self_loops.is_empty() {
            return Err(SpatialError::invalid(Stage::Graph, format!(
                "self-loops for {}", self_loops.join(", "),
            )));
        }

        Ok(Self {
            offsets: std::iter::once(0u32).chain(
                neighbors.iter()
                    .map(|v| v.len() as u32)
                    .scan(0u32, |acc, len| {*acc += len; Some(*acc)})
            ).collect::<Vec<u32>>(),
            edges: neighbors.into_iter().flatten().collect(),
            ids,
        })
    }

    /// Get the number of units.
    #[inline] pub fn len(&self) -> usize { self.ids.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    /// Get the number of directed links (each symmetric pair counts twice).
    #[inline] pub fn link_count(&self) -> usize { self.edges.len() }

    #[inline] pub fn ids(&self) -> &[String] { &self.ids }

    #[inline]
    fn range(&self, unit: usize) -> std::ops::Range<usize> {
        self.offsets[unit] as usize .. self.offsets[unit + 1] as usize
    }

    /// Get the number of neighbors of a unit.
    #[inline] pub fn degree(&self, unit: usize) -> usize { self.range(unit).len() }

    /// Get the sorted neighbor indices of a unit.
    #[inline]
    pub fn neighbors(&self, unit: usize) -> &[u32] { &self.edges[self.range(unit)] }

    /// Check whether `j` is a neighbor of `i`.
    #[inline]
    pub fn contains(&self, i: usize, j: usize) -> bool { self.neighbors(i).binary_search(&(j as u32)).is_ok() }

    /// Indices of units with no neighbors.
    pub fn isolates(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.degree(i) == 0).collect()
    }

    /// Check whether every link has its reverse.
    pub fn is_symmetric(&self) -> bool {
        (0..self.len()).all(|i| self.neighbors(i).iter().all(|&j| self.contains(j as usize, i)))
    }

    /// Union of the relation with its transpose.
    pub fn symmetrized(&self) -> Self {
        let mut rows = (0..self.len()).map(|i| self.neighbors(i).to_vec()).collect::<Vec<_>>();
        for i in 0..self.len() {
            for &j in self.neighbors(i) {
                rows[j as usize].push(i as u32);
            }
        }
        for row in &mut rows {
            row.sort_unstable();
            row.dedup();
        }
        Self {
            offsets: std::iter::once(0u32).chain(
                rows.iter().map(|v| v.len() as u32).scan(0u32, |acc, len| {*acc += len; Some(*acc)})
            ).collect(),
            edges: rows.into_iter().flatten().collect(),
            ids: self.ids.clone(),
        }
    }

    /// Neighbor count statistics.
    pub fn summary(&self) -> NeighborSummary {
        let mut degrees = (0..self.len()).map(|i| self.degree(i)).collect::<Vec<_>>();
        degrees.sort_unstable();
        let n = degrees.len();
        let median = match n {
            0 => 0.0,
            _ if n % 2 == 1 => degrees[n / 2] as f64,
            _ => (degrees[n / 2 - 1] + degrees[n / 2]) as f64 / 2.0,
        };

        NeighborSummary {
            n_units: n,
            n_links: self.link_count(),
            isolates: self.isolates().into_iter().map(|i| self.ids[i].clone()).collect(),
            mean: if n == 0 { 0.0 } else { self.link_count() as f64 / n as f64 },
            median,
            min: degrees.first().copied().unwrap_or(0),
            max: degrees.last().copied().unwrap_or(0),
            symmetric: self.is_symmetric(),
        }
    }
}

/// Neighbor-count statistics reported alongside a built graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborSummary {
    pub n_units: usize,
    pub n_links: usize,
    pub isolates: Vec<String>,
    pub mean: f64,
    pub median: f64,
    pub min: usize,
    pub max: usize,
    pub symmetric: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> { (0..n).map(|i| format!("u{i}")).collect() }

    fn make_test_graph() -> AdjacencyGraph {
        AdjacencyGraph::from_neighbors(
            ids(4),
            vec![
                vec![2, 1],       // 0
                vec![0, 2, 2],    // 1
                vec![0, 1, 3],    // 2
                vec![2],          // 3
            ],
        ).unwrap()
    }

    #[test]
    fn csr_graph_construction() {
        let graph = make_test_graph();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.link_count(), 8);

        // Offsets are cumulative neighbor counts, len = units + 1
        assert_eq!(graph.offsets, vec![0, 2, 4, 7, 8]);

        // Rows are sorted and deduplicated
        assert_eq!(graph.edges, vec![1, 2, 0, 2, 0, 1, 3, 2]);

        for window in graph.offsets.windows(2) { assert!(window[0] <= window[1]) }
    }

    #[test]
    fn degree_and_membership() {
        let graph = make_test_graph();
        assert_eq!(graph.degree(2), 3);
        assert_eq!(graph.neighbors(2), &[0, 1, 3]);
        assert!(graph.contains(3, 2));
        assert!(!graph.contains(3, 0));
        assert!(graph.is_symmetric());
    }

    #[test]
    fn isolated_units_have_zero_degree() {
        let graph = AdjacencyGraph::from_neighbors(ids(3), vec![vec![], vec![], vec![]]).unwrap();
        assert_eq!(graph.offsets, vec![0, 0, 0, 0]);
        assert_eq!(graph.isolates(), vec![0, 1, 2]);
        assert_eq!(graph.summary().isolates, vec!["u0", "u1", "u2"]);
    }

    #[test]
    fn empty_graph_is_valid() {
        let graph = AdjacencyGraph::from_neighbors(vec![], vec![]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.offsets, vec![0]);
        assert_eq!(graph.summary().median, 0.0);
    }

    #[test]
    fn self_loops_and_bad_indices_are_rejected() {
        assert!(AdjacencyGraph::from_neighbors(ids(2), vec![vec![0], vec![]]).is_err());
        assert!(AdjacencyGraph::from_neighbors(ids(2), vec![vec![5], vec![]]).is_err());
        assert!(AdjacencyGraph::from_neighbors(ids(2), vec![vec![]]).is_err());
    }

    #[test]
    fn symmetrized_adds_reverse_links() {
        let graph = AdjacencyGraph::from_neighbors(ids(3), vec![vec![1], vec![2], vec![]]).unwrap();
        assert!(!graph.is_symmetric());
        let sym = graph.symmetrized();
        assert!(sym.is_symmetric());
        assert_eq!(sym.neighbors(1), &[0, 2]);
        assert_eq!(sym.link_count(), 4);
    }

    #[test]
    fn summary_statistics() {
        let summary = make_test_graph().summary();
        assert_eq!(summary.n_units, 4);
        assert_eq!(summary.n_links, 8);
        assert_eq!(summary.min, 1);
        assert_eq!(summary.max, 3);
        assert_eq!(summary.median, 2.0);
        assert_eq!(summary.mean, 2.0);
        assert!(summary.symmetric);
    }
}
