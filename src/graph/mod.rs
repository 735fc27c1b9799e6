mod builder;
mod graph;

pub use builder::{build_graph, ContiguityRule, GraphBuilder};
pub use graph::{AdjacencyGraph, NeighborSummary};
