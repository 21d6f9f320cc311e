//! Trait definitions for graph abstractions.
//!
//! Algorithms in [`crate::utils::graph::algorithms`] are written against these traits so the
//! same SCC and traversal code runs over the instruction-level CFG, the IR block graph and
//! restricted views of either.
//!
//! - [`GraphBase`] - Node count and node iteration
//! - [`Successors`] - Forward edge traversal
//! - [`Predecessors`] - Backward edge traversal

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of node slots in the graph.
    ///
    /// Node identifiers handed out by the graph are always below this value.
    /// Graphs with removed nodes still count the vacated slots.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all live node identifiers.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the direct successors of `node`.
    ///
    /// A successor that is reachable over several parallel edges may be yielded
    /// more than once.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the direct predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}
