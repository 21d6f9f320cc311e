//! Generic directed graph infrastructure.
//!
//! This module provides the graph building blocks shared by the analysis passes:
//!
//! - [`NodeId`] / [`EdgeId`] - strongly typed identifiers
//! - [`DirectedGraph`] - an append-only adjacency-list graph with typed payloads
//! - [`GraphBase`], [`Successors`], [`Predecessors`] - traits the algorithms are written against
//! - [`algorithms`] - SCC and traversal algorithms
//!
//! The instruction-level control-flow graph is a [`DirectedGraph`]. The IR block graph
//! implements the traits directly, so the same algorithms run over both.

pub mod algorithms;
mod directed;
mod node;
mod traits;

pub use directed::DirectedGraph;
pub use node::{EdgeId, NodeId};
pub use traits::{GraphBase, Predecessors, Successors};
