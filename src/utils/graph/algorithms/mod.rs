//! Graph algorithms over the traits in [`crate::utils::graph`].
//!
//! - [`scc`] - Tarjan's strongly connected components (iterative)
//! - [`traversal`] - post-order and reverse post-order

pub mod scc;
pub mod traversal;

pub use scc::{is_cyclic, strongly_connected_components};
pub use traversal::{postorder, reverse_postorder};
