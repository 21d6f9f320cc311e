//! Shared utilities: the byte stream parser and the generic graph infrastructure.

pub mod graph;
pub mod parser;

pub use parser::Parser;
