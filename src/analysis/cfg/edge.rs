//! Control flow edge kinds.

use std::fmt;

/// The kind of control flow an edge represents.
///
/// At most one edge of each kind connects the same pair of vertices. Switch cases are
/// distinguished by their index, so two cases jumping to the same target are two edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CfgEdgeKind {
    /// Fall-through from a non-branching instruction, or Entry to the first instruction
    Default,
    /// Taken edge of a conditional branch
    True,
    /// Fall-through edge of a conditional branch
    False,
    /// Unconditional `jump`
    Jump,
    /// `lookupswitch` case with the given index
    Case(u32),
    /// `lookupswitch` default target
    DefaultCase,
    /// Exceptional transfer to a handler, or to Exit for an uncaught `throw`
    Throw,
    /// Normal method exit
    Return,
}

impl CfgEdgeKind {
    /// Returns `true` for the two edges of a conditional branch.
    #[must_use]
    pub const fn is_conditional(self) -> bool {
        matches!(self, Self::True | Self::False)
    }

    /// Returns `true` for exceptional edges.
    #[must_use]
    pub const fn is_exceptional(self) -> bool {
        matches!(self, Self::Throw)
    }

    /// Returns `true` for switch edges.
    #[must_use]
    pub const fn is_switch(self) -> bool {
        matches!(self, Self::Case(_) | Self::DefaultCase)
    }
}

impl fmt::Display for CfgEdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgEdgeKind::Default => f.write_str("default"),
            CfgEdgeKind::True => f.write_str("true"),
            CfgEdgeKind::False => f.write_str("false"),
            CfgEdgeKind::Jump => f.write_str("jump"),
            CfgEdgeKind::Case(index) => write!(f, "case {index}"),
            CfgEdgeKind::DefaultCase => f.write_str("default case"),
            CfgEdgeKind::Throw => f.write_str("throw"),
            CfgEdgeKind::Return => f.write_str("return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CfgEdgeKind::True.is_conditional());
        assert!(!CfgEdgeKind::Jump.is_conditional());
        assert!(CfgEdgeKind::Case(3).is_switch());
        assert!(CfgEdgeKind::DefaultCase.is_switch());
        assert!(CfgEdgeKind::Throw.is_exceptional());
        assert_ne!(CfgEdgeKind::Case(0), CfgEdgeKind::Case(1));
    }
}
