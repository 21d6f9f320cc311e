//! Basic blocks of the instruction CFG and their stack summaries.
//!
//! A basic block is a maximal run of vertices connected by `Default` edges where each
//! inner vertex has exactly one normal predecessor and each vertex but the last has
//! exactly one normal successor. Throw edges are ignored: a handler starts with a fixed
//! stack, independent of where the exception was raised.

use rustc_hash::FxHashMap;

use crate::{
    analysis::{
        cfg::{CfgEdgeKind, CfgNode, ControlFlowGraph},
        stack::effects::stack_effect,
    },
    assembly::Bytecode,
    metadata::ConstantPool,
    utils::graph::NodeId,
    Result,
};

/// Peak and net change of one stack over a run of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delta {
    /// Highest depth reached, relative to the start
    pub peak: i64,
    /// Depth at the end, relative to the start
    pub net: i64,
}

impl Delta {
    /// A run that starts at a fixed depth.
    #[must_use]
    pub fn fixed(depth: i64) -> Self {
        Delta {
            peak: depth,
            net: depth,
        }
    }

    /// The effect of running `self` and then `next`.
    #[must_use]
    pub fn then(self, next: Delta) -> Delta {
        Delta {
            peak: self.peak.max(self.net + next.peak),
            net: self.net + next.net,
        }
    }

    /// Component-wise maximum, an upper bound of both alternatives.
    #[must_use]
    pub fn join(self, other: Delta) -> Delta {
        Delta {
            peak: self.peak.max(other.peak),
            net: self.net.max(other.net),
        }
    }
}

/// Operand and scope stack summary of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockSummary {
    /// Operand stack
    pub stack: Delta,
    /// Scope stack
    pub scope: Delta,
}

impl BlockSummary {
    /// Sequential composition.
    #[must_use]
    pub fn then(self, next: BlockSummary) -> BlockSummary {
        BlockSummary {
            stack: self.stack.then(next.stack),
            scope: self.scope.then(next.scope),
        }
    }

    /// Upper bound of two alternatives.
    #[must_use]
    pub fn join(self, other: BlockSummary) -> BlockSummary {
        BlockSummary {
            stack: self.stack.join(other.stack),
            scope: self.scope.join(other.scope),
        }
    }
}

/// The basic block graph of a CFG.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    /// Summary of every block
    pub summaries: Vec<BlockSummary>,
    /// Successor blocks (normal control flow only)
    pub successors: Vec<Vec<usize>>,
    /// Blocks execution can start in, with their initial depths
    pub roots: Vec<(usize, BlockSummary)>,
}

fn is_normal(kind: CfgEdgeKind) -> bool {
    !matches!(kind, CfgEdgeKind::Throw | CfgEdgeKind::Return)
}

impl BlockGraph {
    /// Partitions `cfg` into basic blocks and summarizes each one (phase A).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for invalid multiname operands.
    pub fn build(cfg: &ControlFlowGraph, bytecode: &Bytecode, pool: &ConstantPool) -> Result<Self> {
        let normal_preds = |node: NodeId| {
            cfg.edges_to(node)
                .filter(|(source, kind)| is_normal(*kind) && *source != cfg.entry())
                .count()
        };
        let is_leader = |node: NodeId| -> bool {
            if cfg.is_handler_target(node) || normal_preds(node) != 1 {
                return true;
            }
            let entered_from_entry = cfg.edges_to(node).any(|(source, _)| source == cfg.entry());
            if entered_from_entry {
                return true;
            }
            cfg.edges_to(node)
                .filter(|(_, kind)| is_normal(*kind))
                .any(|(source, kind)| {
                    kind != CfgEdgeKind::Default
                        || cfg.edges_from(source).filter(|(_, k)| is_normal(*k)).count() != 1
                })
        };

        let mut block_of: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut members: Vec<Vec<NodeId>> = Vec::new();

        for &node in cfg.instruction_nodes() {
            if block_of.contains_key(&node) || !is_leader(node) {
                continue;
            }

            let index = members.len();
            let mut run = vec![node];
            block_of.insert(node, index);
            let mut current = node;
            loop {
                let next: Vec<_> = cfg
                    .edges_from(current)
                    .filter(|(_, kind)| is_normal(*kind))
                    .collect();
                match next.as_slice() {
                    [(succ, CfgEdgeKind::Default)]
                        if !is_leader(*succ) && !block_of.contains_key(succ) =>
                    {
                        block_of.insert(*succ, index);
                        run.push(*succ);
                        current = *succ;
                    }
                    _ => break,
                }
            }
            members.push(run);
        }

        // Cycles made only of non-leaders are entered nowhere and never executed
        let mut summaries = Vec::with_capacity(members.len());
        for run in &members {
            let mut summary = BlockSummary::default();
            for &node in run {
                let Some(CfgNode::Instr(id)) = cfg.node(node) else {
                    continue;
                };
                let Some(instruction) = bytecode.get(id) else {
                    continue;
                };
                let effect = stack_effect(instruction, pool)?;
                summary = summary.then(BlockSummary {
                    stack: Delta {
                        peak: effect.net().max(0),
                        net: effect.net(),
                    },
                    scope: Delta {
                        peak: i64::from(effect.scope).max(0),
                        net: i64::from(effect.scope),
                    },
                });
            }
            summaries.push(summary);
        }

        let mut successors = vec![Vec::new(); members.len()];
        for (index, run) in members.iter().enumerate() {
            let Some(&last) = run.last() else {
                continue;
            };
            for (succ, kind) in cfg.edges_from(last) {
                if !is_normal(kind) {
                    continue;
                }
                if let Some(&target) = block_of.get(&succ) {
                    if !successors[index].contains(&target) {
                        successors[index].push(target);
                    }
                }
            }
        }

        let mut roots = Vec::new();
        if let Some((first, _)) = cfg.edges_from(cfg.entry()).next() {
            if let Some(&block) = block_of.get(&first) {
                roots.push((block, BlockSummary::default()));
            }
        }
        for &node in cfg.instruction_nodes() {
            if cfg.is_handler_target(node) {
                if let Some(&block) = block_of.get(&node) {
                    // The caught exception is on the stack, the scope stack is reset
                    roots.push((
                        block,
                        BlockSummary {
                            stack: Delta::fixed(1),
                            scope: Delta::default(),
                        },
                    ));
                }
            }
        }

        Ok(BlockGraph {
            summaries,
            successors,
            roots,
        })
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    /// Returns `true` if the graph has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::InstructionAssembler;

    #[test]
    fn test_delta_composition() {
        let a = Delta { peak: 2, net: 1 };
        let b = Delta { peak: 3, net: -1 };
        assert_eq!(a.then(b), Delta { peak: 4, net: 0 });
        assert_eq!(a.join(b), Delta { peak: 3, net: 1 });
    }

    #[test]
    fn test_blocks_of_diamond() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .jump("join")
            .label("else")
            .pushbyte(2)
            .label("join")
            .returnvalue();
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        let blocks = BlockGraph::build(&cfg, &code, &ConstantPool::new()).unwrap();

        // [getlocal1, iffalse] [pushbyte, jump] [pushbyte] [returnvalue]
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks.roots.len(), 1);
        assert_eq!(blocks.summaries[0].stack, Delta { peak: 1, net: 0 });
        assert_eq!(blocks.successors[0].len(), 2);
    }
}
