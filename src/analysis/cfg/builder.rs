//! CFG construction.
//!
//! The walk starts at Entry and at every exception handler target and follows control
//! flow with an explicit worklist. Each instruction is visited once; edges are added
//! only if the same `(from, to, kind)` edge does not exist yet, which keeps the walk
//! finite on back edges. Instructions the walk never reaches get no vertex.
//!
//! Every vertex carries the handler nesting depth of its instruction: `1` outside any
//! protected range, plus one per covering handler. `returnvalue`/`returnvoid` always
//! reach Exit. `throw` reaches Exit only at depth `1`; inside a protected range it
//! transfers to the covering handlers instead. Any other instruction that may raise gets
//! a [`CfgEdgeKind::Throw`] edge to each covering handler.
//!
//! The depth counts protected ranges, not scopes: `pushscope`/`pushwith`/`popscope`
//! leave it unchanged. A `throw` leaves the method exactly when no handler of the
//! method can catch it, so the in-degree of Exit is the number of returns plus the
//! number of throws outside every protected range.

use rustc_hash::FxHashMap;

use crate::{
    analysis::cfg::{CfgEdgeKind, CfgNode, ControlFlowGraph},
    assembly::{Anchor, Bytecode, FlowType, InstrId, Marker, Operands},
    utils::graph::{DirectedGraph, NodeId},
    Result,
};

struct CfgBuilder<'a> {
    bytecode: &'a Bytecode,
    positions: FxHashMap<InstrId, usize>,
    /// `(from, to, target)` positions of every handler
    ranges: Vec<(usize, usize, usize)>,
    cfg: ControlFlowGraph,
    worklist: Vec<usize>,
}

impl ControlFlowGraph {
    /// Builds the CFG of `bytecode`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the code is empty, control falls off the end
    /// of the code, or a branch or handler marker does not resolve to an instruction.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use abcscope::{analysis::ControlFlowGraph, assembly::InstructionAssembler};
    ///
    /// let mut asm = InstructionAssembler::new();
    /// asm.getlocal(1).iffalse("else").pushbyte(1).returnvalue()
    ///     .label("else").pushbyte(2).returnvalue();
    /// let cfg = ControlFlowGraph::build(&asm.finish()?)?;
    ///
    /// assert_eq!(cfg.out_degree(cfg.entry()), 1);
    /// assert_eq!(cfg.in_degree(cfg.exit()), 2);
    /// # Ok::<(), abcscope::Error>(())
    /// ```
    pub fn build(bytecode: &Bytecode) -> Result<Self> {
        if bytecode.is_empty() {
            return Err(malformed_error!("method body has no instructions"));
        }

        let positions = bytecode.positions();
        let mut ranges = Vec::with_capacity(bytecode.handlers().len());
        for handler in bytecode.resolved_handlers(&positions)? {
            if handler.target >= bytecode.len() {
                return Err(malformed_error!(
                    "exception handler target {} is outside the code",
                    handler.target
                ));
            }
            ranges.push((handler.from, handler.to, handler.target));
        }

        let mut graph = DirectedGraph::with_capacity(bytecode.len() + 2, bytecode.len() + 2);
        let entry = graph.add_node(CfgNode::Entry);
        let exit = graph.add_node(CfgNode::Exit);

        let mut builder = CfgBuilder {
            bytecode,
            positions,
            cfg: ControlFlowGraph {
                graph,
                entry,
                exit,
                by_instr: FxHashMap::default(),
                order: Vec::new(),
                depth: FxHashMap::default(),
                covering: FxHashMap::default(),
                handler_targets: vec![None; ranges.len()],
            },
            ranges,
            worklist: Vec::new(),
        };

        builder.walk()?;
        Ok(builder.finish())
    }
}

impl CfgBuilder<'_> {
    fn walk(&mut self) -> Result<()> {
        let first = self.vertex(0)?;
        self.connect(self.cfg.entry, first, CfgEdgeKind::Default)?;

        for index in 0..self.ranges.len() {
            let target = self.ranges[index].2;
            let node = self.vertex(target)?;
            self.cfg.handler_targets[index] = Some(node);
        }

        while let Some(position) = self.worklist.pop() {
            self.visit(position)?;
        }

        Ok(())
    }

    /// Returns the vertex for the instruction at `position`, scheduling it on first sight.
    fn vertex(&mut self, position: usize) -> Result<NodeId> {
        let bytecode = self.bytecode;
        let Some((id, _)) = bytecode.at(position) else {
            return Err(malformed_error!("control falls off the end of the code"));
        };

        if let Some(&node) = self.cfg.by_instr.get(&id) {
            return Ok(node);
        }

        let node = self.cfg.graph.add_node(CfgNode::Instr(id));
        self.cfg.by_instr.insert(id, node);

        let covering: Vec<usize> = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, (from, to, _))| (*from..*to).contains(&position))
            .map(|(index, _)| index)
            .collect();
        self.cfg.depth.insert(node, 1 + covering.len() as u32);
        if !covering.is_empty() {
            self.cfg.covering.insert(node, covering);
        }

        self.worklist.push(position);
        Ok(node)
    }

    fn connect(&mut self, from: NodeId, to: NodeId, kind: CfgEdgeKind) -> Result<()> {
        if self.cfg.graph.find_edge(from, to, |&existing| existing == kind).is_none() {
            self.cfg.graph.add_edge(from, to, kind)?;
        }
        Ok(())
    }

    fn target(&mut self, marker: Marker) -> Result<NodeId> {
        match self.bytecode.markers().target_of(marker) {
            Some(Anchor::Instr(id)) => {
                let position = self.positions.get(&id).copied().ok_or_else(|| {
                    malformed_error!("branch target {} was removed from the code", marker)
                })?;
                self.vertex(position)
            }
            Some(Anchor::End) => Err(malformed_error!(
                "branch target {} is the end of the code",
                marker
            )),
            None => Err(malformed_error!("branch target {} is unbound", marker)),
        }
    }

    fn visit(&mut self, position: usize) -> Result<()> {
        let bytecode = self.bytecode;
        let Some((id, instruction)) = bytecode.at(position) else {
            return Ok(());
        };
        let node = self.cfg.by_instr[&id];
        let opcode = instruction.opcode;

        match (opcode.flow(), &instruction.operands) {
            (FlowType::Next, _) => {
                let next = self.vertex(position + 1)?;
                self.connect(node, next, CfgEdgeKind::Default)?;
            }
            (FlowType::Jump, Operands::Branch(target)) => {
                let target = self.target(*target)?;
                self.connect(node, target, CfgEdgeKind::Jump)?;
            }
            (FlowType::Conditional, Operands::Branch(target)) => {
                let taken = self.target(*target)?;
                self.connect(node, taken, CfgEdgeKind::True)?;
                let next = self.vertex(position + 1)?;
                self.connect(node, next, CfgEdgeKind::False)?;
            }
            (FlowType::Switch, Operands::Switch { default, cases }) => {
                let default = self.target(*default)?;
                self.connect(node, default, CfgEdgeKind::DefaultCase)?;
                for (index, case) in cases.iter().enumerate() {
                    let case = self.target(*case)?;
                    self.connect(node, case, CfgEdgeKind::Case(index as u32))?;
                }
            }
            (FlowType::Return, _) => {
                self.connect(node, self.cfg.exit, CfgEdgeKind::Return)?;
            }
            (FlowType::Throw, _) => {
                if self.cfg.handler_depth(node) == 1 {
                    self.connect(node, self.cfg.exit, CfgEdgeKind::Throw)?;
                }
            }
            (flow, operands) => {
                return Err(malformed_error!(
                    "{} with {:?} flow carries {:?} operands",
                    opcode,
                    flow,
                    operands.layout()
                ));
            }
        }

        if opcode.can_throw() {
            let covering = self.cfg.covering_handlers(node).to_vec();
            for index in covering {
                let handler = self.vertex(self.ranges[index].2)?;
                self.connect(node, handler, CfgEdgeKind::Throw)?;
            }
        }

        Ok(())
    }

    fn finish(mut self) -> ControlFlowGraph {
        let positions = &self.positions;
        let mut order: Vec<(usize, NodeId)> = self
            .cfg
            .by_instr
            .iter()
            .filter_map(|(id, node)| positions.get(id).map(|position| (*position, *node)))
            .collect();
        order.sort_unstable();
        self.cfg.order = order.into_iter().map(|(_, node)| node).collect();
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::InstructionAssembler, Error};

    fn kinds_from(cfg: &ControlFlowGraph, node: NodeId) -> Vec<CfgEdgeKind> {
        let mut kinds: Vec<_> = cfg.edges_from(node).map(|(_, kind)| kind).collect();
        kinds.sort();
        kinds
    }

    #[test]
    fn test_straight_line() {
        let mut asm = InstructionAssembler::new();
        asm.prologue().pushbyte(1).returnvalue();
        let cfg = ControlFlowGraph::build(&asm.finish().unwrap()).unwrap();

        assert_eq!(cfg.instruction_count(), 4);
        assert_eq!(cfg.out_degree(cfg.entry()), 1);
        assert_eq!(cfg.in_degree(cfg.exit()), 1);
    }

    #[test]
    fn test_conditional_and_loop_edges() {
        let mut asm = InstructionAssembler::new();
        asm.label("top")
            .getlocal(1)
            .iftrue("out")
            .jump("top")
            .label("out")
            .returnvoid();
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();

        let branch = cfg.node_of(code.at(1).unwrap().0).unwrap();
        assert_eq!(
            kinds_from(&cfg, branch),
            vec![CfgEdgeKind::True, CfgEdgeKind::False]
        );

        let jump = cfg.node_of(code.at(2).unwrap().0).unwrap();
        assert_eq!(kinds_from(&cfg, jump), vec![CfgEdgeKind::Jump]);
        // The loop header is entered from Entry and from the back edge
        let header = cfg.node_of(code.at(0).unwrap().0).unwrap();
        assert_eq!(cfg.in_degree(header), 2);
    }

    #[test]
    fn test_switch_edges() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .lookupswitch("d", &["a", "a"])
            .label("a")
            .returnvoid()
            .label("d")
            .returnvoid();
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();

        let switch = cfg.node_of(code.at(1).unwrap().0).unwrap();
        assert_eq!(
            kinds_from(&cfg, switch),
            vec![
                CfgEdgeKind::Case(0),
                CfgEdgeKind::Case(1),
                CfgEdgeKind::DefaultCase
            ]
        );
    }

    #[test]
    fn test_unreachable_code_has_no_vertex() {
        let mut asm = InstructionAssembler::new();
        asm.returnvoid().pushbyte(1).returnvalue();
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();

        assert_eq!(cfg.instruction_count(), 1);
        assert!(!cfg.contains(code.at(1).unwrap().0));
    }

    #[test]
    fn test_throw_routing() {
        // try { throw } catch { return }
        let mut asm = InstructionAssembler::new();
        asm.label("try")
            .pushnull()
            .throw()
            .label("end")
            .label("catch")
            .pop()
            .returnvoid()
            .handler("try", "end", "catch", 0, 0);
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();

        let throw = cfg.node_of(code.at(1).unwrap().0).unwrap();
        let catch = cfg.node_of(code.at(2).unwrap().0).unwrap();
        assert_eq!(cfg.handler_depth(throw), 2);
        assert_eq!(cfg.edges_from(throw).collect::<Vec<_>>(), vec![(catch, CfgEdgeKind::Throw)]);
        assert!(cfg.is_handler_target(catch));
        // Only the return reaches Exit
        assert_eq!(cfg.in_degree(cfg.exit()), 1);
    }

    #[test]
    fn test_uncaught_throw_reaches_exit() {
        let mut asm = InstructionAssembler::new();
        asm.pushnull().throw();
        let cfg = ControlFlowGraph::build(&asm.finish().unwrap()).unwrap();
        let kinds: Vec<_> = cfg.edges_to(cfg.exit()).map(|(_, kind)| kind).collect();
        assert_eq!(kinds, vec![CfgEdgeKind::Throw]);
    }

    #[test]
    fn test_nested_handlers_keep_throws_inside() {
        // try { with scope; try { throw } catch { rethrow } } catch { if (a) throw; return }
        let mut asm = InstructionAssembler::new();
        asm.label("outer")
            .getlocal(0)
            .pushscope()
            .label("inner")
            .pushnull()
            .throw()
            .label("inner_end")
            .label("inner_catch")
            .throw()
            .label("outer_end")
            .label("outer_catch")
            .pop()
            .getlocal(1)
            .iffalse("done")
            .pushnull()
            .throw()
            .label("done")
            .returnvoid()
            .handler("inner", "inner_end", "inner_catch", 0, 0)
            .handler("outer", "outer_end", "outer_catch", 0, 0);
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();

        let node = |position: usize| cfg.node_of(code.at(position).unwrap().0).unwrap();
        let (throw, outer_catch) = (node(3), node(5));
        // The inner handler's first instruction is the rethrow
        let (inner_catch, rethrow) = (node(4), node(4));
        assert_eq!(cfg.handler_depth(node(1)), 2);
        assert_eq!(cfg.handler_depth(throw), 3);
        assert_eq!(cfg.handler_depth(rethrow), 2);
        assert_eq!(cfg.handler_depth(node(9)), 1);

        let targets = |from: NodeId| {
            let mut targets: Vec<_> = cfg.edges_from(from).map(|(to, _)| to).collect();
            targets.sort();
            targets
        };
        let mut both = vec![inner_catch, outer_catch];
        both.sort();
        assert_eq!(targets(throw), both);
        assert_eq!(targets(rethrow), vec![outer_catch]);

        // The final return and the throw outside both ranges
        let mut kinds: Vec<_> = cfg.edges_to(cfg.exit()).map(|(_, kind)| kind).collect();
        kinds.sort();
        assert_eq!(kinds, vec![CfgEdgeKind::Throw, CfgEdgeKind::Return]);
        assert_eq!(cfg.in_degree(cfg.exit()), 2);
    }

    #[test]
    fn test_fall_off_end_is_malformed() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(1).pop();
        assert!(matches!(
            ControlFlowGraph::build(&asm.finish().unwrap()),
            Err(Error::Malformed { .. })
        ));
    }
}
