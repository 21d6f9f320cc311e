//! Clean-up rewrites shared by the IR builder and the optimization passes.

use rustc_hash::FxHashSet;

use crate::analysis::ir::{IrFunction, IrValue, NodeKind, ValueId};

impl IrFunction {
    /// Returns `true` if `value` reads `register`, directly or through phis.
    ///
    /// Such a value changes meaning when the register is written between its
    /// definition and a use.
    #[must_use]
    pub fn reads_register(&self, value: &IrValue, register: u32) -> bool {
        let mut pending = vec![value];
        let mut seen = FxHashSet::default();
        while let Some(value) = pending.pop() {
            match value {
                IrValue::Local(local) if local.register == register => return true,
                IrValue::Node(id) if seen.insert(*id) => {
                    if let Some(NodeKind::Phi(inputs)) = self.kind(*id) {
                        pending.extend(inputs.iter().map(|input| &input.value));
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Replaces every phi whose inputs, ignoring the phi itself, are all the same
    /// value by that value. Single-input phis are the common case.
    ///
    /// Returns the number of phis removed.
    pub fn remove_trivial_phis(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let mut changed = false;
            for id in self.node_ids() {
                let Some(replacement) = self.trivial_phi_value(id) else {
                    continue;
                };
                self.replace_uses(id, &replacement);
                self.remove_node(id);
                removed += 1;
                changed = true;
            }
            if !changed {
                return removed;
            }
        }
    }

    fn trivial_phi_value(&self, id: ValueId) -> Option<IrValue> {
        let Some(NodeKind::Phi(inputs)) = self.kind(id) else {
            return None;
        };

        let this = IrValue::Node(id);
        let mut unique: Option<&IrValue> = None;
        for input in inputs {
            if input.value == this {
                continue;
            }
            match unique {
                None => unique = Some(&input.value),
                Some(value) if *value == input.value => {}
                Some(_) => return None,
            }
        }
        unique.cloned()
    }

    /// Removes copies of constants and of non-phi nodes.
    ///
    /// Copies of register reads stay, since the register may be written between the copy
    /// and its use. Copies of phis stay too: a phi can collapse into a register read later.
    ///
    /// Returns the number of copies removed.
    pub fn remove_redundant_copies(&mut self) -> usize {
        let mut removed = 0;
        for id in self.node_ids() {
            let Some(NodeKind::Copy(value)) = self.kind(id) else {
                continue;
            };
            let pinned = match value {
                IrValue::Local(_) => true,
                IrValue::Node(node) => *node == id || self.kind(*node).is_some_and(NodeKind::is_phi),
                IrValue::Const(_) => false,
            };
            if pinned {
                continue;
            }
            let value = value.clone();
            self.replace_uses(id, &value);
            self.remove_node(id);
            removed += 1;
        }
        removed
    }

    /// Removes side-effect free nodes nobody uses, until none is left.
    ///
    /// Returns the number of nodes removed.
    pub fn remove_dead_nodes(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let uses = self.use_counts();
            let dead: Vec<ValueId> = self
                .node_ids()
                .into_iter()
                .filter(|id| {
                    self.kind(*id)
                        .is_some_and(|kind| !kind.has_side_effects() && !uses.contains_key(id))
                })
                .collect();
            if dead.is_empty() {
                return removed;
            }
            for id in dead {
                self.remove_node(id);
                removed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::ir::{
            BinaryOp, Constant, EdgeKind, IrFunction, IrValue, NodeKind, PhiInput, Terminator,
        },
        metadata::{MethodFlags, MethodId},
    };

    #[test]
    fn test_single_input_phi_collapses() {
        let mut function = IrFunction::new(MethodId(1), 0, MethodFlags::empty(), 1);
        let block = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(block)).unwrap();
        let phi = function
            .append_node(
                block,
                NodeKind::Phi(vec![PhiInput {
                    value: IrValue::Const(Constant::Int(3)),
                    from: entry,
                    kind: EdgeKind::Default,
                }]),
            )
            .unwrap();
        function
            .set_terminator(block, Terminator::Return(Some(IrValue::Node(phi))))
            .unwrap();

        assert_eq!(function.remove_trivial_phis(), 1);
        assert_eq!(
            function.block(block).unwrap().terminator(),
            &Terminator::Return(Some(IrValue::Const(Constant::Int(3))))
        );
    }

    #[test]
    fn test_dead_nodes_cascade() {
        let mut function = IrFunction::new(MethodId(1), 1, MethodFlags::empty(), 2);
        let block = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(block)).unwrap();
        let a = function
            .append_node(
                block,
                NodeKind::Binary {
                    op: BinaryOp::Add,
                    lhs: IrValue::local(1, 0),
                    rhs: IrValue::Const(Constant::Int(1)),
                },
            )
            .unwrap();
        function
            .append_node(
                block,
                NodeKind::Binary {
                    op: BinaryOp::Multiply,
                    lhs: IrValue::Node(a),
                    rhs: IrValue::Node(a),
                },
            )
            .unwrap();
        let copy = function
            .append_node(block, NodeKind::Copy(IrValue::local(1, 0)))
            .unwrap();
        function
            .set_terminator(block, Terminator::Return(Some(IrValue::Node(copy))))
            .unwrap();

        assert_eq!(function.remove_dead_nodes(), 2);
        assert_eq!(function.remove_redundant_copies(), 0);
        assert_eq!(function.block(block).unwrap().body(), &[copy]);
    }
}
