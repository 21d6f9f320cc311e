//! The mutable instruction container.
//!
//! [`Bytecode`] owns an ordered list of instructions, the [`MarkerTable`] their branch
//! operands refer to, and the method's exception handlers. Every instruction receives a
//! stable [`InstrId`] when it is added; ids survive insertions and removals, so graphs
//! built over the code can refer to instructions without holding positions.

use rustc_hash::FxHashMap;
use std::fmt::{self, Write};

use crate::{
    assembly::{Anchor, Instruction, Marker, MarkerTable, Opcode, Operands},
    Result,
};

/// Stable identity of an instruction within one [`Bytecode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// The raw id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// An exception handler over a marker-delimited range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// First protected instruction
    pub from: Marker,
    /// First instruction after the protected range
    pub to: Marker,
    /// Handler entry
    pub target: Marker,
    /// Multiname index of the caught type, `0` for "any"
    pub exc_type: u32,
    /// Multiname index of the catch variable, `0` for none
    pub var_name: u32,
}

/// An instruction with its branch targets replaced by instruction positions.
///
/// A target equal to the instruction count denotes the end of the code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedInstruction {
    /// The opcode
    pub opcode: Opcode,
    /// The operands, with positions as labels
    pub operands: Operands<usize>,
}

/// An exception handler with its markers replaced by instruction positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedHandler {
    /// First protected position
    pub from: usize,
    /// First position after the protected range
    pub to: usize,
    /// Handler entry position
    pub target: usize,
    /// Caught type
    pub exc_type: u32,
    /// Catch variable
    pub var_name: u32,
}

/// An ordered, mutable instruction stream.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    instructions: Vec<(InstrId, Instruction)>,
    markers: MarkerTable,
    handlers: Vec<ExceptionHandler>,
    next_id: u32,
}

impl Bytecode {
    /// Creates an empty instruction stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn allocate_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Appends an instruction and returns its id.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.allocate_id();
        self.instructions.push((id, instruction));
        id
    }

    /// Inserts an instruction at `position`, shifting the following ones.
    ///
    /// Markers keep pointing at the instructions they were bound to; an instruction
    /// inserted in front of a branch target is therefore skipped by that branch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if `position > len()`.
    pub fn insert(&mut self, position: usize, instruction: Instruction) -> Result<InstrId> {
        if position > self.instructions.len() {
            return Err(out_of_bounds_error!());
        }

        let id = self.allocate_id();
        self.instructions.insert(position, (id, instruction));
        Ok(id)
    }

    /// Replaces the instruction `id` in place, keeping its id and markers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `id` is not part of this stream.
    pub fn replace(&mut self, id: InstrId, instruction: Instruction) -> Result<Instruction> {
        let position = self
            .position(id)
            .ok_or_else(|| malformed_error!("instruction {} does not exist", id))?;

        Ok(std::mem::replace(
            &mut self.instructions[position].1,
            instruction,
        ))
    }

    /// Removes the instruction `id`.
    ///
    /// Markers bound to it move to the following instruction, or to the end of the code
    /// when it was the last one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `id` is not part of this stream.
    pub fn remove(&mut self, id: InstrId) -> Result<Instruction> {
        let position = self
            .position(id)
            .ok_or_else(|| malformed_error!("instruction {} does not exist", id))?;

        let next = self
            .instructions
            .get(position + 1)
            .map_or(Anchor::End, |(next, _)| Anchor::Instr(*next));
        self.markers.rebind(Anchor::Instr(id), next);

        Ok(self.instructions.remove(position).1)
    }

    /// Returns the instruction with id `id`.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.position(id).map(|position| &self.instructions[position].1)
    }

    /// Returns the id and instruction at `position`.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<(InstrId, &Instruction)> {
        self.instructions
            .get(position)
            .map(|(id, instruction)| (*id, instruction))
    }

    /// Position of instruction `id`, found by a linear scan.
    ///
    /// Callers doing many lookups should use [`Bytecode::positions`].
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|(other, _)| *other == id)
    }

    /// Map from instruction id to position.
    #[must_use]
    pub fn positions(&self) -> FxHashMap<InstrId, usize> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (*id, position))
            .collect()
    }

    /// Iterates over the instructions in order.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.instructions
            .iter()
            .map(|(id, instruction)| (*id, instruction))
    }

    /// Returns the marker table.
    #[must_use]
    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    /// Returns the marker table for modification.
    pub fn markers_mut(&mut self) -> &mut MarkerTable {
        &mut self.markers
    }

    /// Returns a marker for `anchor`, creating one if needed.
    pub fn mark(&mut self, anchor: Anchor) -> Marker {
        self.markers.mark(anchor)
    }

    /// Resolves `marker` to an instruction position, `len()` for the end of the code.
    #[must_use]
    pub fn resolve(&self, marker: Marker, positions: &FxHashMap<InstrId, usize>) -> Option<usize> {
        match self.markers.target_of(marker)? {
            Anchor::Instr(id) => positions.get(&id).copied(),
            Anchor::End => Some(self.instructions.len()),
        }
    }

    /// Returns the exception handlers, innermost first.
    #[must_use]
    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    /// Returns the exception handlers for modification.
    pub fn handlers_mut(&mut self) -> &mut Vec<ExceptionHandler> {
        &mut self.handlers
    }

    /// Appends an exception handler.
    pub fn add_handler(&mut self, handler: ExceptionHandler) {
        self.handlers.push(handler);
    }

    /// Resolves every handler to instruction positions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a handler marker is unbound.
    pub fn resolved_handlers(
        &self,
        positions: &FxHashMap<InstrId, usize>,
    ) -> Result<Vec<ResolvedHandler>> {
        self.handlers
            .iter()
            .map(|handler| {
                let resolve = |marker: Marker| {
                    self.resolve(marker, positions).ok_or_else(|| {
                        malformed_error!("exception handler marker {} is unbound", marker)
                    })
                };
                Ok(ResolvedHandler {
                    from: resolve(handler.from)?,
                    to: resolve(handler.to)?,
                    target: resolve(handler.target)?,
                    exc_type: handler.exc_type,
                    var_name: handler.var_name,
                })
            })
            .collect()
    }

    /// The instruction stream with markers replaced by positions.
    ///
    /// Two streams with equal listings are the same program up to marker identity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a branch marker is unbound.
    pub fn resolved_listing(&self) -> Result<Vec<ResolvedInstruction>> {
        let positions = self.positions();
        let mut listing = Vec::with_capacity(self.instructions.len());

        for (id, instruction) in &self.instructions {
            let mut unbound = None;
            let operands = instruction.operands.map_labels(|marker| {
                self.resolve(*marker, &positions).unwrap_or_else(|| {
                    unbound = Some(*marker);
                    usize::MAX
                })
            });
            if let Some(marker) = unbound {
                return Err(malformed_error!(
                    "{} at {} branches to unbound marker {}",
                    instruction.opcode,
                    id,
                    marker
                ));
            }

            listing.push(ResolvedInstruction {
                opcode: instruction.opcode,
                operands,
            });
        }

        Ok(listing)
    }

    /// A human-readable listing of the stream.
    ///
    /// Each line shows the position, the labels bound to that instruction and the
    /// instruction. Unbound branch markers are flagged with `?`.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut labels: FxHashMap<Anchor, Vec<Marker>> = FxHashMap::default();
        for index in 0..self.markers.len() {
            let marker = Marker(index as u32);
            if let Some(anchor) = self.markers.target_of(marker) {
                labels.entry(anchor).or_default().push(marker);
            }
        }

        let mut out = String::new();
        for (position, (id, instruction)) in self.instructions.iter().enumerate() {
            if let Some(markers) = labels.get(&Anchor::Instr(*id)) {
                for marker in markers {
                    let _ = writeln!(out, "{marker}:");
                }
            }

            let _ = write!(out, "  {position:4}  {instruction}");
            for target in instruction.targets() {
                if self.markers.target_of(target).is_none() {
                    let _ = write!(out, "  ; {target}?");
                }
            }
            out.push('\n');
        }

        if let Some(markers) = labels.get(&Anchor::End) {
            for marker in markers {
                let _ = writeln!(out, "{marker}:");
            }
        }
        for (index, handler) in self.handlers.iter().enumerate() {
            let _ = writeln!(
                out,
                "  handler {index}: {} .. {} -> {} (type {}, var {})",
                handler.from, handler.to, handler.target, handler.exc_type, handler.var_name
            );
        }

        out
    }
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Opcode;

    #[test]
    fn test_remove_rebinds_markers() {
        let mut code = Bytecode::new();
        let first = code.push(Instruction::simple(Opcode::Nop));
        let second = code.push(Instruction::simple(Opcode::ReturnVoid));
        let to_first = code.mark(Anchor::Instr(first));
        let to_second = code.mark(Anchor::Instr(second));

        code.remove(first).unwrap();
        assert_eq!(code.markers().target_of(to_first), Some(Anchor::Instr(second)));

        code.remove(second).unwrap();
        assert_eq!(code.markers().target_of(to_first), Some(Anchor::End));
        assert_eq!(code.markers().target_of(to_second), Some(Anchor::End));
        assert!(code.is_empty());
    }

    #[test]
    fn test_resolved_listing() {
        let mut code = Bytecode::new();
        let top = code.push(Instruction::simple(Opcode::Label));
        let target = code.mark(Anchor::Instr(top));
        code.push(Instruction::branch(Opcode::Jump, target));

        let listing = code.resolved_listing().unwrap();
        assert_eq!(listing[1].operands, Operands::Branch(0));
    }

    #[test]
    fn test_dump_flags_unbound_markers() {
        let mut code = Bytecode::new();
        let dangling = code.markers_mut().fresh();
        code.push(Instruction::branch(Opcode::Jump, dangling));

        let dump = code.dump();
        assert!(dump.contains("jump L0"));
        assert!(dump.contains("L0?"));
        assert!(code.resolved_listing().is_err());
    }

    #[test]
    fn test_insert_and_replace_keep_ids() {
        let mut code = Bytecode::new();
        let ret = code.push(Instruction::simple(Opcode::ReturnVoid));
        let nop = code.insert(0, Instruction::simple(Opcode::Nop)).unwrap();

        assert_eq!(code.position(ret), Some(1));
        code.replace(nop, Instruction::simple(Opcode::Label)).unwrap();
        assert_eq!(code.at(0).map(|(_, i)| i.opcode), Some(Opcode::Label));
        assert!(code.insert(5, Instruction::simple(Opcode::Nop)).is_err());
    }
}
