//! Relocatable branch targets.
//!
//! Branch operands never store byte offsets. They store a [`Marker`], an opaque label
//! that the [`MarkerTable`] binds to an instruction (or to the end of the code). Byte
//! offsets exist only at the boundaries of the pipeline:
//!
//! - while decoding, [`MarkerTable::put_marker_at`] hands out markers for raw offsets
//!   before the instruction at that offset has been read; [`MarkerTable::prepare_markers`]
//!   binds them once the whole stream is known
//! - while encoding, a [`Relocator`] records every branch field written with a
//!   placeholder and [`Relocator::solve`] rewrites the fields once every instruction
//!   has its final position
//!
//! Everything in between (passes, the emitter) moves and replaces instructions without
//! caring about offsets.

use rustc_hash::FxHashMap;
use std::fmt;

use crate::{
    assembly::{Bytecode, InstrId},
    utils::parser::{fits_s24, patch_s24},
    Error, Result,
};

/// An opaque, relocatable branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marker(pub(crate) u32);

impl Marker {
    /// The raw index of this marker within its table.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// The position a marker resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// The start of an instruction
    Instr(InstrId),
    /// The end of the code, one past the last instruction
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// Created by `put_marker_at`, waiting for `prepare_markers`
    Pending(u32),
    /// Created but not yet placed
    Unbound,
    Bound(Anchor),
}

/// The marker table of one [`Bytecode`].
///
/// Each marker is bound to at most one anchor. Several markers may share an anchor
/// after instructions are removed; [`MarkerTable::marker_for`] returns the canonical one.
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    bindings: Vec<Binding>,
    by_anchor: FxHashMap<Anchor, Marker>,
    by_offset: FxHashMap<u32, Marker>,
}

impl MarkerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if no marker was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn allocate(&mut self, binding: Binding) -> Marker {
        let marker = Marker(self.bindings.len() as u32);
        self.bindings.push(binding);
        marker
    }

    /// Returns the marker of `anchor`, creating one if the anchor has none yet.
    pub fn mark(&mut self, anchor: Anchor) -> Marker {
        if let Some(&marker) = self.by_anchor.get(&anchor) {
            return marker;
        }

        let marker = self.allocate(Binding::Bound(anchor));
        self.by_anchor.insert(anchor, marker);
        marker
    }

    /// Creates a marker that is not bound to anything yet.
    ///
    /// Used by the assembler for forward references; see [`MarkerTable::bind`].
    pub fn fresh(&mut self) -> Marker {
        self.allocate(Binding::Unbound)
    }

    /// Binds `marker` to `anchor`, replacing any previous binding.
    pub fn bind(&mut self, marker: Marker, anchor: Anchor) {
        if let Some(binding) = self.bindings.get_mut(marker.index()) {
            *binding = Binding::Bound(anchor);
            self.by_anchor.entry(anchor).or_insert(marker);
        }
    }

    /// Returns the marker for a raw byte offset, to be bound by [`MarkerTable::prepare_markers`].
    ///
    /// Repeated calls with the same offset return the same marker.
    pub fn put_marker_at(&mut self, offset: u32) -> Marker {
        if let Some(&marker) = self.by_offset.get(&offset) {
            return marker;
        }

        let marker = self.allocate(Binding::Pending(offset));
        self.by_offset.insert(offset, marker);
        marker
    }

    /// Binds every marker created by [`MarkerTable::put_marker_at`].
    ///
    /// # Arguments
    ///
    /// * `offsets` - Start offset of every decoded instruction
    /// * `code_len` - Length of the code; this offset binds to [`Anchor::End`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if an offset does not start an instruction.
    pub fn prepare_markers(
        &mut self,
        offsets: &FxHashMap<u32, InstrId>,
        code_len: u32,
    ) -> Result<()> {
        for index in 0..self.bindings.len() {
            let Binding::Pending(offset) = self.bindings[index] else {
                continue;
            };

            let anchor = if offset == code_len {
                Anchor::End
            } else {
                match offsets.get(&offset) {
                    Some(&id) => Anchor::Instr(id),
                    None => {
                        return Err(codec_error!(
                            offset as usize,
                            "branch target {} is not an instruction boundary",
                            offset
                        ))
                    }
                }
            };

            let marker = Marker(index as u32);
            self.bindings[index] = Binding::Bound(anchor);
            self.by_anchor.entry(anchor).or_insert(marker);
        }

        self.by_offset.clear();
        Ok(())
    }

    /// Returns the canonical marker already attached to `anchor`.
    #[must_use]
    pub fn marker_for(&self, anchor: Anchor) -> Option<Marker> {
        self.by_anchor.get(&anchor).copied()
    }

    /// Returns the anchor `marker` is bound to.
    #[must_use]
    pub fn target_of(&self, marker: Marker) -> Option<Anchor> {
        match self.bindings.get(marker.index()) {
            Some(Binding::Bound(anchor)) => Some(*anchor),
            _ => None,
        }
    }

    /// Moves every marker bound to `from` over to `to`.
    pub fn rebind(&mut self, from: Anchor, to: Anchor) {
        if from == to {
            return;
        }

        let Some(canonical) = self.by_anchor.remove(&from) else {
            return;
        };

        for binding in &mut self.bindings {
            if *binding == Binding::Bound(from) {
                *binding = Binding::Bound(to);
            }
        }
        self.by_anchor.entry(to).or_insert(canonical);
    }

    /// Returns `true` if any marker is still waiting for [`MarkerTable::prepare_markers`].
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.bindings
            .iter()
            .any(|binding| matches!(binding, Binding::Pending(_)))
    }
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Byte position of the 24-bit field
    field: usize,
    /// Offset the relative value is computed from
    base: usize,
    marker: Marker,
}

/// Pending branch fields of one encoding run.
#[derive(Debug, Default)]
pub struct Relocator {
    fixups: Vec<Fixup>,
}

impl Relocator {
    /// Creates an empty relocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a 24-bit branch field.
    ///
    /// # Arguments
    ///
    /// * `field` - Byte position of the placeholder field
    /// * `base` - Byte position the relative offset is measured from
    /// * `marker` - Branch target
    pub fn patch(&mut self, field: usize, base: usize, marker: Marker) {
        self.fixups.push(Fixup {
            field,
            base,
            marker,
        });
    }

    /// Number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    /// Returns `true` if no field was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    /// Rewrites every registered field with its final relative offset.
    ///
    /// # Arguments
    ///
    /// * `code` - The encoded code with placeholder fields
    /// * `bytecode` - The instruction stream that was encoded, for marker resolution and dumps
    /// * `offsets` - Final byte position of every instruction
    ///
    /// # Errors
    ///
    /// Returns [`Error::Relocation`] if a marker is unbound, points at a removed
    /// instruction, or the offset does not fit into 24 bits.
    pub fn solve(
        self,
        code: &mut [u8],
        bytecode: &Bytecode,
        offsets: &FxHashMap<InstrId, usize>,
    ) -> Result<()> {
        let end = code.len();

        for fixup in self.fixups {
            let target = match bytecode.markers().target_of(fixup.marker) {
                Some(Anchor::Instr(id)) => offsets.get(&id).copied(),
                Some(Anchor::End) => Some(end),
                None => None,
            };

            let Some(target) = target else {
                return Err(Error::Relocation {
                    message: format!("marker {} does not resolve to an instruction", fixup.marker),
                    dump: bytecode.dump(),
                });
            };

            let relative = target as i64 - fixup.base as i64;
            if !fits_s24(relative) {
                return Err(Error::Relocation {
                    message: format!(
                        "branch to {} at byte {} is out of 24-bit range ({})",
                        fixup.marker, fixup.field, relative
                    ),
                    dump: bytecode.dump(),
                });
            }

            patch_s24(code, fixup.field, relative as i32)?;
        }

        Ok(())
    }
}
