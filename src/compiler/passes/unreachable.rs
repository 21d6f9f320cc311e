//! Removal of unreachable instructions ahead of lifting.
//!
//! Compilers and obfuscators leave instructions behind that no path from the method
//! entry reaches: code after an unconditional jump, dead `lookupswitch` arms, or
//! whole blocks that were never wired in. Such code need not be stack consistent, so
//! it is removed from the [`Bytecode`] before the stack analyzer sees it.

use crate::{
    analysis::cfg::ControlFlowGraph,
    assembly::{Bytecode, InstrId},
    Result,
};

/// Removes every instruction `cfg` does not contain, then every exception handler
/// whose protected range became empty.
///
/// Markers bound to a removed instruction move to the next one, so the ranges of the
/// remaining handlers shrink to the code that is left. A dropped handler can orphan
/// its own entry code, so the graph is rebuilt and the sweep repeated until no
/// handler is dropped. Returns the number of instructions removed.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a handler marker is unbound or the remaining
/// code no longer forms a valid graph.
pub fn remove_unreachable_code(bytecode: &mut Bytecode, cfg: &ControlFlowGraph) -> Result<usize> {
    let mut removed = sweep(bytecode, cfg)?;
    let mut dropped = 0;
    loop {
        let empty = drop_empty_handlers(bytecode)?;
        if empty == 0 {
            break;
        }
        dropped += empty;
        let rebuilt = ControlFlowGraph::build(bytecode)?;
        removed += sweep(bytecode, &rebuilt)?;
    }

    if removed > 0 {
        log::debug!("removed {removed} unreachable instructions and {dropped} empty handlers");
    }
    Ok(removed)
}

fn sweep(bytecode: &mut Bytecode, cfg: &ControlFlowGraph) -> Result<usize> {
    let dead: Vec<InstrId> = bytecode
        .iter()
        .map(|(id, _)| id)
        .filter(|id| !cfg.contains(*id))
        .collect();
    for &id in &dead {
        bytecode.remove(id)?;
    }
    Ok(dead.len())
}

fn drop_empty_handlers(bytecode: &mut Bytecode) -> Result<usize> {
    let positions = bytecode.positions();
    let resolved = bytecode.resolved_handlers(&positions)?;
    let mut live = resolved.iter().map(|handler| handler.from < handler.to);
    let before = resolved.len();
    bytecode.handlers_mut().retain(|_| live.next().unwrap_or(false));
    Ok(before - bytecode.handlers().len())
}
