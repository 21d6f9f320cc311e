//! Reduction of the block graph and the final path walk.
//!
//! Phase B repeatedly applies three rewrites, each of which keeps an upper bound of
//! every path's maximum:
//!
//! - a block with a single successor whose only predecessor it is absorbs that successor
//! - a block without predecessors that is not a root is deleted
//! - sibling blocks with the same single predecessor and the same successor set collapse
//!   into one block with the component-wise maximum summary; a direct edge from the
//!   predecessor to the shared successor counts as an empty sibling
//!
//! Phase C enumerates the simple paths of what remains. The walk is capped; past the cap
//! the bound falls back to the sum of all positive nets plus the largest peak, which no
//! simple path can exceed.

use std::collections::BTreeSet;

use crate::analysis::stack::{
    blocks::{BlockGraph, BlockSummary},
    StackBounds,
};

/// Index of the synthetic root joining all real roots.
const ROOT: usize = 0;

#[derive(Debug, Clone)]
struct ReducedGraph {
    summaries: Vec<Option<BlockSummary>>,
    succs: Vec<BTreeSet<usize>>,
    preds: Vec<BTreeSet<usize>>,
}

impl ReducedGraph {
    /// Builds the reduction graph. Node `0` is a synthetic root; root blocks are
    /// entered through a prefix node holding their initial depth.
    fn new(blocks: &BlockGraph) -> Self {
        let offset = 1 + blocks.roots.len();
        let count = offset + blocks.len();
        let mut graph = ReducedGraph {
            summaries: vec![Some(BlockSummary::default()); count],
            succs: vec![BTreeSet::new(); count],
            preds: vec![BTreeSet::new(); count],
        };

        for (index, (block, initial)) in blocks.roots.iter().enumerate() {
            let prefix = 1 + index;
            graph.summaries[prefix] = Some(*initial);
            graph.add_edge(ROOT, prefix);
            graph.add_edge(prefix, offset + block);
        }
        for (block, summary) in blocks.summaries.iter().enumerate() {
            graph.summaries[offset + block] = Some(*summary);
            for succ in &blocks.successors[block] {
                graph.add_edge(offset + block, offset + succ);
            }
        }

        graph
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        self.succs[from].insert(to);
        self.preds[to].insert(from);
    }

    fn remove_edge(&mut self, from: usize, to: usize) {
        self.succs[from].remove(&to);
        self.preds[to].remove(&from);
    }

    fn remove_node(&mut self, node: usize) {
        for succ in std::mem::take(&mut self.succs[node]) {
            self.preds[succ].remove(&node);
        }
        for pred in std::mem::take(&mut self.preds[node]) {
            self.succs[pred].remove(&node);
        }
        self.summaries[node] = None;
    }

    fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.summaries.len()).filter(|&node| self.summaries[node].is_some())
    }

    fn summary(&self, node: usize) -> BlockSummary {
        self.summaries[node].unwrap_or_default()
    }

    /// `a -> b` where `a` has no other successor and `b` no other predecessor.
    fn merge_chains(&mut self) -> bool {
        let mut changed = false;
        for a in 0..self.summaries.len() {
            while self.summaries[a].is_some() && self.succs[a].len() == 1 {
                let Some(&b) = self.succs[a].iter().next() else {
                    break;
                };
                if b == a || b == ROOT || self.preds[b].len() != 1 {
                    break;
                }

                let merged = self.summary(a).then(self.summary(b));
                let next: Vec<usize> = self.succs[b].iter().copied().collect();
                self.remove_node(b);
                for succ in next {
                    // A self loop on `b` becomes a self loop on `a`
                    let succ = if succ == b { a } else { succ };
                    self.add_edge(a, succ);
                }
                self.summaries[a] = Some(merged);
                changed = true;
            }
        }
        changed
    }

    fn delete_orphans(&mut self) -> bool {
        let orphans: Vec<usize> = self
            .live()
            .filter(|&node| node != ROOT && self.preds[node].is_empty())
            .collect();
        for &node in &orphans {
            self.remove_node(node);
        }
        !orphans.is_empty()
    }

    /// Collapses siblings that branch off one block and meet again.
    fn collapse_fan_out(&mut self) -> bool {
        for a in 0..self.summaries.len() {
            if self.summaries[a].is_none() || self.succs[a].len() < 2 {
                continue;
            }

            let branches: Vec<usize> = self.succs[a]
                .iter()
                .copied()
                .filter(|&b| b != a && self.preds[b].len() == 1 && self.succs[b].len() <= 1)
                .collect();

            // Group the branches by their successor set
            let mut groups: Vec<(Option<usize>, Vec<usize>)> = Vec::new();
            for &b in &branches {
                let target = self.succs[b].iter().next().copied();
                if target == Some(b) {
                    continue;
                }
                match groups.iter_mut().find(|(t, _)| *t == target) {
                    Some((_, members)) => members.push(b),
                    None => groups.push((target, vec![b])),
                }
            }

            for (target, members) in groups {
                let direct = target.is_some_and(|t| self.succs[a].contains(&t));
                if members.len() + usize::from(direct) < 2 {
                    continue;
                }

                let keep = members[0];
                let mut joined = self.summary(keep);
                for &other in &members[1..] {
                    joined = joined.join(self.summary(other));
                    self.remove_node(other);
                }
                if direct {
                    joined = joined.join(BlockSummary::default());
                    if let Some(t) = target {
                        self.remove_edge(a, t);
                    }
                }
                self.summaries[keep] = Some(joined);
                return true;
            }
        }
        false
    }

    fn reduce(&mut self) {
        loop {
            let mut changed = self.merge_chains();
            changed |= self.delete_orphans();
            changed |= self.collapse_fan_out();
            if !changed {
                break;
            }
        }
    }

    /// Walks all simple paths from the root. Returns `None` once `budget` steps are used.
    fn walk_paths(&self, budget: usize) -> Option<(i64, i64)> {
        struct Frame {
            node: usize,
            stack: i64,
            scope: i64,
            pending: Vec<usize>,
        }

        let mut on_path = vec![false; self.summaries.len()];
        let mut best = (0i64, 0i64);
        let mut steps = 0usize;

        let root = self.summary(ROOT);
        on_path[ROOT] = true;
        let mut frames = vec![Frame {
            node: ROOT,
            stack: root.stack.net,
            scope: root.scope.net,
            pending: self.succs[ROOT].iter().copied().collect(),
        }];
        best = (best.0.max(root.stack.peak), best.1.max(root.scope.peak));

        while let Some(frame) = frames.last_mut() {
            let Some(next) = frame.pending.pop() else {
                on_path[frame.node] = false;
                frames.pop();
                continue;
            };
            if on_path[next] {
                continue;
            }

            steps += 1;
            if steps > budget {
                return None;
            }

            let (stack, scope) = (frame.stack, frame.scope);
            let summary = self.summary(next);
            best.0 = best.0.max(stack + summary.stack.peak);
            best.1 = best.1.max(scope + summary.scope.peak);

            on_path[next] = true;
            frames.push(Frame {
                node: next,
                stack: stack + summary.stack.net,
                scope: scope + summary.scope.net,
                pending: self.succs[next].iter().copied().collect(),
            });
        }

        Some(best)
    }

    /// An upper bound of every simple path, independent of the graph shape.
    fn coarse_bound(&self) -> (i64, i64) {
        let mut total = BlockSummary::default();
        let mut peaks = (0i64, 0i64);
        for node in self.live() {
            let summary = self.summary(node);
            total.stack.net += summary.stack.net.max(0);
            total.scope.net += summary.scope.net.max(0);
            peaks.0 = peaks.0.max(summary.stack.peak);
            peaks.1 = peaks.1.max(summary.scope.peak);
        }
        (total.stack.net + peaks.0, total.scope.net + peaks.1)
    }
}

/// Computes the stack bounds of a block graph (phases B and C).
///
/// `max_paths` caps the number of path steps phase C may take.
#[must_use]
pub fn reduce_and_walk(blocks: &BlockGraph, max_paths: usize) -> StackBounds {
    let mut graph = ReducedGraph::new(blocks);
    graph.reduce();

    let (stack, scope) = match graph.walk_paths(max_paths) {
        Some(bounds) => bounds,
        None => {
            log::debug!(
                "stack analysis exceeded {} path steps, using the coarse bound",
                max_paths
            );
            graph.coarse_bound()
        }
    };

    StackBounds {
        max_stack: clamp(stack),
        max_scope: clamp(scope),
    }
}

fn clamp(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
