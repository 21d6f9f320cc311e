//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! A strongly connected component is a maximal set of vertices such that there is a
//! path from every vertex to every other vertex in the set. Non-trivial components of
//! a control-flow graph are its loop bodies, which is what loop-invariant code motion
//! walks.
//!
//! The implementation keeps Tarjan's bookkeeping in an explicit frame stack instead of
//! recursing, so deeply nested or very long control flow cannot overflow the call stack.

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of `graph`.
///
/// Components are returned in reverse topological order of the condensation: a
/// component is emitted only after every component reachable from it.
///
/// # Arguments
///
/// * `graph` - Any graph implementing [`Successors`]
///
/// # Returns
///
/// One vector of nodes per component. Every node of the graph appears in exactly one
/// component, including isolated ones.
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    if node_count == 0 {
        return Vec::new();
    }

    let mut state = TarjanState::new(node_count);
    for node in graph.node_ids() {
        if state.index[node.index()].is_none() {
            state.strongconnect(graph, node);
        }
    }

    state.sccs
}

/// Returns `true` if `scc` forms a cycle: more than one node, or a single node with a self-edge.
pub fn is_cyclic<G: Successors>(graph: &G, scc: &[NodeId]) -> bool {
    match scc {
        [] => false,
        [single] => graph.successors(*single).any(|succ| succ == *single),
        _ => true,
    }
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    current_index: usize,
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn visit(&mut self, v: NodeId) {
        let v_idx = v.index();
        self.index[v_idx] = Some(self.current_index);
        self.lowlink[v_idx] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v_idx] = true;
    }

    fn strongconnect<G: Successors>(&mut self, graph: &G, root: NodeId) {
        // Each frame holds a node and its not yet examined successors
        let mut frames: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

        self.visit(root);
        frames.push((root, graph.successors(root).collect()));

        while let Some((v, pending)) = frames.last_mut() {
            let v = *v;
            let v_idx = v.index();

            if let Some(w) = pending.pop() {
                let w_idx = w.index();
                if w_idx >= self.index.len() {
                    continue;
                }

                match self.index[w_idx] {
                    None => {
                        self.visit(w);
                        frames.push((w, graph.successors(w).collect()));
                    }
                    Some(w_index) if self.on_stack[w_idx] => {
                        self.lowlink[v_idx] = self.lowlink[v_idx].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some((parent, _)) = frames.last() {
                let p_idx = parent.index();
                self.lowlink[p_idx] = self.lowlink[p_idx].min(self.lowlink[v_idx]);
            }

            // If v is a root node, pop the stack and generate an SCC
            if Some(self.lowlink[v_idx]) == self.index[v_idx] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn as_sets(sccs: Vec<Vec<NodeId>>) -> Vec<HashSet<NodeId>> {
        sccs.into_iter().map(|scc| scc.into_iter().collect()).collect()
    }

    #[test]
    fn test_scc_acyclic() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(b, c, ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 3);
        assert!(sccs.iter().all(|scc| !is_cyclic(&graph, scc)));
        // Reverse topological order: sink first
        assert_eq!(sccs[0], vec![c]);
    }

    #[test]
    fn test_scc_loop_with_nested_loop() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let entry = graph.add_node(());
        let header = graph.add_node(());
        let inner = graph.add_node(());
        let latch = graph.add_node(());
        let exit = graph.add_node(());
        graph.add_edge(entry, header, ()).unwrap();
        graph.add_edge(header, inner, ()).unwrap();
        graph.add_edge(inner, inner, ()).unwrap();
        graph.add_edge(inner, latch, ()).unwrap();
        graph.add_edge(latch, header, ()).unwrap();
        graph.add_edge(header, exit, ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        let sets = as_sets(sccs.clone());
        let expected: HashSet<NodeId> = [header, inner, latch].into_iter().collect();
        assert!(sets.contains(&expected));

        let cyclic: Vec<_> = sccs.iter().filter(|scc| is_cyclic(&graph, scc)).collect();
        assert_eq!(cyclic.len(), 1);
    }

    #[test]
    fn test_scc_self_loop() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        graph.add_edge(a, a, ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert!(is_cyclic(&graph, &sccs[0]));
    }

    #[test]
    fn test_scc_long_chain_does_not_recurse() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let nodes: Vec<_> = (0..100_000).map(|_| graph.add_node(())).collect();
        for pair in nodes.windows(2) {
            graph.add_edge(pair[0], pair[1], ()).unwrap();
        }
        graph.add_edge(nodes[nodes.len() - 1], nodes[0], ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 100_000);
    }
}
