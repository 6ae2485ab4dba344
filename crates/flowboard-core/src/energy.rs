//! Energy propagation over the node graph.
//!
//! Each node has a base energy in [0, 100]. Enabled edges carry the source's
//! effective energy into the target, limited by the target's headroom
//! (`100 - base`). The graph may contain cycles, so the values are found by
//! fixed-point relaxation with a hard iteration cap.

use crate::entities::{Edge, Node, clamp_percent};
use std::collections::{BTreeMap, HashMap};

/// Upper bound on relaxation rounds.
pub const MAX_ITERATIONS: usize = 20;

/// Effective value per node id.
pub type EnergyMap = BTreeMap<String, f64>;

/// Switches that change which edges carry energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnergyMode {
    /// Finished tasks stop feeding their targets.
    pub block_done_tasks: bool,
}

impl EnergyMode {
    /// The monitoring view: completed work no longer pushes energy downstream.
    pub fn monitoring() -> Self {
        Self { block_done_tasks: true }
    }
}

/// Outcome of a relaxation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    pub values: EnergyMap,
    /// Rounds executed, including the one that detected stability.
    pub iterations: usize,
    /// Whether the values stopped changing before the cap.
    pub converged: bool,
}

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Node ids mapped to dense indices, with per-node incoming sources.
struct Graph<'a> {
    nodes: &'a [Node],
    index: HashMap<&'a str, usize>,
}

impl<'a> Graph<'a> {
    fn new(nodes: &'a [Node]) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();
        Self { nodes, index }
    }

    /// Sources of every edge into each node, for edges passing `keep`.
    /// Edges with an endpoint outside the node set are ignored.
    fn incoming(&self, edges: &[Edge], keep: impl Fn(&Edge) -> bool) -> Vec<Vec<usize>> {
        let mut incoming = vec![Vec::new(); self.nodes.len()];
        for edge in edges.iter().filter(|edge| keep(edge)) {
            if let (Some(&source), Some(&target)) =
                (self.index.get(edge.source.as_str()), self.index.get(edge.target.as_str()))
            {
                incoming[target].push(source);
            }
        }
        incoming
    }

    fn into_map(&self, values: Vec<f64>) -> EnergyMap {
        self.nodes
            .iter()
            .zip(values)
            .map(|(node, value)| (node.id.clone(), value))
            .collect()
    }
}

/// Run `step` until the values stop changing or the cap is hit.
fn relax(initial: Vec<f64>, step: impl Fn(&[f64]) -> Vec<f64>) -> (Vec<f64>, usize, bool) {
    let mut current = initial;
    for iteration in 1..=MAX_ITERATIONS {
        let next = step(&current);
        let stable = next == current;
        current = next;
        if stable {
            return (current, iteration, true);
        }
    }
    (current, MAX_ITERATIONS, false)
}

/// Effective progress per node.
///
/// Tasks flagged `childProgress` take the mean effective progress of the task
/// nodes feeding them; without such sources, or for every other node, the
/// node's own progress is used.
pub fn effective_progress(nodes: &[Node], edges: &[Edge]) -> EnergyMap {
    let graph = Graph::new(nodes);
    let incoming = graph.incoming(edges, |_| true);
    let base: Vec<f64> = nodes.iter().map(|node| clamp_percent(node.progress)).collect();
    let sources: Vec<Vec<usize>> = nodes
        .iter()
        .zip(incoming)
        .map(|(node, sources)| {
            if node.is_task() && node.child_progress {
                sources.into_iter().filter(|&s| nodes[s].is_task()).collect()
            } else {
                Vec::new()
            }
        })
        .collect();

    let (values, _, _) = relax(base.clone(), |current| {
        sources
            .iter()
            .enumerate()
            .map(|(i, from)| {
                if from.is_empty() {
                    base[i]
                } else {
                    from.iter().map(|&s| current[s]).sum::<f64>() / from.len() as f64
                }
            })
            .collect()
    });
    graph.into_map(values)
}

/// Relax energies and report how the run went.
pub fn propagate(nodes: &[Node], edges: &[Edge], mode: EnergyMode) -> Propagation {
    let graph = Graph::new(nodes);
    let incoming = graph.incoming(edges, |edge| edge.energy_enabled);

    let blocked: Vec<bool> = if mode.block_done_tasks {
        let progress = effective_progress(nodes, edges);
        nodes
            .iter()
            .map(|node| {
                node.is_done()
                    || (node.is_task() && progress.get(&node.id).is_some_and(|&p| p >= 100.0))
            })
            .collect()
    } else {
        vec![false; nodes.len()]
    };

    let base: Vec<f64> = nodes.iter().map(|node| clamp_percent(node.energy)).collect();
    let (values, iterations, converged) = relax(base.clone(), |current| {
        incoming
            .iter()
            .enumerate()
            .map(|(i, sources)| {
                let received: f64 = sources
                    .iter()
                    .filter(|&&s| !blocked[s])
                    .map(|&s| relu(current[s]))
                    .sum();
                let headroom = (100.0 - base[i]).max(0.0);
                clamp_percent(base[i] + received.min(headroom))
            })
            .collect()
    });

    if !converged {
        log::debug!("energy propagation hit the {} round cap", MAX_ITERATIONS);
    }
    Propagation {
        values: graph.into_map(values),
        iterations,
        converged,
    }
}

/// Effective energy per node id.
pub fn effective_energy(nodes: &[Node], edges: &[Edge], mode: EnergyMode) -> EnergyMap {
    propagate(nodes, edges, mode).values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, energy: f64) -> Node {
        Node::task(id, 0.0, 0.0).with_id(id).with_energy(energy)
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new(source, target)
    }

    #[test]
    fn test_headroom_caps_incoming() {
        let nodes = vec![node("n1", 30.0), node("n2", 90.0)];
        let edges = vec![edge("n1", "n2")];
        let energy = effective_energy(&nodes, &edges, EnergyMode::default());
        assert_eq!(energy["n1"], 30.0);
        assert_eq!(energy["n2"], 100.0);
    }

    #[test]
    fn test_chain_adds_source_energy() {
        let nodes = vec![node("a", 80.0), node("b", 50.0)];
        let energy = effective_energy(&nodes, &[edge("a", "b")], EnergyMode::default());
        assert_eq!(energy["a"], 80.0);
        assert_eq!(energy["b"], (50.0_f64 + relu(energy["a"])).min(100.0));

        let nodes = vec![node("a", 20.0), node("b", 50.0)];
        let energy = effective_energy(&nodes, &[edge("a", "b")], EnergyMode::default());
        assert_eq!(energy["b"], 70.0);
    }

    #[test]
    fn test_cycle_terminates_and_is_stable() {
        let nodes = vec![node("a", 10.0), node("b", 10.0), node("c", 10.0)];
        let edges = vec![edge("a", "b"), edge("b", "c"), edge("c", "a")];
        let run = propagate(&nodes, &edges, EnergyMode::default());
        assert!(run.converged);
        assert!(run.iterations <= MAX_ITERATIONS);
        assert_eq!(run.values.len(), 3);
        for value in run.values.values() {
            assert_eq!(*value, 100.0);
        }
        assert_eq!(run, propagate(&nodes, &edges, EnergyMode::default()));
    }

    #[test]
    fn test_disabled_edges_carry_nothing() {
        let nodes = vec![node("a", 40.0), node("b", 10.0)];
        let mut off = edge("a", "b");
        off.energy_enabled = false;
        let energy = effective_energy(&nodes, &[off], EnergyMode::default());
        assert_eq!(energy["b"], 10.0);
    }

    #[test]
    fn test_fan_in_sums_sources() {
        let nodes = vec![node("a", 10.0), node("b", 15.0), node("c", 5.0)];
        let edges = vec![edge("a", "c"), edge("b", "c")];
        let energy = effective_energy(&nodes, &edges, EnergyMode::default());
        assert_eq!(energy["c"], 30.0);
    }

    #[test]
    fn test_monitoring_blocks_done_tasks() {
        let nodes = vec![node("done", 60.0).with_progress(100.0), node("t", 10.0)];
        let edges = vec![edge("done", "t")];
        assert_eq!(effective_energy(&nodes, &edges, EnergyMode::default())["t"], 70.0);
        assert_eq!(effective_energy(&nodes, &edges, EnergyMode::monitoring())["t"], 10.0);
    }

    #[test]
    fn test_ideas_are_never_blocked() {
        let mut idea = Node::idea("i", 0.0, 0.0).with_id("i").with_energy(20.0);
        idea.progress = 100.0;
        let nodes = vec![idea, node("t", 0.0)];
        let energy = effective_energy(&nodes, &[edge("i", "t")], EnergyMode::monitoring());
        assert_eq!(energy["t"], 20.0);
    }

    #[test]
    fn test_dangling_edges_are_ignored() {
        let nodes = vec![node("a", 5.0)];
        let energy = effective_energy(&nodes, &[edge("ghost", "a")], EnergyMode::default());
        assert_eq!(energy["a"], 5.0);
    }

    #[test]
    fn test_child_progress_is_mean_of_task_sources() {
        let mut parent = node("p", 0.0);
        parent.child_progress = true;
        parent.progress = 5.0;
        let nodes = vec![
            node("c1", 0.0).with_progress(100.0),
            node("c2", 0.0).with_progress(50.0),
            Node::idea("i", 0.0, 0.0).with_id("i"),
            parent,
        ];
        let edges = vec![edge("c1", "p"), edge("c2", "p"), edge("i", "p")];
        let progress = effective_progress(&nodes, &edges);
        assert_eq!(progress["p"], 75.0);
        assert_eq!(progress["c2"], 50.0);
    }

    #[test]
    fn test_derived_done_parent_is_blocked() {
        let mut parent = node("p", 40.0);
        parent.child_progress = true;
        let nodes = vec![node("c", 0.0).with_progress(100.0), parent, node("down", 0.0)];
        let edges = vec![edge("c", "p"), edge("p", "down")];
        let energy = effective_energy(&nodes, &edges, EnergyMode::monitoring());
        assert_eq!(energy["down"], 0.0);
    }
}
