use std::collections::BTreeMap;

use gv_ensemble::compose_remap;
use gv_graph::{Frame, Graph, NodeId};
use proptest::prelude::*;
use serde_json::json;

fn id(raw: u64) -> NodeId {
    serde_json::from_value(json!(raw)).expect("node id")
}

/// Resolve `node` by walking every step map in order, mapping where an entry
/// exists and keeping the id otherwise. The composed map must agree with this.
fn naive_resolve(node: NodeId, steps: &[BTreeMap<NodeId, NodeId>]) -> NodeId {
    steps
        .iter()
        .fold(node, |cur, step| step.get(&cur).copied().unwrap_or(cur))
}

#[test]
fn composing_rewrites_chained_entries() {
    // First union moves 1 -> 5, second moves 5 -> 9 and 2 -> 7.
    let first: BTreeMap<_, _> = [(id(1), id(5))].into_iter().collect();
    let second: BTreeMap<_, _> = [(id(5), id(9)), (id(2), id(7))].into_iter().collect();

    let composed = compose_remap(first, &second);
    assert_eq!(composed.get(&id(1)), Some(&id(9)));
    assert_eq!(composed.get(&id(2)), Some(&id(7)));
    // The intermediate id was consumed by the rewrite and is not a key of
    // the composed map; no dataset ever held it as an original id.
    assert_eq!(composed.get(&id(5)), None);
}

#[test]
fn unconsumed_step_entries_are_kept() {
    let first: BTreeMap<_, _> = [(id(1), id(5))].into_iter().collect();
    let second: BTreeMap<_, _> = [(id(3), id(6))].into_iter().collect();

    let composed = compose_remap(first, &second);
    assert_eq!(composed.get(&id(1)), Some(&id(5)));
    assert_eq!(composed.get(&id(3)), Some(&id(6)));
}

/// Grow a graph from call paths, identifying prefixes by frame name.
fn graph_from_paths(paths: &[Vec<u8>]) -> Graph {
    let mut graph = Graph::new();
    for path in paths {
        let mut cursor: Option<NodeId> = None;
        for step in path {
            let name = format!("f{step}");
            let existing = match cursor {
                None => graph.roots().iter().copied().find(|node| {
                    graph.frame(*node).is_some_and(|frame| frame.name() == name)
                }),
                Some(parent) => graph
                    .children(parent)
                    .unwrap_or(&[])
                    .iter()
                    .copied()
                    .find(|node| graph.frame(*node).is_some_and(|frame| frame.name() == name)),
            };
            cursor = Some(match existing {
                Some(node) => node,
                None => match cursor {
                    None => graph.add_root(Frame::new(name)),
                    Some(parent) => graph
                        .add_child(parent, Frame::new(name))
                        .expect("cursor is in the graph"),
                },
            });
        }
    }
    graph
}

fn paths_strategy() -> impl Strategy<Value = Vec<Vec<Vec<u8>>>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(0u8..4, 1..=4), 1..6),
        2..=4,
    )
}

proptest! {
    #[test]
    fn composed_map_matches_chained_lookup(all_paths in paths_strategy()) {
        let graphs: Vec<Graph> = all_paths.iter().map(|p| graph_from_paths(p)).collect();

        let mut union = graphs[0].clone();
        let mut steps = Vec::new();
        let mut composed = BTreeMap::new();
        for graph in &graphs[1..] {
            let (next, step) = union.union(graph).expect("well-formed inputs");
            composed = compose_remap(composed, &step);
            steps.push(step);
            union = next;
        }

        for graph in &graphs {
            for node in graph.node_ids() {
                let via_composed = composed.get(&node).copied().unwrap_or(node);
                let via_chain = naive_resolve(node, &steps);
                prop_assert_eq!(via_composed, via_chain);
                prop_assert!(union.contains(via_composed));
            }
        }
    }

    #[test]
    fn union_with_self_is_structurally_idempotent(paths in prop::collection::vec(prop::collection::vec(0u8..4, 1..=4), 1..6)) {
        let graph = graph_from_paths(&paths);
        let (merged, mapping) = graph.union(&graph).expect("well-formed input");
        prop_assert!(merged.structural_eq(&graph));
        // Every node maps onto itself when merging with an identical graph.
        for node in graph.node_ids() {
            prop_assert_eq!(mapping.get(&node).copied().unwrap_or(node), node);
        }
    }
}
