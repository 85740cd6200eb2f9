#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity handle for a call-graph node.
///
/// Handles are minted from a process-global counter, so a node keeps its
/// identity across graph clones and two structurally equal nodes created in
/// different graphs never collide. Remap tables are keyed by this handle,
/// never by structural value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    fn mint() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural identity of a call site: a name plus free-form attributes.
///
/// Two nodes from different graphs represent the same call site when their
/// frames compare equal along the full ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frame {
    name: String,
    attrs: BTreeMap<String, String>,
}

impl Frame {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NodeEntry {
    frame: Frame,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not belong to this graph")]
    UnknownNode(NodeId),
    #[error("{count} node(s) have no valid parent linkage reachable from the graph roots")]
    UnreachableNodes { count: usize },
}

/// Rooted forest of call-frame nodes, arena-owned and keyed by [`NodeId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<NodeId, NodeEntry>,
    roots: Vec<NodeId>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node ids in ascending handle order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    #[must_use]
    pub fn frame(&self, id: NodeId) -> Option<&Frame> {
        self.nodes.get(&id).map(|entry| &entry.frame)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|entry| entry.parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> Option<&[NodeId]> {
        self.nodes.get(&id).map(|entry| entry.children.as_slice())
    }

    pub fn add_root(&mut self, frame: Frame) -> NodeId {
        self.insert_under(None, frame)
    }

    pub fn add_child(&mut self, parent: NodeId, frame: Frame) -> Result<NodeId, GraphError> {
        if !self.nodes.contains_key(&parent) {
            return Err(GraphError::UnknownNode(parent));
        }
        Ok(self.insert_under(Some(parent), frame))
    }

    fn insert_under(&mut self, parent: Option<NodeId>, frame: Frame) -> NodeId {
        let id = NodeId::mint();
        self.nodes.insert(
            id,
            NodeEntry {
                frame,
                parent,
                children: Vec::new(),
            },
        );
        match parent {
            Some(parent_id) => {
                if let Some(entry) = self.nodes.get_mut(&parent_id) {
                    entry.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        id
    }

    fn find_child(&self, parent: Option<NodeId>, frame: &Frame) -> Option<NodeId> {
        let candidates = match parent {
            Some(parent_id) => self.nodes.get(&parent_id)?.children.as_slice(),
            None => self.roots.as_slice(),
        };
        candidates
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|entry| entry.frame == *frame))
    }

    /// Pre-order traversal over the whole forest, roots left to right.
    #[must_use]
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(entry) = self.nodes.get(&id) {
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        out
    }

    /// Structural comparison that ignores node identity: frames and child
    /// order must match position for position across both forests.
    #[must_use]
    pub fn structural_eq(&self, other: &Self) -> bool {
        fn eq_subtree(a: &Graph, an: NodeId, b: &Graph, bn: NodeId) -> bool {
            let (Some(ae), Some(be)) = (a.nodes.get(&an), b.nodes.get(&bn)) else {
                return false;
            };
            ae.frame == be.frame
                && ae.children.len() == be.children.len()
                && ae
                    .children
                    .iter()
                    .zip(&be.children)
                    .all(|(ac, bc)| eq_subtree(a, *ac, b, *bc))
        }

        self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(ar, br)| eq_subtree(self, *ar, other, *br))
    }

    /// Union with another graph.
    ///
    /// Every node of `self` keeps its identity in the result. Each node of
    /// `other` is matched root-down against the child list of its mapped
    /// parent; frame equality at every step means ancestry equality is
    /// implied for a match. Matched nodes are identified with the existing
    /// node, unmatched nodes are inserted fresh under newly minted ids. The
    /// returned map carries old-id -> union-id for every node of `other`.
    pub fn union(&self, other: &Self) -> Result<(Self, BTreeMap<NodeId, NodeId>), GraphError> {
        let mut merged = self.clone();
        let mut mapping: BTreeMap<NodeId, NodeId> = BTreeMap::new();

        let mut queue: VecDeque<(NodeId, Option<NodeId>)> =
            other.roots.iter().map(|root| (*root, None)).collect();
        while let Some((old_id, merged_parent)) = queue.pop_front() {
            // A node can be queued twice only if the input was deserialized
            // from a malformed shape; the first visit wins.
            if mapping.contains_key(&old_id) {
                continue;
            }
            let entry = other
                .nodes
                .get(&old_id)
                .ok_or(GraphError::UnknownNode(old_id))?;

            let target = match merged.find_child(merged_parent, &entry.frame) {
                Some(existing) => existing,
                None => merged.insert_under(merged_parent, entry.frame.clone()),
            };
            mapping.insert(old_id, target);

            for child in &entry.children {
                queue.push_back((*child, Some(target)));
            }
        }

        if mapping.len() != other.nodes.len() {
            return Err(GraphError::UnreachableNodes {
                count: other.nodes.len() - mapping.len(),
            });
        }

        Ok((merged, mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::{Frame, Graph};

    fn two_level_graph() -> Graph {
        let mut graph = Graph::new();
        let main = graph.add_root(Frame::new("main"));
        let solve = graph
            .add_child(main, Frame::new("solve"))
            .expect("child under root");
        graph
            .add_child(solve, Frame::new("kernel"))
            .expect("grandchild");
        graph
            .add_child(main, Frame::new("io"))
            .expect("second child");
        graph
    }

    #[test]
    fn union_with_clone_is_structurally_idempotent() {
        let graph = two_level_graph();
        let copy = graph.clone();

        let (merged, mapping) = graph.union(&copy).expect("union");
        assert!(merged.structural_eq(&graph));
        assert_eq!(mapping.len(), graph.len());
        for (old, new) in &mapping {
            assert_eq!(old, new, "clone shares identity, every node maps to itself");
        }
    }

    #[test]
    fn union_inserts_unmatched_subtrees() {
        let left = two_level_graph();
        let mut right = Graph::new();
        let main = right.add_root(Frame::new("main"));
        right
            .add_child(main, Frame::new("communicate"))
            .expect("child");

        let (merged, mapping) = left.union(&right).expect("union");
        assert_eq!(merged.len(), left.len() + 1);
        // The shared root was identified with left's root.
        assert_eq!(mapping[&main], left.roots()[0]);
        // Left keeps its identity as a subgraph of the union.
        for id in left.node_ids() {
            assert!(merged.contains(id));
        }
    }

    #[test]
    fn equal_frames_under_different_ancestors_stay_distinct() {
        let mut left = Graph::new();
        let a = left.add_root(Frame::new("a"));
        left.add_child(a, Frame::new("leaf")).expect("leaf under a");

        let mut right = Graph::new();
        let b = right.add_root(Frame::new("b"));
        right.add_child(b, Frame::new("leaf")).expect("leaf under b");

        let (merged, _) = left.union(&right).expect("union");
        // Both "leaf" nodes survive: one under "a", one under "b".
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn frame_attrs_participate_in_matching() {
        let mut left = Graph::new();
        left.add_root(Frame::new("region").with_attr("type", "loop"));

        let mut right = Graph::new();
        right.add_root(Frame::new("region").with_attr("type", "function"));

        let (merged, _) = left.union(&right).expect("union");
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn orphaned_nodes_fail_the_union() {
        let graph = two_level_graph();
        let mut raw = serde_json::to_value(&graph).expect("serialize");
        raw["roots"] = serde_json::json!([]);
        let malformed: Graph = serde_json::from_value(raw).expect("deserialize");

        let err = graph.union(&malformed).expect_err("must fail");
        assert!(matches!(
            err,
            super::GraphError::UnreachableNodes { count: 4 }
        ));
    }

    #[test]
    fn node_ids_are_unique_across_graphs() {
        let left = two_level_graph();
        let right = two_level_graph();
        for id in left.node_ids() {
            assert!(!right.contains(id));
        }
    }
}
