//! The branching story tree.
//!
//! An arena of nodes keyed by typed uuid ids; child references are ids,
//! never owning links. Mutating operations emit delta pairs over the
//! serialized `{nodes, root_node_id}` document, with the node map diffed
//! as a map so branch restoration keeps `children_ids` order exact.

use crate::delta::{capture, capture_unit, DeltaError, DeltaPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for story nodes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("a root node already exists")]
    RootExists,

    #[error("node {0} already exists in the tree")]
    DuplicateNode(NodeId),

    #[error("parent {0} not found")]
    ParentNotFound(NodeId),

    #[error("operation not allowed on the root node")]
    RootForbidden,

    #[error("tree invariant violated: {0}")]
    InvariantViolated(String),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Player,
    Writer,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Player => write!(f, "player"),
            Actor::Writer => write!(f, "writer"),
        }
    }
}

/// The narrative payload of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub actor: Actor,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director_thinking: Option<String>,
}

impl Turn {
    pub fn player(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::Player,
            text: text.into(),
            director_thinking: None,
        }
    }

    pub fn writer(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::Writer,
            text: text.into(),
            director_thinking: None,
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.director_thinking = Some(thinking.into());
        self
    }
}

/// One turn in the branching narrative, carrying the game deltas needed
/// to reach it from its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    pub children_ids: Vec<NodeId>,
    pub turn: Turn,
    pub deltas: Vec<DeltaPair>,
}

impl StoryNode {
    /// A fresh leaf node under `parent_id` (or a root when `None`).
    pub fn new(parent_id: Option<NodeId>, turn: Turn, deltas: Vec<DeltaPair>) -> Self {
        Self {
            id: NodeId::new(),
            parent_id,
            children_ids: Vec::new(),
            turn,
            deltas,
        }
    }
}

/// The branching story tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryTree {
    nodes: BTreeMap<NodeId, StoryNode>,
    #[serde(rename = "root_node_id", default, skip_serializing_if = "Option::is_none")]
    root_id: Option<NodeId>,
}

impl StoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&StoryNode> {
        self.nodes.get(&id)
    }

    pub fn get_root_node(&self) -> Option<&StoryNode> {
        self.root_id.and_then(|id| self.nodes.get(&id))
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a node, linking it under its parent (or as the root).
    pub fn add_node(&mut self, node: StoryNode) -> Result<DeltaPair, TreeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateNode(node.id));
        }
        match node.parent_id {
            None => {
                if self.root_id.is_some() {
                    return Err(TreeError::RootExists);
                }
            }
            Some(parent_id) => {
                let parent = self
                    .nodes
                    .get(&parent_id)
                    .ok_or(TreeError::ParentNotFound(parent_id))?;
                if parent.children_ids.contains(&node.id) {
                    return Err(TreeError::DuplicateNode(node.id));
                }
            }
        }

        let pair = capture_unit(self, |tree| {
            match node.parent_id {
                None => tree.root_id = Some(node.id),
                Some(parent_id) => {
                    if let Some(parent) = tree.nodes.get_mut(&parent_id) {
                        parent.children_ids.push(node.id);
                    }
                }
            }
            tree.nodes.insert(node.id, node.clone());
        })?;
        Ok(pair)
    }

    /// Replace a node's turn payload only. Unknown ids return `Ok(None)`.
    pub fn edit_node(&mut self, id: NodeId, new_turn: Turn) -> Result<Option<DeltaPair>, TreeError> {
        let captured = capture(self, |tree| {
            let node = tree.nodes.get_mut(&id)?;
            node.turn = new_turn.clone();
            Some(())
        })?;
        Ok(captured.map(|(_, pair)| pair))
    }

    /// Replace a node's turn and delta bundle together. Unknown ids
    /// return `Ok(None)`.
    pub fn update_node(
        &mut self,
        id: NodeId,
        new_turn: Turn,
        new_deltas: Vec<DeltaPair>,
    ) -> Result<Option<DeltaPair>, TreeError> {
        let captured = capture(self, |tree| {
            let node = tree.nodes.get_mut(&id)?;
            node.turn = new_turn.clone();
            node.deltas = new_deltas.clone();
            Some(())
        })?;
        Ok(captured.map(|(_, pair)| pair))
    }

    /// Delete a node and its whole subtree.
    ///
    /// Returns the removed nodes leaf-first (so an undo can reinsert
    /// parent-first by walking the list backwards) and the delta pair
    /// whose revert restores the node map and parent `children_ids`
    /// exactly. Unknown ids return `Ok(None)`; the root is refused.
    pub fn delete_branch(
        &mut self,
        id: NodeId,
    ) -> Result<Option<(Vec<StoryNode>, DeltaPair)>, TreeError> {
        if self.root_id == Some(id) {
            return Err(TreeError::RootForbidden);
        }
        if !self.nodes.contains_key(&id) {
            return Ok(None);
        }

        let doomed = self.subtree_post_order(id);
        let captured = capture(self, |tree| {
            let parent_id = tree.nodes.get(&id)?.parent_id;
            if let Some(parent_id) = parent_id {
                if let Some(parent) = tree.nodes.get_mut(&parent_id) {
                    parent.children_ids.retain(|child| *child != id);
                }
            }
            let mut removed = Vec::with_capacity(doomed.len());
            for node_id in &doomed {
                if let Some(node) = tree.nodes.remove(node_id) {
                    removed.push(node);
                }
            }
            Some(removed)
        })?;
        Ok(captured)
    }

    /// Subtree node ids in post-order (leaves before their parents).
    fn subtree_post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.post_order_into(id, &mut out);
        out
    }

    fn post_order_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(node) = self.nodes.get(&id) {
            for child in &node.children_ids {
                self.post_order_into(*child, out);
            }
            out.push(id);
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Root-first path from the root to `id`.
    pub fn get_path_to_node(&self, id: NodeId) -> Option<Vec<NodeId>> {
        let mut path = vec![id];
        let mut cursor = self.nodes.get(&id)?;
        while let Some(parent_id) = cursor.parent_id {
            path.push(parent_id);
            cursor = self.nodes.get(&parent_id)?;
        }
        path.reverse();
        Some(path)
    }

    /// Depth of a node; the root is at depth 1.
    pub fn get_depth(&self, id: NodeId) -> Option<usize> {
        self.get_path_to_node(id).map(|path| path.len())
    }

    /// The last `n` turns on the root-to-`id` path, in narrative order.
    pub fn get_recent_turns(&self, id: NodeId, n: usize) -> Vec<&Turn> {
        let Some(path) = self.get_path_to_node(id) else {
            return Vec::new();
        };
        let start = path.len().saturating_sub(n);
        path[start..]
            .iter()
            .filter_map(|node_id| self.nodes.get(node_id).map(|node| &node.turn))
            .collect()
    }

    /// Breadth-first frontier at depth `d` (the root is depth 1).
    pub fn get_nodes_at_turn(&self, depth: usize) -> Vec<&StoryNode> {
        if depth == 0 {
            return Vec::new();
        }
        let Some(root_id) = self.root_id else {
            return Vec::new();
        };

        let mut frontier = vec![root_id];
        for _ in 1..depth {
            let mut next = Vec::new();
            for id in &frontier {
                if let Some(node) = self.nodes.get(id) {
                    next.extend(node.children_ids.iter().copied());
                }
            }
            frontier = next;
            if frontier.is_empty() {
                return Vec::new();
            }
        }
        frontier
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// The deepest node, ties broken by first discovery in BFS order.
    pub fn get_deepest_node(&self) -> Option<&StoryNode> {
        let root_id = self.root_id?;
        let mut deepest = root_id;
        let mut queue = VecDeque::from([root_id]);
        let mut last_frontier = Vec::new();

        while !queue.is_empty() {
            last_frontier.clear();
            for _ in 0..queue.len() {
                let id = queue.pop_front()?;
                last_frontier.push(id);
                if let Some(node) = self.nodes.get(&id) {
                    queue.extend(node.children_ids.iter().copied());
                }
            }
            if let Some(first) = last_frontier.first() {
                deepest = *first;
            }
        }
        self.nodes.get(&deepest)
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check invariants: single root, resolvable references, no cycles.
    pub fn validate(&self) -> Result<(), TreeError> {
        let roots: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.id)
            .collect();
        match (self.root_id, roots.as_slice()) {
            (None, []) => return Ok(()),
            (Some(root), [only]) if root == *only => {}
            _ => {
                return Err(TreeError::InvariantViolated(format!(
                    "expected exactly one root, found {roots:?} (root_id {:?})",
                    self.root_id
                )))
            }
        }

        for node in self.nodes.values() {
            if let Some(parent_id) = node.parent_id {
                let parent = self.nodes.get(&parent_id).ok_or_else(|| {
                    TreeError::InvariantViolated(format!(
                        "node {} references missing parent {parent_id}",
                        node.id
                    ))
                })?;
                if !parent.children_ids.contains(&node.id) {
                    return Err(TreeError::InvariantViolated(format!(
                        "node {} is not listed by its parent {parent_id}",
                        node.id
                    )));
                }
            }
            for child in &node.children_ids {
                if !self.nodes.contains_key(child) {
                    return Err(TreeError::InvariantViolated(format!(
                        "node {} lists missing child {child}",
                        node.id
                    )));
                }
            }
        }

        // Every node must be reachable from the root: with parent links
        // verified, unreachable nodes would mean a cycle.
        if let Some(root_id) = self.root_id {
            let mut seen = std::collections::BTreeSet::new();
            let mut queue = VecDeque::from([root_id]);
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    return Err(TreeError::InvariantViolated(format!(
                        "cycle detected at {id}"
                    )));
                }
                if let Some(node) = self.nodes.get(&id) {
                    queue.extend(node.children_ids.iter().copied());
                }
            }
            if seen.len() != self.nodes.len() {
                return Err(TreeError::InvariantViolated(
                    "unreachable nodes present".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::apply_to;

    fn tree_with_chain() -> (StoryTree, NodeId, NodeId, NodeId) {
        let mut tree = StoryTree::new();
        let root = StoryNode::new(None, Turn::writer("You wake in a tavern."), vec![]);
        let root_id = root.id;
        tree.add_node(root).unwrap();

        let p1 = StoryNode::new(Some(root_id), Turn::player("Look around"), vec![]);
        let p1_id = p1.id;
        tree.add_node(p1).unwrap();

        let w1 = StoryNode::new(Some(p1_id), Turn::writer("The room is dim."), vec![]);
        let w1_id = w1.id;
        tree.add_node(w1).unwrap();

        (tree, root_id, p1_id, w1_id)
    }

    #[test]
    fn second_root_is_rejected() {
        let (mut tree, ..) = tree_with_chain();
        let another_root = StoryNode::new(None, Turn::writer("Elsewhere..."), vec![]);
        assert!(matches!(
            tree.add_node(another_root),
            Err(TreeError::RootExists)
        ));
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut tree = StoryTree::new();
        let orphan = StoryNode::new(Some(NodeId::new()), Turn::player("hello"), vec![]);
        assert!(matches!(
            tree.add_node(orphan),
            Err(TreeError::ParentNotFound(_))
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn paths_depths_and_recent_turns() {
        let (tree, root_id, p1_id, w1_id) = tree_with_chain();

        assert_eq!(
            tree.get_path_to_node(w1_id).unwrap(),
            vec![root_id, p1_id, w1_id]
        );
        assert_eq!(tree.get_depth(root_id), Some(1));
        assert_eq!(tree.get_depth(w1_id), Some(3));

        let turns = tree.get_recent_turns(w1_id, 2);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "Look around");
        assert_eq!(turns[1].text, "The room is dim.");
    }

    #[test]
    fn bfs_frontier_and_deepest() {
        let (mut tree, root_id, p1_id, w1_id) = tree_with_chain();
        // A sibling branch at depth 2.
        let alt = StoryNode::new(Some(root_id), Turn::player("Leave"), vec![]);
        let alt_id = alt.id;
        tree.add_node(alt).unwrap();

        let frontier: Vec<NodeId> = tree.get_nodes_at_turn(2).iter().map(|n| n.id).collect();
        assert_eq!(frontier, vec![p1_id, alt_id]);

        assert_eq!(tree.get_deepest_node().unwrap().id, w1_id);
    }

    #[test]
    fn delete_branch_returns_leaf_first_and_restores_exactly() {
        let (mut tree, _root_id, p1_id, w1_id) = tree_with_chain();
        let serialized_before = serde_json::to_string(&tree).unwrap();

        let (removed, pair) = tree.delete_branch(p1_id).unwrap().unwrap();
        let removed_ids: Vec<NodeId> = removed.iter().map(|n| n.id).collect();
        assert_eq!(removed_ids, vec![w1_id, p1_id], "leaf first");
        assert_eq!(tree.len(), 1);
        tree.validate().unwrap();

        let restored: StoryTree = apply_to(&tree, &pair.revert).unwrap();
        assert_eq!(serde_json::to_string(&restored).unwrap(), serialized_before);
        restored.validate().unwrap();
    }

    #[test]
    fn delete_branch_refuses_root() {
        let (mut tree, root_id, ..) = tree_with_chain();
        assert!(matches!(
            tree.delete_branch(root_id),
            Err(TreeError::RootForbidden)
        ));
    }

    #[test]
    fn delete_preserves_sibling_order_for_revert() {
        let mut tree = StoryTree::new();
        let root = StoryNode::new(None, Turn::writer("opening"), vec![]);
        let root_id = root.id;
        tree.add_node(root).unwrap();

        let mut sibling_ids = Vec::new();
        for i in 0..3 {
            let node = StoryNode::new(Some(root_id), Turn::player(format!("option {i}")), vec![]);
            sibling_ids.push(node.id);
            tree.add_node(node).unwrap();
        }

        let before = serde_json::to_string(&tree).unwrap();
        let (_, pair) = tree.delete_branch(sibling_ids[1]).unwrap().unwrap();

        let order: Vec<NodeId> = tree
            .get_node(root_id)
            .unwrap()
            .children_ids
            .clone();
        assert_eq!(order, vec![sibling_ids[0], sibling_ids[2]]);

        let restored: StoryTree = apply_to(&tree, &pair.revert).unwrap();
        assert_eq!(serde_json::to_string(&restored).unwrap(), before);
        assert_eq!(
            restored.get_node(root_id).unwrap().children_ids,
            sibling_ids
        );
    }

    #[test]
    fn edit_and_update_node() {
        let (mut tree, _, p1_id, _) = tree_with_chain();

        let pair = tree
            .edit_node(p1_id, Turn::player("Search the bar"))
            .unwrap()
            .unwrap();
        assert_eq!(tree.get_node(p1_id).unwrap().turn.text, "Search the bar");

        let reverted: StoryTree = apply_to(&tree, &pair.revert).unwrap();
        assert_eq!(reverted.get_node(p1_id).unwrap().turn.text, "Look around");

        assert!(tree
            .update_node(NodeId::new(), Turn::player("x"), vec![])
            .unwrap()
            .is_none());
    }

    #[test]
    fn serialization_round_trips_losslessly() {
        let (tree, ..) = tree_with_chain();
        let json = serde_json::to_string(&tree).unwrap();
        let back: StoryTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        back.validate().unwrap();
    }

    #[test]
    fn invariants_hold_after_random_adds_and_deletes() {
        let (mut tree, root_id, p1_id, _) = tree_with_chain();
        for i in 0..5 {
            let parent = if i % 2 == 0 { root_id } else { p1_id };
            let node = StoryNode::new(Some(parent), Turn::player(format!("act {i}")), vec![]);
            tree.add_node(node).unwrap();
        }
        tree.validate().unwrap();

        tree.delete_branch(p1_id).unwrap().unwrap();
        tree.validate().unwrap();

        for node in tree.node_ids().collect::<Vec<_>>() {
            if Some(node) != tree.root_id() {
                tree.delete_branch(node).unwrap();
                tree.validate().unwrap();
            }
        }
    }
}
