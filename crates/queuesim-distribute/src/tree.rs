//! Composite tree of management and compute nodes.
//!
//! The tree is an arena: nodes live in a [`SlotMap`] and refer to each other
//! by [`NodeId`], with each node holding its parent id and an ordered list of
//! child ids. Management nodes only fan out; compute nodes are the leaves and
//! own a replication count bound to an execution target.

use queuesim_core::model::ModelError;
use queuesim_core::simulation::SimError;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Handle to a node in a [`CompositeTree`].
    pub struct NodeId;
}

/// Execution target used when no target list is given.
pub const DEFAULT_TARGET: &str = "local";

/// Upper bound on the number of nodes a single build may create.
pub const MAX_NODES: u64 = 1 << 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("{name} must be a positive integer, got {value}")]
    InvalidParameter { name: &'static str, value: u64 },
    #[error("tree with branching {branching} and depth {depth} exceeds the node limit")]
    TooLarge { branching: u32, depth: u32 },
    #[error("operation needs a {expected} tree, tree is {actual:?}")]
    WrongState {
        expected: &'static str,
        actual: TreeState,
    },
    #[error("no node named {0:?}")]
    UnknownNode(String),
    #[error("{0} is not a management node")]
    NotManagement(String),
    #[error("{0} is not a compute node")]
    NotCompute(String),
    #[error("{0} or one of its descendants is running")]
    NodeBusy(String),
    #[error("the root node cannot be detached")]
    DetachRoot,
    #[error("no idle compute node available")]
    NoIdleComputeNodes,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid replication spec: {0}")]
    Spec(#[from] SimError),
}

// ---------------------------------------------------------------------------
// Parameters and state
// ---------------------------------------------------------------------------

/// Shape of a uniform tree and the replication total it splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    pub total_replications: u64,
    pub branching: u32,
    pub depth: u32,
}

impl TreeParams {
    pub fn new(total_replications: u64, branching: u32, depth: u32) -> Self {
        Self {
            total_replications,
            branching,
            depth,
        }
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.total_replications == 0 {
            return Err(TreeError::InvalidParameter {
                name: "total_replications",
                value: 0,
            });
        }
        if self.branching == 0 {
            return Err(TreeError::InvalidParameter {
                name: "branching",
                value: 0,
            });
        }
        if self.depth == 0 {
            return Err(TreeError::InvalidParameter {
                name: "depth",
                value: 0,
            });
        }
        if self.node_count().is_none_or(|n| n > MAX_NODES) {
            return Err(TreeError::TooLarge {
                branching: self.branching,
                depth: self.depth,
            });
        }
        Ok(())
    }

    /// Number of compute leaves: `branching^(depth - 1)`.
    pub fn leaf_count(&self) -> Option<u64> {
        u64::from(self.branching).checked_pow(self.depth.checked_sub(1)?)
    }

    /// Total nodes across all levels.
    pub fn node_count(&self) -> Option<u64> {
        let mut total: u64 = 0;
        let mut level: u64 = 1;
        for _ in 0..self.depth {
            total = total.checked_add(level)?;
            level = level.checked_mul(u64::from(self.branching))?;
        }
        Some(total)
    }

    /// Replications given to every leaf: the total divided by the leaf
    /// count, rounded half to even, and never less than one.
    pub fn per_leaf(&self) -> Option<u64> {
        let leaves = self.leaf_count()?;
        if leaves == 0 {
            return None;
        }
        let (quotient, remainder) = (self.total_replications / leaves, self.total_replications % leaves);
        let twice = u128::from(remainder) * 2;
        let round_up = match twice.cmp(&u128::from(leaves)) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => quotient % 2 == 1,
            std::cmp::Ordering::Less => false,
        };
        Some((quotient + u64::from(round_up)).max(1))
    }

    /// Replications actually scheduled across all leaves.
    pub fn scheduled(&self) -> Option<u64> {
        self.per_leaf()?.checked_mul(self.leaf_count()?)
    }

    /// Signed difference between scheduled and requested replications.
    pub fn discrepancy(&self) -> Option<i128> {
        Some(i128::from(self.scheduled()?) - i128::from(self.total_replications))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeState {
    #[default]
    Unbuilt,
    Built,
    Distributing,
    Finished,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Work bound to a compute leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSlot {
    pub target: String,
    pub replications: u64,
    /// Replication index of the leaf's first run. Leaves cover disjoint
    /// index ranges, so every run gets its own seed.
    pub first_index: u64,
    pub running: bool,
}

impl ComputeSlot {
    pub fn indices(&self) -> std::ops::Range<u64> {
        self.first_index..self.first_index + self.replications
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Management,
    Compute(ComputeSlot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub role: NodeRole,
}

impl Node {
    pub fn is_compute(&self) -> bool {
        matches!(self.role, NodeRole::Compute(_))
    }

    pub fn compute(&self) -> Option<&ComputeSlot> {
        match &self.role {
            NodeRole::Compute(slot) => Some(slot),
            NodeRole::Management => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.compute().is_some_and(|slot| slot.running)
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CompositeTree {
    pub(crate) nodes: SlotMap<NodeId, Node>,
    root: Option<NodeId>,
    params: Option<TreeParams>,
    pub(crate) state: TreeState,
    next_management: u32,
    next_compute: u32,
    next_first_index: u64,
}

impl CompositeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh uniform tree, replacing any previous one.
    ///
    /// Leaves are bound to `targets` in turn; an empty list binds every leaf
    /// to [`DEFAULT_TARGET`]. With depth 1 the root itself is the only
    /// compute leaf.
    pub fn build(&mut self, params: TreeParams, targets: &[String]) -> Result<(), TreeError> {
        if self.state == TreeState::Distributing {
            return Err(TreeError::WrongState {
                expected: "idle",
                actual: self.state,
            });
        }
        params.validate()?;
        let per_leaf = params.per_leaf().ok_or(TreeError::TooLarge {
            branching: params.branching,
            depth: params.depth,
        })?;

        self.clear();
        self.params = Some(params);

        let mut leaf = 0usize;
        let mut target_for = || {
            let target = if targets.is_empty() {
                DEFAULT_TARGET.to_string()
            } else {
                targets[leaf % targets.len()].clone()
            };
            leaf += 1;
            target
        };

        let root = if params.depth == 1 {
            let target = target_for();
            self.insert_compute(None, target, per_leaf)
        } else {
            self.insert_management(None)
        };
        self.root = Some(root);

        let mut level = vec![root];
        for depth in 1..params.depth {
            let last = depth + 1 == params.depth;
            let mut next = Vec::with_capacity(level.len() * params.branching as usize);
            for &parent in &level {
                for _ in 0..params.branching {
                    let child = if last {
                        let target = target_for();
                        self.insert_compute(Some(parent), target, per_leaf)
                    } else {
                        self.insert_management(Some(parent))
                    };
                    next.push(child);
                }
            }
            level = next;
        }

        self.state = TreeState::Built;
        tracing::info!(
            nodes = self.nodes.len(),
            leaves = self.compute_count(root),
            per_leaf,
            requested = params.total_replications,
            scheduled = params.scheduled().unwrap_or(0),
            "composite tree built"
        );
        Ok(())
    }

    /// Drop every node and return to the unbuilt state.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.params = None;
        self.state = TreeState::Unbuilt;
        self.next_management = 0;
        self.next_compute = 0;
        self.next_first_index = 0;
    }

    fn insert_management(&mut self, parent: Option<NodeId>) -> NodeId {
        self.next_management += 1;
        let name = format!("ManagementNode{}", self.next_management);
        self.insert(parent, name, NodeRole::Management)
    }

    fn insert_compute(&mut self, parent: Option<NodeId>, target: String, replications: u64) -> NodeId {
        self.next_compute += 1;
        let name = format!("ComputeNode{}", self.next_compute);
        let slot = ComputeSlot {
            target,
            replications,
            first_index: self.next_first_index,
            running: false,
        };
        self.next_first_index += replications;
        self.insert(parent, name, NodeRole::Compute(slot))
    }

    fn insert(&mut self, parent: Option<NodeId>, name: String, role: NodeRole) -> NodeId {
        let id = self.nodes.insert(Node {
            name,
            parent,
            children: Vec::new(),
            role,
        });
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.push(id);
        }
        id
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> TreeState {
        self.state
    }

    pub fn params(&self) -> Option<&TreeParams> {
        self.params.as_ref()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).map(|n| n.name.as_str())
    }

    /// Node ids of the subtree under `from`, parents before children,
    /// siblings in insertion order.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Compute leaves of the whole tree in left-to-right order.
    pub fn leaves(&self) -> Vec<NodeId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        self.preorder(root)
            .into_iter()
            .filter(|&id| self.nodes[id].is_compute())
            .collect()
    }

    /// Compute nodes in the subtree under `from`, `from` included.
    pub fn compute_count(&self, from: NodeId) -> usize {
        self.preorder(from)
            .into_iter()
            .filter(|&id| self.nodes[id].is_compute())
            .count()
    }

    /// Compute nodes under `from` that are not running.
    pub fn idle_compute_count(&self, from: NodeId) -> usize {
        self.preorder(from)
            .into_iter()
            .filter(|&id| {
                let node = &self.nodes[id];
                node.is_compute() && !node.is_running()
            })
            .count()
    }

    /// Sum of the replication counts bound to every leaf.
    pub fn scheduled(&self) -> u64 {
        self.leaves()
            .into_iter()
            .filter_map(|id| self.nodes[id].compute())
            .map(|slot| slot.replications)
            .sum()
    }

    fn has_running(&self, from: NodeId) -> bool {
        self.preorder(from)
            .into_iter()
            .any(|id| self.nodes[id].is_running())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    fn management_parent(&self, parent: &str) -> Result<NodeId, TreeError> {
        if self.root.is_none() {
            return Err(TreeError::WrongState {
                expected: "built",
                actual: self.state,
            });
        }
        let id = self
            .find(parent)
            .ok_or_else(|| TreeError::UnknownNode(parent.to_string()))?;
        if self.nodes[id].is_compute() {
            return Err(TreeError::NotManagement(parent.to_string()));
        }
        Ok(id)
    }

    /// Attach a new compute leaf under the management node `parent`. The leaf
    /// receives the tree's per-leaf count and a fresh index range.
    pub fn attach_compute(&mut self, parent: &str, target: &str) -> Result<NodeId, TreeError> {
        let parent = self.management_parent(parent)?;
        let per_leaf = self.params.and_then(|p| p.per_leaf()).unwrap_or(1);
        let id = self.insert_compute(Some(parent), target.to_string(), per_leaf);
        tracing::debug!(node = %self.nodes[id].name, target, "compute node attached");
        Ok(id)
    }

    /// Attach an empty management node under `parent`.
    pub fn attach_management(&mut self, parent: &str) -> Result<NodeId, TreeError> {
        let parent = self.management_parent(parent)?;
        let id = self.insert_management(Some(parent));
        tracing::debug!(node = %self.nodes[id].name, "management node attached");
        Ok(id)
    }

    /// Remove `name` and its whole subtree. Refused while any compute node in
    /// the subtree is running. Returns the number of nodes removed.
    pub fn detach(&mut self, name: &str) -> Result<usize, TreeError> {
        let id = self
            .find(name)
            .ok_or_else(|| TreeError::UnknownNode(name.to_string()))?;
        if Some(id) == self.root {
            return Err(TreeError::DetachRoot);
        }
        if self.has_running(id) {
            return Err(TreeError::NodeBusy(name.to_string()));
        }

        if let Some(parent) = self.nodes[id].parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|&child| child != id);
        }
        let subtree = self.preorder(id);
        for node in &subtree {
            self.nodes.remove(*node);
        }
        tracing::debug!(node = name, removed = subtree.len(), "subtree detached");
        Ok(subtree.len())
    }

    pub fn set_running(&mut self, name: &str, running: bool) -> Result<(), TreeError> {
        let id = self
            .find(name)
            .ok_or_else(|| TreeError::UnknownNode(name.to_string()))?;
        match &mut self.nodes[id].role {
            NodeRole::Compute(slot) => {
                slot.running = running;
                Ok(())
            }
            NodeRole::Management => Err(TreeError::NotCompute(name.to_string())),
        }
    }

    /// Completion callback for a compute leaf: clears its running flag.
    pub fn complete(&mut self, name: &str) -> Result<(), TreeError> {
        self.set_running(name, false)?;
        tracing::debug!(node = name, "compute node completed");
        Ok(())
    }

    /// Graphviz rendering of the tree.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph CompositeTree {\n");
        let Some(root) = self.root else {
            out.push_str("}\n");
            return out;
        };
        for id in self.preorder(root) {
            let node = &self.nodes[id];
            match &node.role {
                NodeRole::Management => {
                    out.push_str(&format!("    \"{}\" [shape=box];\n", node.name));
                }
                NodeRole::Compute(slot) => out.push_str(&format!(
                    "    \"{}\" [shape=ellipse, label=\"{}\\n{} @ {}\"];\n",
                    node.name, node.name, slot.replications, slot.target
                )),
            }
            for &child in &node.children {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\";\n",
                    node.name, self.nodes[child].name
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(total: u64, branching: u32, depth: u32) -> CompositeTree {
        let mut tree = CompositeTree::new();
        tree.build(TreeParams::new(total, branching, depth), &[]).unwrap();
        tree
    }

    fn slot(tree: &CompositeTree, name: &str) -> ComputeSlot {
        let id = tree.find(name).unwrap();
        tree.get(id).unwrap().compute().unwrap().clone()
    }

    #[test]
    fn rejects_non_positive_parameters() {
        for params in [
            TreeParams::new(0, 2, 2),
            TreeParams::new(10, 0, 2),
            TreeParams::new(10, 2, 0),
        ] {
            assert!(matches!(
                params.validate(),
                Err(TreeError::InvalidParameter { .. })
            ));
        }
        assert!(matches!(
            TreeParams::new(10, 1000, 10).validate(),
            Err(TreeError::TooLarge { .. })
        ));
    }

    #[test]
    fn depth_three_branching_two_over_counts_by_one() {
        let params = TreeParams::new(15, 2, 3);
        assert_eq!(params.leaf_count(), Some(4));
        assert_eq!(params.per_leaf(), Some(4));
        assert_eq!(params.scheduled(), Some(16));
        assert_eq!(params.discrepancy(), Some(1));

        let tree = built(15, 2, 3);
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.leaves().len(), 4);
        assert_eq!(tree.scheduled(), 16);
        assert_eq!(tree.state(), TreeState::Built);
    }

    #[test]
    fn depth_one_root_is_the_leaf() {
        let tree = built(7, 3, 1);
        let root = tree.root().unwrap();
        assert_eq!(tree.leaves(), vec![root]);
        assert_eq!(tree.name(root), Some("ComputeNode1"));
        assert_eq!(slot(&tree, "ComputeNode1").replications, 7);
    }

    #[test]
    fn per_leaf_never_drops_to_zero() {
        let params = TreeParams::new(1, 2, 4);
        assert_eq!(params.per_leaf(), Some(1));
        assert_eq!(params.scheduled(), Some(8));
    }

    #[test]
    fn rounds_half_to_even() {
        // 10 / 4 = 2.5
        let params = TreeParams::new(10, 2, 3);
        assert_eq!(params.per_leaf(), Some(2));
        assert_eq!(params.scheduled(), Some(8));
        assert_eq!(params.discrepancy(), Some(-2));
        // 14 / 4 = 3.5
        assert_eq!(TreeParams::new(14, 2, 3).per_leaf(), Some(4));
        // 9 / 4 = 2.25, 11 / 4 = 2.75
        assert_eq!(TreeParams::new(9, 2, 3).per_leaf(), Some(2));
        assert_eq!(TreeParams::new(11, 2, 3).per_leaf(), Some(3));
        // 1 / 2 = 0.5 rounds to 0, lifted to the floor of one
        assert_eq!(TreeParams::new(1, 2, 2).per_leaf(), Some(1));
    }

    #[test]
    fn names_follow_creation_order() {
        let tree = built(8, 2, 3);
        let names: Vec<_> = tree
            .preorder(tree.root().unwrap())
            .into_iter()
            .map(|id| tree.name(id).unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "ManagementNode1",
                "ManagementNode2",
                "ComputeNode1",
                "ComputeNode2",
                "ManagementNode3",
                "ComputeNode3",
                "ComputeNode4",
            ]
        );
    }

    #[test]
    fn leaves_cover_disjoint_index_ranges() {
        let tree = built(12, 3, 2);
        let ranges: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|id| tree.get(id).unwrap().compute().unwrap().indices())
            .collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..12]);
    }

    #[test]
    fn targets_are_assigned_round_robin() {
        let mut tree = CompositeTree::new();
        let targets = vec!["a".to_string(), "b".to_string()];
        tree.build(TreeParams::new(6, 3, 2), &targets).unwrap();
        let bound: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|id| tree.get(id).unwrap().compute().unwrap().target.clone())
            .collect();
        assert_eq!(bound, ["a", "b", "a"]);
    }

    #[test]
    fn rebuild_restarts_names() {
        let mut tree = built(4, 2, 2);
        tree.build(TreeParams::new(4, 2, 2), &[]).unwrap();
        assert!(tree.find("ManagementNode1").is_some());
        assert!(tree.find("ComputeNode3").is_none());
    }

    #[test]
    fn counts_idle_compute_nodes() {
        let mut tree = built(8, 2, 3);
        let root = tree.root().unwrap();
        assert_eq!(tree.compute_count(root), 4);
        tree.set_running("ComputeNode2", true).unwrap();
        assert_eq!(tree.idle_compute_count(root), 3);
        let left = tree.find("ManagementNode2").unwrap();
        assert_eq!(tree.idle_compute_count(left), 1);

        tree.complete("ComputeNode2").unwrap();
        assert_eq!(tree.idle_compute_count(root), 4);
    }

    #[test]
    fn running_flag_only_on_compute_nodes() {
        let mut tree = built(4, 2, 2);
        assert_eq!(
            tree.set_running("ManagementNode1", true),
            Err(TreeError::NotCompute("ManagementNode1".into()))
        );
        assert_eq!(
            tree.complete("Nope"),
            Err(TreeError::UnknownNode("Nope".into()))
        );
    }

    #[test]
    fn attach_compute_extends_index_ranges() {
        let mut tree = built(6, 2, 2);
        let id = tree.attach_compute("ManagementNode1", "remote").unwrap();
        let slot = tree.get(id).unwrap().compute().unwrap();
        assert_eq!(tree.name(id), Some("ComputeNode3"));
        assert_eq!(slot.indices(), 6..9);
        assert_eq!(slot.target, "remote");
        assert_eq!(tree.leaves().len(), 3);
    }

    #[test]
    fn attach_needs_a_management_parent() {
        let mut tree = built(6, 2, 2);
        assert_eq!(
            tree.attach_compute("ComputeNode1", "x"),
            Err(TreeError::NotManagement("ComputeNode1".into()))
        );
        let mut empty = CompositeTree::new();
        assert!(matches!(
            empty.attach_management("ManagementNode1"),
            Err(TreeError::WrongState { .. })
        ));
    }

    #[test]
    fn detach_removes_subtree() {
        let mut tree = built(8, 2, 3);
        assert_eq!(tree.detach("ManagementNode2"), Ok(3));
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.leaves().len(), 2);
        assert!(tree.find("ComputeNode1").is_none());
        let root = tree.root().unwrap();
        assert_eq!(tree.get(root).unwrap().children.len(), 1);
    }

    #[test]
    fn detach_refuses_running_subtree_and_root() {
        let mut tree = built(8, 2, 3);
        tree.set_running("ComputeNode1", true).unwrap();
        assert_eq!(
            tree.detach("ManagementNode2"),
            Err(TreeError::NodeBusy("ManagementNode2".into()))
        );
        assert_eq!(tree.detach("ManagementNode1"), Err(TreeError::DetachRoot));
        assert_eq!(tree.detach("ManagementNode3"), Ok(3));
    }

    #[test]
    fn dot_export_lists_every_edge() {
        let tree = built(4, 2, 2);
        let dot = tree.to_dot();
        assert!(dot.starts_with("digraph CompositeTree {"));
        assert!(dot.contains("\"ManagementNode1\" -> \"ComputeNode1\";"));
        assert!(dot.contains("\"ManagementNode1\" -> \"ComputeNode2\";"));
        assert!(dot.contains("ComputeNode2\\n2 @ local"));
        assert_eq!(dot.matches("->").count(), 2);
    }

    #[test]
    fn clear_returns_to_unbuilt() {
        let mut tree = built(4, 2, 2);
        tree.clear();
        assert_eq!(tree.state(), TreeState::Unbuilt);
        assert!(tree.is_empty());
        assert!(tree.leaves().is_empty());
        assert_eq!(tree.to_dot(), "digraph CompositeTree {\n}\n");
    }
}
