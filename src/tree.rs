//! Canonical statement trees.
//!
//! Nodes live in an arena owned by the [`Tree`]; children are owned by id and
//! the parent link is a derived back-reference. Only the child structure is
//! persisted, nested, and parent links are rebuilt by [`Tree::reconnect`] when
//! a tree is deserialized.

use crate::model::{Balance, SubTreeBalance};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: CompactString,
    pub balance: Balance,
    pub label_type: CompactString,
    pub path_hash: u32,
    pub sub_tree_balance: Option<SubTreeBalance>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl TreeNode {
    pub fn new(name: &str, balance: Balance, label_type: &str, path_hash: u32) -> Self {
        Self {
            name: CompactString::from(name),
            balance,
            label_type: CompactString::from(label_type),
            path_hash,
            sub_tree_balance: None,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One structural occurrence of a concept.
#[derive(Debug, Clone, Copy)]
pub struct Occurrence<'a> {
    pub tree: &'a Tree,
    pub id: NodeId,
}

impl<'a> Occurrence<'a> {
    pub fn node(&self) -> &'a TreeNode {
        self.tree.node(self.id)
    }
}

/// Concept name to every occurrence of it.
pub type NodeIndex<'a> = AHashMap<&'a str, Vec<Occurrence<'a>>>;

#[derive(Debug, Clone)]
pub struct Tree {
    title: String,
    nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(title: &str, root: TreeNode) -> Self {
        let mut root = root;
        root.children.clear();
        root.parent = None;
        Self {
            title: title.to_string(),
            nodes: vec![root],
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends `node` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = node;
        node.children.clear();
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub fn parent(&self, id: NodeId) -> Option<&TreeNode> {
        self.node(id).parent.map(|p| self.node(p))
    }

    /// Parent, grandparent, ... up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, move |&p| self.node(p).parent)
    }

    /// Re-establishes every parent link from the children lists.
    pub fn reconnect(&mut self) {
        let root = self.root_id();
        self.nodes[root.index()].parent = None;
        self.reconnect_children(root);
    }

    fn reconnect_children(&mut self, id: NodeId) {
        for i in 0..self.nodes[id.index()].children.len() {
            let child = self.nodes[id.index()].children[i];
            self.nodes[child.index()].parent = Some(id);
            self.reconnect_children(child);
        }
    }

    // ========================================================================
    // Balance propagation
    // ========================================================================

    /// Derives `sub_tree_balance` for every node. A leaf takes its own sign;
    /// an internal node looks at the own balances of its direct children.
    pub fn propagate_balances(&mut self) {
        self.propagate(self.root_id());
    }

    fn propagate(&mut self, id: NodeId) -> BalanceCounts {
        let own = self.nodes[id.index()].balance;

        if self.nodes[id.index()].is_leaf() {
            self.nodes[id.index()].sub_tree_balance = own.signed();
        } else {
            let mut counts = BalanceCounts::default();
            for i in 0..self.nodes[id.index()].children.len() {
                let child = self.nodes[id.index()].children[i];
                counts.merge(self.propagate(child));
            }
            self.nodes[id.index()].sub_tree_balance = counts.resolve();
        }

        BalanceCounts::of(own)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn preorder<P, F>(&self, id: NodeId, depth: usize, traverse: &P, visit: &mut F)
    where
        P: Fn(&TreeNode) -> bool,
        F: FnMut(NodeId, usize),
    {
        let node = self.node(id);
        if !traverse(node) {
            return;
        }
        visit(id, depth);
        for &child in &node.children {
            self.preorder(child, depth + 1, traverse, visit);
        }
    }

    /// Pushes every node whose ancestors and itself pass `traverse`.
    pub fn collect_nodes<'a, P>(&'a self, out: &mut Vec<&'a TreeNode>, traverse: P)
    where
        P: Fn(&TreeNode) -> bool,
    {
        self.preorder(self.root_id(), 0, &traverse, &mut |id, _| out.push(self.node(id)));
    }

    pub fn node_index<P>(&self, traverse: P) -> NodeIndex<'_>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut index = NodeIndex::default();
        self.index_into(&mut index, traverse);
        index
    }

    /// Adds this tree's occurrences to an index shared across trees.
    pub fn index_into<'a, P>(&'a self, index: &mut NodeIndex<'a>, traverse: P)
    where
        P: Fn(&TreeNode) -> bool,
    {
        self.preorder(self.root_id(), 0, &traverse, &mut |id, _| {
            index
                .entry(self.node(id).name.as_str())
                .or_default()
                .push(Occurrence { tree: self, id });
        });
    }

    /// Writes one indented line per visited node that passes `filter`.
    pub fn print<W, F, P>(&self, out: &mut W, filter: F, traverse: P) -> io::Result<()>
    where
        W: io::Write,
        F: Fn(&TreeNode) -> bool,
        P: Fn(&TreeNode) -> bool,
    {
        writeln!(out, "{}", self.title)?;
        let mut result = Ok(());
        self.preorder(self.root_id(), 0, &traverse, &mut |id, depth| {
            let node = self.node(id);
            if result.is_err() || !filter(node) {
                return;
            }
            let subtree = match node.sub_tree_balance {
                Some(sign) => format!(" => {}", sign),
                None => String::new(),
            };
            result = writeln!(
                out,
                "{:indent$}{} [{}] {}{}",
                "",
                node.name,
                node.label_type,
                node.balance,
                subtree,
                indent = 2 * (depth + 1)
            );
        });
        result
    }

    fn subtree_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let (x, y) = (self.node(a), other.node(b));
        x.name == y.name
            && x.balance == y.balance
            && x.label_type == y.label_type
            && x.path_hash == y.path_hash
            && x.sub_tree_balance == y.sub_tree_balance
            && x.children.len() == y.children.len()
            && x
                .children
                .iter()
                .zip(&y.children)
                .all(|(&c, &d)| self.subtree_eq(c, other, d))
    }
}

/// Structural equality: titles and the node trees, ignoring arena layout.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.subtree_eq(self.root_id(), other, other.root_id())
    }
}

// ============================================================================
// Balance counting
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BalanceCounts([u32; 3]);

impl BalanceCounts {
    fn of(balance: Balance) -> Self {
        let mut counts = Self::default();
        counts.0[balance.index()] = 1;
        counts
    }

    fn merge(&mut self, other: BalanceCounts) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0) {
            *mine += theirs;
        }
    }

    /// One sign present, or one sign alongside `none`, decides the node.
    /// Opposing signs (with or without `none`) leave it undetermined.
    fn resolve(&self) -> Option<SubTreeBalance> {
        let present: Vec<Balance> = Balance::ALL
            .into_iter()
            .filter(|b| self.0[b.index()] > 0)
            .collect();
        match present.as_slice() {
            [only] => only.signed(),
            [Balance::None, other] => other.signed(),
            _ => None,
        }
    }
}

// ============================================================================
// Persisted form
// ============================================================================

struct NodeSer<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl Serialize for NodeSer<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let node = self.tree.node(self.id);
        let mut state = serializer.serialize_struct("TreeNode", 6)?;
        state.serialize_field("name", &node.name)?;
        state.serialize_field("balance", &node.balance)?;
        state.serialize_field("labelType", &node.label_type)?;
        state.serialize_field("pathHash", &node.path_hash)?;
        state.serialize_field("subTreeBalance", &node.sub_tree_balance)?;
        state.serialize_field(
            "children",
            &ChildrenSer {
                tree: self.tree,
                ids: &node.children,
            },
        )?;
        state.end()
    }
}

struct ChildrenSer<'a> {
    tree: &'a Tree,
    ids: &'a [NodeId],
}

impl Serialize for ChildrenSer<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.ids.iter().map(|&id| NodeSer {
            tree: self.tree,
            id,
        }))
    }
}

impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tree", 2)?;
        state.serialize_field("title", &self.title)?;
        state.serialize_field(
            "root",
            &NodeSer {
                tree: self,
                id: self.root_id(),
            },
        )?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRecord {
    name: CompactString,
    balance: Balance,
    label_type: CompactString,
    path_hash: u32,
    #[serde(default)]
    sub_tree_balance: Option<SubTreeBalance>,
    #[serde(default)]
    children: Vec<NodeRecord>,
}

#[derive(Deserialize)]
struct TreeRecord {
    title: String,
    root: NodeRecord,
}

impl From<TreeRecord> for Tree {
    fn from(record: TreeRecord) -> Self {
        fn flatten(record: NodeRecord, nodes: &mut Vec<TreeNode>) -> NodeId {
            let id = NodeId(nodes.len() as u32);
            nodes.push(TreeNode {
                name: record.name,
                balance: record.balance,
                label_type: record.label_type,
                path_hash: record.path_hash,
                sub_tree_balance: record.sub_tree_balance,
                children: Vec::with_capacity(record.children.len()),
                parent: None,
            });
            for child in record.children {
                let child_id = flatten(child, nodes);
                nodes[id.index()].children.push(child_id);
            }
            id
        }

        let mut nodes = Vec::new();
        flatten(record.root, &mut nodes);
        let mut tree = Tree {
            title: record.title,
            nodes,
        };
        tree.reconnect();
        tree
    }
}

impl<'de> Deserialize<'de> for Tree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        TreeRecord::deserialize(deserializer).map(Tree::from)
    }
}
