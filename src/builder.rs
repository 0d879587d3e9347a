//! Canonicalizes one role's presentation walk into a deduplicated [`Tree`].
//!
//! Node identity within a build is `(qualified name, label type, path hash)`.
//! The path hash only covers ancestors strictly below the tree root, so the
//! same concept under different parents, or under the same parent with a
//! different preferred label, becomes a distinct node.

use crate::hash::{join_path, path_hash, push_segment, root_hash};
use crate::network::{TreeConsumer, Visit};
use crate::tree::{NodeId, Tree, TreeNode};
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    name: CompactString,
    label_type: CompactString,
    path_hash: u32,
}

impl Key {
    fn new(name: &str, label_type: &str, path_hash: u32) -> Self {
        Self {
            name: CompactString::from(name),
            label_type: CompactString::from(label_type),
            path_hash,
        }
    }
}

pub struct TreeBuilder<'a> {
    title: String,
    starting_concept: Option<CompactString>,
    allowed_duplicates: &'a AHashSet<CompactString>,
    tree: Option<Tree>,
    keys: AHashMap<Key, NodeId>,
    out_of_scope: usize,
    dropped_duplicates: usize,
    /// Ancestor depth of a dropped duplicate whose subtree is being walked.
    skipping: Option<usize>,
}

impl<'a> TreeBuilder<'a> {
    /// `starting_concept` names the node to promote to root; without one the
    /// first walk root is used. Names in `allowed_duplicates` may repeat a
    /// key, the first occurrence wins.
    pub fn new(
        title: &str,
        starting_concept: Option<&str>,
        allowed_duplicates: &'a AHashSet<CompactString>,
    ) -> Self {
        Self {
            title: title.to_string(),
            starting_concept: starting_concept.map(CompactString::from),
            allowed_duplicates,
            tree: None,
            keys: AHashMap::new(),
            out_of_scope: 0,
            dropped_duplicates: 0,
            skipping: None,
        }
    }

    pub fn has_root(&self) -> bool {
        self.tree.is_some()
    }

    /// Completes the build. `None` when no root was ever found.
    pub fn finish(self) -> Option<Tree> {
        let mut tree = self.tree?;
        tree.propagate_balances();
        tracing::debug!(
            title = %self.title,
            nodes = tree.len(),
            out_of_scope = self.out_of_scope,
            dropped_duplicates = self.dropped_duplicates,
            "built statement tree"
        );
        Some(tree)
    }

    fn install_root(&mut self, root: Visit<'_>) -> Result<()> {
        let hash = root_hash();
        let node = TreeNode::new(root.qname(), root.concept.balance()?, root.label_type, hash);
        let tree = Tree::new(&self.title, node);
        self.keys
            .insert(Key::new(root.qname(), root.label_type, hash), tree.root_id());
        self.tree = Some(tree);
        Ok(())
    }

    /// The name ancestor paths are cut at: the configured starting concept
    /// or, without one, the installed root.
    fn anchor(&self) -> Option<&str> {
        match (&self.starting_concept, &self.tree) {
            (Some(start), _) => Some(start.as_str()),
            (None, Some(tree)) => Some(tree.root().name.as_str()),
            (None, None) => None,
        }
    }
}

impl TreeConsumer for TreeBuilder<'_> {
    fn root_start(&mut self, root: Visit<'_>) -> Result<()> {
        if let Some(start) = &self.starting_concept {
            if self.tree.is_none() && start.as_str() == root.qname() {
                return self.install_root(root);
            }
            return Ok(());
        }
        if self.tree.is_some() {
            tracing::debug!(title = %self.title, root = root.qname(), "ignoring additional root");
            return Ok(());
        }
        self.install_root(root)
    }

    fn node_start(&mut self, node: Visit<'_>, ancestors: &[Visit<'_>]) -> Result<()> {
        if self.skipping.is_some() {
            return Ok(());
        }
        if self.tree.is_none() {
            if self.starting_concept.as_deref() == Some(node.qname()) {
                return self.install_root(node);
            }
            self.out_of_scope += 1;
            return Ok(());
        }

        let cut = self
            .anchor()
            .and_then(|anchor| ancestors.iter().position(|a| a.qname() == anchor));
        let Some(cut) = cut else {
            self.out_of_scope += 1;
            return Ok(());
        };

        let mut path = join_path(ancestors[..cut].iter().rev().map(|a| a.qname()));
        let parent_hash = path_hash(&path);
        push_segment(&mut path, node.qname());
        let hash = path_hash(&path);

        let parent = &ancestors[0];
        let parent_key = Key::new(parent.qname(), parent.label_type, parent_hash);
        let Some(&parent_id) = self.keys.get(&parent_key) else {
            return Err(Error::MissingParent {
                name: parent.qname().to_string(),
                label_type: parent.label_type.to_string(),
                path_hash: parent_hash,
            });
        };

        let key = Key::new(node.qname(), node.label_type, hash);
        if self.keys.contains_key(&key) {
            if self.allowed_duplicates.contains(node.qname()) {
                // The whole repeated subtree goes, not just its head.
                self.dropped_duplicates += 1;
                self.skipping = Some(ancestors.len());
                tracing::debug!(title = %self.title, concept = node.qname(), "dropping allowed duplicate");
                return Ok(());
            }
            return Err(Error::DuplicateNode {
                name: node.qname().to_string(),
                label_type: node.label_type.to_string(),
                path_hash: hash,
            });
        }

        let tree_node = TreeNode::new(node.qname(), node.concept.balance()?, node.label_type, hash);
        if let Some(tree) = self.tree.as_mut() {
            let id = tree.add_child(parent_id, tree_node);
            self.keys.insert(key, id);
        }
        Ok(())
    }

    fn node_end(&mut self, _node: Visit<'_>, ancestors: &[Visit<'_>]) -> Result<()> {
        if self.skipping == Some(ancestors.len()) {
            self.skipping = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Arc, ArcKind, ArcTarget, Balance, Concept, ConceptId, LabelType, LinkKind, SubTreeBalance,
    };
    use crate::network::Network;
    use pretty_assertions::assert_eq;

    fn visit<'c>(concept: &'c Concept, label_type: &'c str) -> Visit<'c> {
        Visit { concept, label_type }
    }

    fn names(tree: &Tree) -> Vec<String> {
        let mut out = Vec::new();
        tree.collect_nodes(&mut out, |_| true);
        out.iter().map(|n| n.name.to_string()).collect()
    }

    #[test]
    fn test_starting_concept_skips_scaffolding() {
        let statement = Concept::new("ns", "StatementAbstract");
        let table = Concept::new("ns", "StatementTable");
        let axis = Concept::new("ns", "SegmentAxis");
        let items = Concept::new("ns", "LineItems");
        let revenue = Concept::new("ns", "Revenues").with_balance("credit");
        let none = AHashSet::new();

        let mut builder = TreeBuilder::new("Income", Some("ns:LineItems"), &none);
        let s = visit(&statement, "label");
        let t = visit(&table, "label");
        let a = visit(&axis, "label");
        let l = visit(&items, "label");
        builder.root_start(s).unwrap();
        builder.node_start(t, &[s]).unwrap();
        builder.node_start(a, &[t, s]).unwrap();
        assert!(!builder.has_root());
        builder.node_start(l, &[t, s]).unwrap();
        builder.node_start(visit(&revenue, "label"), &[l, t, s]).unwrap();

        let tree = builder.finish().unwrap();
        assert_eq!(names(&tree), vec!["ns:LineItems", "ns:Revenues"]);
        assert_eq!(tree.root().path_hash, root_hash());
        assert_eq!(tree.node(tree.root().children()[0]).path_hash, path_hash("ns:Revenues"));
    }

    #[test]
    fn test_nodes_outside_the_root_are_skipped() {
        let first = Concept::new("ns", "First");
        let child = Concept::new("ns", "Child");
        let second = Concept::new("ns", "Second");
        let none = AHashSet::new();

        let mut builder = TreeBuilder::new("t", None, &none);
        builder.root_start(visit(&first, "label")).unwrap();
        builder.node_start(visit(&child, "label"), &[visit(&first, "label")]).unwrap();
        builder.root_start(visit(&second, "label")).unwrap();
        builder.node_start(visit(&child, "label"), &[visit(&second, "label")]).unwrap();

        let tree = builder.finish().unwrap();
        assert_eq!(names(&tree), vec!["ns:First", "ns:Child"]);
    }

    #[test]
    fn test_no_root_yields_none() {
        let a = Concept::new("ns", "A");
        let b = Concept::new("ns", "B");
        let none = AHashSet::new();
        let mut builder = TreeBuilder::new("t", Some("ns:LineItems"), &none);
        builder.root_start(visit(&a, "label")).unwrap();
        builder.node_start(visit(&b, "label"), &[visit(&a, "label")]).unwrap();
        assert!(builder.finish().is_none());
    }

    #[test]
    fn test_duplicate_key_is_fatal_unless_allowed() {
        let root = Concept::new("ns", "Root");
        let dup = Concept::new("ns", "Dup").with_balance("debit");
        let r = visit(&root, "label");

        let none = AHashSet::new();
        let mut builder = TreeBuilder::new("t", None, &none);
        builder.root_start(r).unwrap();
        builder.node_start(visit(&dup, "label"), &[r]).unwrap();
        let err = builder.node_start(visit(&dup, "label"), &[r]).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { ref name, .. } if name == "ns:Dup"));

        let allowed: AHashSet<CompactString> = [CompactString::from("ns:Dup")].into_iter().collect();
        let mut builder = TreeBuilder::new("t", None, &allowed);
        builder.root_start(r).unwrap();
        builder.node_start(visit(&dup, "label"), &[r]).unwrap();
        builder.node_start(visit(&dup, "label"), &[r]).unwrap();
        let tree = builder.finish().unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_allowed_duplicate_drops_its_subtree() {
        let root = Concept::new("ns", "Root");
        let dup = Concept::new("ns", "Dup");
        let child = Concept::new("ns", "Child").with_balance("credit");
        let grand = Concept::new("ns", "Grand").with_balance("credit");
        let after = Concept::new("ns", "After");
        let r = visit(&root, "label");
        let d = visit(&dup, "label");
        let c = visit(&child, "label");
        let g = visit(&grand, "label");

        let allowed: AHashSet<CompactString> = [CompactString::from("ns:Dup")].into_iter().collect();
        let mut builder = TreeBuilder::new("t", None, &allowed);
        builder.root_start(r).unwrap();
        for _ in 0..2 {
            builder.node_start(d, &[r]).unwrap();
            builder.node_start(c, &[d, r]).unwrap();
            builder.node_start(g, &[c, d, r]).unwrap();
            builder.node_end(g, &[c, d, r]).unwrap();
            builder.node_end(c, &[d, r]).unwrap();
            builder.node_end(d, &[r]).unwrap();
        }
        builder.node_start(visit(&after, "label"), &[r]).unwrap();

        let tree = builder.finish().unwrap();
        assert_eq!(names(&tree), vec!["ns:Root", "ns:Dup", "ns:Child", "ns:Grand", "ns:After"]);
        let dup_id = tree.root().children()[0];
        assert_eq!(tree.node(dup_id).children().len(), 1);
        assert_eq!(tree.node(dup_id).sub_tree_balance, Some(SubTreeBalance::Credit));
    }

    #[test]
    fn test_allowed_duplicate_subtree_from_network_walk() {
        let concepts = vec![
            Concept::new("ns", "Root"),
            Concept::new("ns", "Group"),
            Concept::new("ns", "Cash").with_balance("debit"),
            Concept::new("ns", "Other").with_balance("debit"),
        ];
        let pres = |from: u32, to: u32, order: f64| {
            Arc::new(
                ConceptId(from),
                ArcTarget::Concept(ConceptId(to)),
                ArcKind::Presentation { preferred_label: LabelType::standard() },
            )
            .with_order(order)
        };
        let mut net = Network::new("r", LinkKind::Presentation);
        net.insert(pres(0, 1, 1.0));
        net.insert(pres(0, 1, 2.0));
        net.insert(pres(0, 3, 3.0));
        net.insert(pres(1, 2, 1.0));

        let allowed: AHashSet<CompactString> = [CompactString::from("ns:Group")].into_iter().collect();
        let mut builder = TreeBuilder::new("t", None, &allowed);
        net.walk(&concepts, &mut builder).unwrap();
        let tree = builder.finish().unwrap();
        assert_eq!(names(&tree), vec!["ns:Root", "ns:Group", "ns:Cash", "ns:Other"]);

        let none = AHashSet::new();
        let mut builder = TreeBuilder::new("t", None, &none);
        assert!(matches!(
            net.walk(&concepts, &mut builder),
            Err(Error::DuplicateNode { ref name, .. }) if name == "ns:Group"
        ));
    }

    #[test]
    fn test_same_concept_in_distinct_positions_is_kept() {
        let root = Concept::new("ns", "Root");
        let a = Concept::new("ns", "A");
        let b = Concept::new("ns", "B");
        let x = Concept::new("ns", "X").with_balance("debit");
        let r = visit(&root, "label");
        let none = AHashSet::new();

        let mut builder = TreeBuilder::new("t", None, &none);
        builder.root_start(r).unwrap();
        builder.node_start(visit(&a, "label"), &[r]).unwrap();
        builder.node_start(visit(&x, "label"), &[visit(&a, "label"), r]).unwrap();
        builder.node_start(visit(&b, "label"), &[r]).unwrap();
        builder.node_start(visit(&x, "label"), &[visit(&b, "label"), r]).unwrap();
        builder.node_start(visit(&x, "totalLabel"), &[visit(&b, "label"), r]).unwrap();

        let tree = builder.finish().unwrap();
        let index = tree.node_index(|_| true);
        let hashes: Vec<u32> = index["ns:X"].iter().map(|o| o.node().path_hash).collect();
        assert_eq!(hashes, vec![path_hash("ns:A>ns:X"), path_hash("ns:B>ns:X"), path_hash("ns:B>ns:X")]);
        let roots = tree_nodes_with_hash(&tree, root_hash());
        assert_eq!(roots, 1);
    }

    fn tree_nodes_with_hash(tree: &Tree, hash: u32) -> usize {
        let mut out = Vec::new();
        tree.collect_nodes(&mut out, |_| true);
        out.iter().filter(|n| n.path_hash == hash).count()
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let root = Concept::new("ns", "Root");
        let ghost = Concept::new("ns", "Ghost");
        let child = Concept::new("ns", "Child");
        let r = visit(&root, "label");
        let none = AHashSet::new();

        let mut builder = TreeBuilder::new("t", None, &none);
        builder.root_start(r).unwrap();
        let err = builder
            .node_start(visit(&child, "label"), &[visit(&ghost, "label"), r])
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent { ref name, .. } if name == "ns:Ghost"));
    }

    #[test]
    fn test_invalid_balance_aborts_build() {
        let root = Concept::new("ns", "Root");
        let bad = Concept::new("ns", "Bad").with_balance("asset");
        let r = visit(&root, "label");
        let none = AHashSet::new();

        let mut builder = TreeBuilder::new("t", None, &none);
        builder.root_start(r).unwrap();
        assert!(matches!(
            builder.node_start(visit(&bad, "label"), &[r]),
            Err(Error::InvalidBalance(_))
        ));
    }

    #[test]
    fn test_build_from_network_walk() {
        let concepts = vec![
            Concept::new("us-gaap", "StatementTable"),
            Concept::new("us-gaap", "StatementLineItems"),
            Concept::new("us-gaap", "Revenues").with_balance("credit"),
            Concept::new("us-gaap", "CostOfRevenue").with_balance("debit"),
            Concept::new("us-gaap", "GrossProfit").with_balance("credit"),
            Concept::new("us-gaap", "IncomeStatementAbstract"),
        ];
        let pres = |from: u32, to: u32, order: f64, label: Option<&str>| {
            Arc::new(
                ConceptId(from),
                ArcTarget::Concept(ConceptId(to)),
                ArcKind::Presentation { preferred_label: LabelType::from_role(label) },
            )
            .with_order(order)
        };
        let mut net = Network::new("r", LinkKind::Presentation);
        net.insert(pres(0, 1, 2.0, None));
        net.insert(pres(1, 5, 1.0, None));
        net.insert(pres(5, 2, 1.0, None));
        net.insert(pres(5, 3, 2.0, None));
        net.insert(pres(5, 4, 3.0, Some("http://www.xbrl.org/2003/role/totalLabel")));

        let none = AHashSet::new();
        let mut builder = TreeBuilder::new("Income", Some("us-gaap:StatementLineItems"), &none);
        net.walk(&concepts, &mut builder).unwrap();
        let tree = builder.finish().unwrap();

        assert_eq!(
            names(&tree),
            vec![
                "us-gaap:StatementLineItems",
                "us-gaap:IncomeStatementAbstract",
                "us-gaap:Revenues",
                "us-gaap:CostOfRevenue",
                "us-gaap:GrossProfit",
            ]
        );
        let group = tree.root().children()[0];
        assert_eq!(tree.node(group).balance, Balance::None);
        assert_eq!(tree.node(group).sub_tree_balance, None);
        let gross = tree.node(group).children()[2];
        assert_eq!(tree.node(gross).label_type, "totalLabel");
        assert_eq!(tree.node(gross).sub_tree_balance, Some(SubTreeBalance::Credit));
        assert_eq!(
            tree.node(gross).path_hash,
            path_hash("us-gaap:IncomeStatementAbstract>us-gaap:GrossProfit")
        );
    }
}
