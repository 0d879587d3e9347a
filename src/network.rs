//! Arc networks and the ordered pre-order walk over them.
//!
//! A network holds every arc of one link kind within one extended link role.
//! Outgoing arcs of each concept are kept sorted by `order`; arcs with equal
//! order keep insertion order.

use crate::model::{Arc, ArcId, ArcKey, ArcUse, Concept, ConceptId, LabelType, LinkKind};
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;

/// One node reported by the walk.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub concept: &'a Concept,
    /// Preferred-label role in effect at this position.
    pub label_type: &'a str,
}

impl<'a> Visit<'a> {
    pub fn qname(&self) -> &'a str {
        self.concept.qname()
    }
}

/// Receiver of a pre-order walk.
///
/// Ancestors are reported nearest first and never include the node itself.
/// Every ancestor is reported to `node_start` (or `root_start`) before any of
/// its descendants.
pub trait TreeConsumer {
    fn root_start(&mut self, root: Visit<'_>) -> Result<()>;

    fn node_start(&mut self, node: Visit<'_>, ancestors: &[Visit<'_>]) -> Result<()>;

    fn node_end(&mut self, _node: Visit<'_>, _ancestors: &[Visit<'_>]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    role: CompactString,
    kind: LinkKind,
    arcs: Vec<Arc>,
    outgoing: AHashMap<ConceptId, Vec<ArcId>>,
    sources: Vec<ConceptId>,
    targets: AHashSet<ConceptId>,
    seen: AHashSet<ArcKey>,
}

impl Network {
    pub fn new(role: &str, kind: LinkKind) -> Self {
        Self {
            role: CompactString::from(role),
            kind,
            arcs: Vec::new(),
            outgoing: AHashMap::new(),
            sources: Vec::new(),
            targets: AHashSet::new(),
            seen: AHashSet::new(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Inserts an arc after any siblings with the same or lower order.
    /// Returns `None` when the arc repeats a calculation or definition arc
    /// already present.
    pub fn insert(&mut self, arc: Arc) -> Option<ArcId> {
        debug_assert_eq!(arc.kind.link_kind(), self.kind);

        if let Some(key) = arc.duplicate_key() {
            if !self.seen.insert(key) {
                tracing::debug!(role = %self.role, "suppressed duplicate {:?} arc", self.kind);
                return None;
            }
        }

        let id = ArcId(self.arcs.len() as u32);
        let siblings = self.outgoing.entry(arc.from).or_insert_with(|| {
            self.sources.push(arc.from);
            Vec::new()
        });
        let pos = siblings.partition_point(|sibling| self.arcs[sibling.index()].order <= arc.order);
        siblings.insert(pos, id);

        if let Some(target) = arc.target_concept() {
            self.targets.insert(target);
        }
        self.arcs.push(arc);
        Some(id)
    }

    pub fn arc(&self, id: ArcId) -> &Arc {
        &self.arcs[id.index()]
    }

    pub fn arcs(&self) -> impl Iterator<Item = &Arc> {
        self.arcs.iter()
    }

    /// Outgoing arcs of a concept in ascending order.
    pub fn children_of(&self, concept: ConceptId) -> &[ArcId] {
        self.outgoing
            .get(&concept)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Child arcs of an arc: the outgoing arcs of its target.
    pub fn children(&self, arc: &Arc) -> &[ArcId] {
        match arc.target_concept() {
            Some(target) => self.children_of(target),
            None => &[],
        }
    }

    /// Concepts with outgoing arcs and no incoming ones, in first-seen order.
    pub fn roots(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.sources
            .iter()
            .copied()
            .filter(|source| !self.targets.contains(source))
    }

    pub fn references(&self, concept: ConceptId) -> bool {
        self.outgoing.contains_key(&concept) || self.targets.contains(&concept)
    }

    /// Drops optional arcs overridden by a prohibiting arc of the same or
    /// higher priority, along with the prohibiting arcs themselves.
    /// Returns the number of arcs removed from the walkable structure.
    pub fn resolve_prohibitions(&mut self) -> usize {
        let prohibitions: Vec<(ConceptId, _, i32)> = self
            .arcs
            .iter()
            .filter(|arc| arc.use_attribute == ArcUse::Prohibited)
            .map(|arc| (arc.from, arc.to, arc.priority))
            .collect();
        if prohibitions.is_empty() {
            return 0;
        }

        let arcs = &self.arcs;
        let mut removed = 0;
        for siblings in self.outgoing.values_mut() {
            let before = siblings.len();
            siblings.retain(|id| {
                let arc = &arcs[id.index()];
                arc.use_attribute == ArcUse::Optional
                    && !prohibitions.iter().any(|(from, to, priority)| {
                        *from == arc.from && *to == arc.to && *priority >= arc.priority
                    })
            });
            removed += before - siblings.len();
        }

        self.outgoing.retain(|_, siblings| !siblings.is_empty());
        let outgoing = &self.outgoing;
        self.sources.retain(|source| outgoing.contains_key(source));
        self.targets = self
            .outgoing
            .values()
            .flatten()
            .filter_map(|id| arcs[id.index()].target_concept())
            .collect();
        removed
    }

    /// Pre-order walk from every root, children in ascending order.
    pub fn walk<C>(&self, concepts: &[Concept], consumer: &mut C) -> Result<()>
    where
        C: TreeConsumer + ?Sized,
    {
        for root in self.roots() {
            let visit = Visit {
                concept: concept_at(concepts, root)?,
                label_type: LabelType::STANDARD,
            };
            consumer.root_start(visit)?;
            let mut stack = vec![(root, visit)];
            self.walk_children(root, concepts, &mut stack, consumer)?;
        }
        Ok(())
    }

    fn walk_children<'a, C>(
        &'a self,
        parent: ConceptId,
        concepts: &'a [Concept],
        stack: &mut Vec<(ConceptId, Visit<'a>)>,
        consumer: &mut C,
    ) -> Result<()>
    where
        C: TreeConsumer + ?Sized,
    {
        for &arc_id in self.children_of(parent) {
            let arc = self.arc(arc_id);
            let Some(target) = arc.target_concept() else {
                continue;
            };
            let concept = concept_at(concepts, target)?;
            if stack.iter().any(|(id, _)| *id == target) {
                tracing::warn!(
                    role = %self.role,
                    concept = concept.qname(),
                    "cycle in {:?} network, not descending",
                    self.kind
                );
                continue;
            }

            let visit = Visit {
                concept,
                label_type: arc
                    .preferred_label()
                    .map(LabelType::as_str)
                    .unwrap_or(LabelType::STANDARD),
            };
            let ancestors: Vec<Visit<'a>> = stack.iter().rev().map(|(_, v)| *v).collect();

            consumer.node_start(visit, &ancestors)?;
            stack.push((target, visit));
            self.walk_children(target, concepts, stack, consumer)?;
            stack.pop();
            consumer.node_end(visit, &ancestors)?;
        }
        Ok(())
    }
}

fn concept_at(concepts: &[Concept], id: ConceptId) -> Result<&Concept> {
    concepts
        .get(id.index())
        .ok_or_else(|| Error::NotFound(format!("concept #{}", id.0)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{ArcKind, ArcTarget};
    use pretty_assertions::assert_eq;

    /// Records the walk as `start`/`end` lines with the ancestor chain.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub lines: Vec<String>,
    }

    impl TreeConsumer for Recorder {
        fn root_start(&mut self, root: Visit<'_>) -> Result<()> {
            self.lines.push(format!("root {}", root.qname()));
            Ok(())
        }

        fn node_start(&mut self, node: Visit<'_>, ancestors: &[Visit<'_>]) -> Result<()> {
            let path: Vec<&str> = ancestors.iter().map(Visit::qname).collect();
            self.lines.push(format!(
                "start {} [{}] <- {}",
                node.qname(),
                node.label_type,
                path.join(",")
            ));
            Ok(())
        }

        fn node_end(&mut self, node: Visit<'_>, _ancestors: &[Visit<'_>]) -> Result<()> {
            self.lines.push(format!("end {}", node.qname()));
            Ok(())
        }
    }

    fn concepts(names: &[&str]) -> Vec<Concept> {
        names.iter().map(|n| Concept::new("t", n)).collect()
    }

    fn pres(from: u32, to: u32, order: f64) -> Arc {
        Arc::new(
            ConceptId(from),
            ArcTarget::Concept(ConceptId(to)),
            ArcKind::Presentation { preferred_label: LabelType::standard() },
        )
        .with_order(order)
    }

    #[test]
    fn test_insert_keeps_order_and_ties_stable() {
        let mut net = Network::new("r", LinkKind::Presentation);
        let a = net.insert(pres(0, 1, 2.0)).unwrap();
        let b = net.insert(pres(0, 2, 1.0)).unwrap();
        let c = net.insert(pres(0, 3, 2.0)).unwrap();
        let d = net.insert(pres(0, 4, 1.5)).unwrap();
        assert_eq!(net.children_of(ConceptId(0)), &[b, d, a, c]);
    }

    #[test]
    fn test_calculation_duplicates_are_suppressed() {
        let mut net = Network::new("r", LinkKind::Calculation);
        let calc = |weight| {
            Arc::new(
                ConceptId(0),
                ArcTarget::Concept(ConceptId(1)),
                ArcKind::Calculation { weight },
            )
        };
        assert!(net.insert(calc(1.0)).is_some());
        assert!(net.insert(calc(1.0)).is_none());
        assert!(net.insert(calc(-1.0)).is_some());
        assert_eq!(net.len(), 2);
    }

    #[test]
    fn test_walk_is_preorder_with_nearest_first_ancestors() {
        let concepts = concepts(&["Root", "A", "B", "A1", "Other", "O1"]);
        let mut net = Network::new("r", LinkKind::Presentation);
        net.insert(pres(0, 2, 2.0));
        net.insert(pres(0, 1, 1.0));
        let mut total = pres(1, 3, 1.0);
        total.kind = ArcKind::Presentation {
            preferred_label: LabelType::from_role(Some("http://www.xbrl.org/2003/role/totalLabel")),
        };
        net.insert(total);
        net.insert(pres(4, 5, 1.0));

        let mut recorder = Recorder::default();
        net.walk(&concepts, &mut recorder).unwrap();
        assert_eq!(
            recorder.lines,
            vec![
                "root t:Root",
                "start t:A [label] <- t:Root",
                "start t:A1 [totalLabel] <- t:A,t:Root",
                "end t:A1",
                "end t:A",
                "start t:B [label] <- t:Root",
                "end t:B",
                "root t:Other",
                "start t:O1 [label] <- t:Other",
                "end t:O1",
            ]
        );
    }

    #[test]
    fn test_walk_does_not_descend_cycles() {
        let concepts = concepts(&["Root", "A", "B"]);
        let mut net = Network::new("r", LinkKind::Presentation);
        net.insert(pres(0, 1, 1.0));
        net.insert(pres(1, 2, 1.0));
        net.insert(pres(2, 1, 1.0));

        let mut recorder = Recorder::default();
        net.walk(&concepts, &mut recorder).unwrap();
        assert_eq!(recorder.lines.len(), 5);
    }

    #[test]
    fn test_prohibition_removes_overridden_arcs() {
        let mut net = Network::new("r", LinkKind::Presentation);
        net.insert(pres(0, 1, 1.0));
        net.insert(pres(1, 2, 1.0));
        let mut prohibit = pres(0, 1, 1.0);
        prohibit.use_attribute = ArcUse::Prohibited;
        prohibit.priority = 1;
        net.insert(prohibit);

        assert_eq!(net.resolve_prohibitions(), 2);
        assert!(net.children_of(ConceptId(0)).is_empty());
        assert_eq!(net.roots().collect::<Vec<_>>(), vec![ConceptId(1)]);
    }

    #[test]
    fn test_lower_priority_prohibition_is_ignored() {
        let mut net = Network::new("r", LinkKind::Presentation);
        let mut kept = pres(0, 1, 1.0);
        kept.priority = 2;
        net.insert(kept);
        let mut prohibit = pres(0, 1, 1.0);
        prohibit.use_attribute = ArcUse::Prohibited;
        prohibit.priority = 1;
        net.insert(prohibit);

        assert_eq!(net.resolve_prohibitions(), 1);
        assert_eq!(net.children_of(ConceptId(0)).len(), 1);
    }
}
