use crate::{Error, Result};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Balance
// ============================================================================

/// Intrinsic debit/credit sign of a concept, fixed by the taxonomy author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Balance {
    #[default]
    None,
    Debit,
    Credit,
}

impl Balance {
    pub const ALL: [Balance; 3] = [Balance::None, Balance::Debit, Balance::Credit];

    pub fn as_str(self) -> &'static str {
        match self {
            Balance::None => "none",
            Balance::Debit => "debit",
            Balance::Credit => "credit",
        }
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The 2-valued sign, if any.
    pub fn signed(self) -> Option<SubTreeBalance> {
        match self {
            Balance::None => None,
            Balance::Debit => Some(SubTreeBalance::Debit),
            Balance::Credit => Some(SubTreeBalance::Credit),
        }
    }
}

impl FromStr for Balance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("none") {
            Ok(Balance::None)
        } else if s.eq_ignore_ascii_case("debit") {
            Ok(Balance::Debit)
        } else if s.eq_ignore_ascii_case("credit") {
            Ok(Balance::Credit)
        } else {
            Err(Error::InvalidBalance(s.to_string()))
        }
    }
}

impl TryFrom<String> for Balance {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Balance> for &'static str {
    fn from(balance: Balance) -> Self {
        balance.as_str()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived sign of a statement subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubTreeBalance {
    Debit,
    Credit,
}

impl fmt::Display for SubTreeBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubTreeBalance::Debit => f.write_str("debit"),
            SubTreeBalance::Credit => f.write_str("credit"),
        }
    }
}

// ============================================================================
// Concepts and resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArcId(pub u32);

macro_rules! impl_index {
    ($($id:ty),*) => {$(
        impl $id {
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

impl_index!(ConceptId, ResourceId, ArcId);

#[derive(Debug, Clone)]
pub struct Concept {
    prefix: CompactString,
    name: CompactString,
    qname: CompactString,
    pub id: CompactString,
    pub namespace: CompactString,
    /// Raw `xbrli:balance` token, parsed on demand.
    pub balance: Option<CompactString>,
    pub period_type: Option<CompactString>,
    pub substitution_group: Option<CompactString>,
    pub abstract_element: bool,
}

impl Concept {
    pub fn new(prefix: &str, name: &str) -> Self {
        let qname = if prefix.is_empty() {
            CompactString::from(name)
        } else {
            compact_str::format_compact!("{}:{}", prefix, name)
        };
        Self {
            prefix: CompactString::from(prefix),
            name: CompactString::from(name),
            qname,
            id: CompactString::from(name),
            namespace: CompactString::default(),
            balance: None,
            period_type: None,
            substitution_group: None,
            abstract_element: false,
        }
    }

    pub fn with_balance(mut self, balance: &str) -> Self {
        self.balance = Some(CompactString::from(balance));
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = CompactString::from(id);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `prefix:Name`
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// Absent attribute means `none`; an unknown token is an error.
    pub fn balance(&self) -> Result<Balance> {
        match &self.balance {
            Some(token) => token.parse(),
            None => Ok(Balance::None),
        }
    }
}

/// Text resource targeted by label, reference and footnote arcs.
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: LinkKind,
    pub role: LabelType,
    pub lang: CompactString,
    pub text: String,
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RoleType {
    pub uri: CompactString,
    pub id: Option<CompactString>,
    pub definition: CompactString,
    pub used_on: Vec<CompactString>,
}

#[derive(Debug, Clone, Default)]
pub struct ArcroleType {
    pub uri: CompactString,
    pub definition: CompactString,
    pub cycles_allowed: CompactString,
}

pub const STANDARD_LINK_ROLE: &str = "http://www.xbrl.org/2003/role/link";

pub const STANDARD_ARCROLES: &[&str] = &[
    "http://www.xbrl.org/2003/arcrole/parent-child",
    "http://www.xbrl.org/2003/arcrole/summation-item",
    "http://www.xbrl.org/2003/arcrole/general-special",
    "http://www.xbrl.org/2003/arcrole/essence-alias",
    "http://www.xbrl.org/2003/arcrole/similar-tuples",
    "http://www.xbrl.org/2003/arcrole/requires-element",
    "http://www.xbrl.org/2003/arcrole/concept-label",
    "http://www.xbrl.org/2003/arcrole/concept-reference",
    "http://www.xbrl.org/2003/arcrole/fact-footnote",
    "http://xbrl.org/int/dim/arcrole/all",
    "http://xbrl.org/int/dim/arcrole/notAll",
    "http://xbrl.org/int/dim/arcrole/hypercube-dimension",
    "http://xbrl.org/int/dim/arcrole/dimension-domain",
    "http://xbrl.org/int/dim/arcrole/domain-member",
    "http://xbrl.org/int/dim/arcrole/dimension-default",
];

// ============================================================================
// Arcs
// ============================================================================

/// Preferred-label role in effect at a presentation position, normalized to
/// the last segment of the role URI (`totalLabel`, `negatedLabel`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelType(CompactString);

impl LabelType {
    pub const STANDARD: &'static str = "label";

    pub fn standard() -> Self {
        Self(CompactString::from(Self::STANDARD))
    }

    pub fn from_role(role: Option<&str>) -> Self {
        let role = role.map(str::trim).unwrap_or_default();
        let last = role.rsplit('/').next().unwrap_or_default();
        if last.is_empty() {
            Self::standard()
        } else {
            Self(CompactString::from(last))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LabelType {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArcUse {
    #[default]
    Optional,
    Prohibited,
}

impl ArcUse {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("prohibited") => ArcUse::Prohibited,
            _ => ArcUse::Optional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextElement {
    Segment,
    Scenario,
}

impl ContextElement {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            Some("segment") => Some(ContextElement::Segment),
            Some("scenario") => Some(ContextElement::Scenario),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkKind {
    Presentation,
    Calculation,
    Definition,
    Label,
    Reference,
    Footnote,
}

impl LinkKind {
    /// Extended link element local name, e.g. `presentationLink`.
    pub fn from_link_name(local: &[u8]) -> Option<Self> {
        match local {
            b"presentationLink" => Some(LinkKind::Presentation),
            b"calculationLink" => Some(LinkKind::Calculation),
            b"definitionLink" => Some(LinkKind::Definition),
            b"labelLink" => Some(LinkKind::Label),
            b"referenceLink" => Some(LinkKind::Reference),
            b"footnoteLink" => Some(LinkKind::Footnote),
            _ => None,
        }
    }

    /// Arc element local name, e.g. `calculationArc`.
    pub fn from_arc_name(local: &[u8]) -> Option<Self> {
        match local {
            b"presentationArc" => Some(LinkKind::Presentation),
            b"calculationArc" => Some(LinkKind::Calculation),
            b"definitionArc" => Some(LinkKind::Definition),
            b"labelArc" => Some(LinkKind::Label),
            b"referenceArc" => Some(LinkKind::Reference),
            b"footnoteArc" => Some(LinkKind::Footnote),
            _ => None,
        }
    }

    /// Resource element local name, e.g. `label`.
    pub fn from_resource_name(local: &[u8]) -> Option<Self> {
        match local {
            b"label" => Some(LinkKind::Label),
            b"reference" => Some(LinkKind::Reference),
            b"footnote" => Some(LinkKind::Footnote),
            _ => None,
        }
    }

    pub fn targets_resources(self) -> bool {
        matches!(self, LinkKind::Label | LinkKind::Reference | LinkKind::Footnote)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArcKind {
    Presentation { preferred_label: LabelType },
    Calculation { weight: f64 },
    Definition { closed: bool, context_element: Option<ContextElement> },
    Label,
    Reference,
    Footnote,
}

impl ArcKind {
    pub fn link_kind(&self) -> LinkKind {
        match self {
            ArcKind::Presentation { .. } => LinkKind::Presentation,
            ArcKind::Calculation { .. } => LinkKind::Calculation,
            ArcKind::Definition { .. } => LinkKind::Definition,
            ArcKind::Label => LinkKind::Label,
            ArcKind::Reference => LinkKind::Reference,
            ArcKind::Footnote => LinkKind::Footnote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArcTarget {
    Concept(ConceptId),
    Resource(ResourceId),
}

/// One linkbase edge. Immutable once inserted into a network.
#[derive(Debug, Clone)]
pub struct Arc {
    pub from: ConceptId,
    pub to: ArcTarget,
    pub order: f64,
    /// `None` when the arcrole did not resolve against the registry.
    pub arcrole: Option<CompactString>,
    pub priority: i32,
    pub use_attribute: ArcUse,
    pub arc_type: CompactString,
    pub title: Option<CompactString>,
    pub kind: ArcKind,
}

impl Arc {
    pub fn new(from: ConceptId, to: ArcTarget, kind: ArcKind) -> Self {
        Self {
            from,
            to,
            order: 1.0,
            arcrole: None,
            priority: 0,
            use_attribute: ArcUse::Optional,
            arc_type: CompactString::from("arc"),
            title: None,
            kind,
        }
    }

    pub fn with_order(mut self, order: f64) -> Self {
        self.order = order;
        self
    }

    pub fn target_concept(&self) -> Option<ConceptId> {
        match self.to {
            ArcTarget::Concept(id) => Some(id),
            ArcTarget::Resource(_) => None,
        }
    }

    pub fn preferred_label(&self) -> Option<&LabelType> {
        match &self.kind {
            ArcKind::Presentation { preferred_label } => Some(preferred_label),
            _ => None,
        }
    }

    /// Sibling ordering; ties keep insertion order when used with a stable sort.
    pub fn cmp_order(&self, other: &Arc) -> Ordering {
        self.order.total_cmp(&other.order)
    }

    /// Coarse equality used to suppress repeated calculation and definition
    /// arcs within one network. Other kinds are never suppressed.
    pub fn duplicate_key(&self) -> Option<ArcKey> {
        let discriminant = match &self.kind {
            ArcKind::Calculation { weight } => KindDiscriminant::Weight(*weight as i64),
            ArcKind::Definition { closed, .. } => KindDiscriminant::Closed(*closed),
            _ => return None,
        };
        Some(ArcKey {
            from: self.from,
            to: self.to,
            arcrole: self.arcrole.clone(),
            arc_type: self.arc_type.clone(),
            discriminant,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArcKey {
    from: ConceptId,
    to: ArcTarget,
    arcrole: Option<CompactString>,
    arc_type: CompactString,
    discriminant: KindDiscriminant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KindDiscriminant {
    Weight(i64),
    Closed(bool),
}

// ============================================================================
// Attribute parsing. Malformed values fall back to defaults, never fail.
// ============================================================================

pub fn parse_order(raw: Option<&str>) -> f64 {
    parse_finite(raw).unwrap_or(1.0)
}

pub fn parse_weight(raw: Option<&str>) -> f64 {
    parse_finite(raw).unwrap_or(1.0)
}

pub fn parse_priority(raw: Option<&str>) -> i32 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

pub fn parse_closed(raw: Option<&str>) -> bool {
    raw.map(|s| s.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_finite(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_tokens_are_case_insensitive() {
        assert_eq!("DEBIT".parse::<Balance>().unwrap(), Balance::Debit);
        assert_eq!("Credit".parse::<Balance>().unwrap(), Balance::Credit);
        assert_eq!("none".parse::<Balance>().unwrap(), Balance::None);
        assert!(matches!(
            "asset".parse::<Balance>(),
            Err(Error::InvalidBalance(token)) if token == "asset"
        ));
    }

    #[test]
    fn test_concept_balance_defaults_to_none() {
        let concept = Concept::new("us-gaap", "Assets");
        assert_eq!(concept.qname(), "us-gaap:Assets");
        assert_eq!(concept.balance().unwrap(), Balance::None);
        assert_eq!(concept.with_balance("debit").balance().unwrap(), Balance::Debit);
        assert!(Concept::new("x", "Y").with_balance("sideways").balance().is_err());
    }

    #[test]
    fn test_attribute_defaults() {
        assert_eq!(parse_order(None), 1.0);
        assert_eq!(parse_order(Some("2.5")), 2.5);
        assert_eq!(parse_order(Some("two")), 1.0);
        assert_eq!(parse_order(Some("NaN")), 1.0);
        assert_eq!(parse_weight(Some("-1")), -1.0);
        assert_eq!(parse_weight(Some("")), 1.0);
        assert_eq!(parse_priority(Some("x")), 0);
        assert!(parse_closed(Some("true")));
        assert!(parse_closed(Some("TRUE")));
        assert!(!parse_closed(Some("yes")));
        assert!(!parse_closed(None));
    }

    #[test]
    fn test_label_type_normalization() {
        assert_eq!(LabelType::from_role(None).as_str(), "label");
        assert_eq!(LabelType::from_role(Some("")).as_str(), "label");
        assert_eq!(
            LabelType::from_role(Some("http://www.xbrl.org/2003/role/totalLabel")).as_str(),
            "totalLabel"
        );
        assert_eq!(LabelType::from_role(Some("http://x/")).as_str(), "label");
    }

    #[test]
    fn test_duplicate_key_is_coarse() {
        let calc = |weight| {
            Arc::new(
                ConceptId(0),
                ArcTarget::Concept(ConceptId(1)),
                ArcKind::Calculation { weight },
            )
        };
        assert_eq!(calc(1.0).duplicate_key(), calc(1.4).with_order(7.0).duplicate_key());
        assert_ne!(calc(1.0).duplicate_key(), calc(-1.0).duplicate_key());

        let def = |closed| {
            Arc::new(
                ConceptId(0),
                ArcTarget::Concept(ConceptId(1)),
                ArcKind::Definition { closed, context_element: None },
            )
        };
        assert_eq!(def(true).duplicate_key(), def(true).duplicate_key());
        assert_ne!(def(true).duplicate_key(), def(false).duplicate_key());

        let pres = Arc::new(
            ConceptId(0),
            ArcTarget::Concept(ConceptId(1)),
            ArcKind::Presentation { preferred_label: LabelType::standard() },
        );
        assert!(pres.duplicate_key().is_none());
    }
}
