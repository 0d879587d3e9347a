//! In-memory taxonomy set: concepts, roles and their networks, label resources.

use crate::model::{
    ArcTarget, ArcroleType, Concept, ConceptId, LinkKind, Resource, ResourceId, RoleType,
    STANDARD_ARCROLES,
};
use crate::network::{Network, TreeConsumer};
use crate::Result;
use ahash::AHashMap;
use compact_str::CompactString;

/// What tree building needs from a loaded taxonomy.
pub trait TaxonomySource {
    fn roles(&self) -> &[Role];

    fn concept(&self, id: ConceptId) -> Option<&Concept>;

    fn find_concept(&self, qname: &str) -> Option<ConceptId>;

    /// Ordered pre-order walk of the role's presentation network. Roles
    /// without one produce no callbacks.
    fn walk(&self, role: &Role, consumer: &mut dyn TreeConsumer) -> Result<()>;
}

/// An extended link role and the networks declared under it.
#[derive(Debug, Clone)]
pub struct Role {
    pub uri: CompactString,
    pub definition: CompactString,
    networks: Vec<Network>,
}

impl Role {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: CompactString::from(uri),
            definition: CompactString::default(),
            networks: Vec::new(),
        }
    }

    pub fn network(&self, kind: LinkKind) -> Option<&Network> {
        self.networks.iter().find(|n| n.kind() == kind)
    }

    pub fn network_mut(&mut self, kind: LinkKind) -> &mut Network {
        match self.networks.iter().position(|n| n.kind() == kind) {
            Some(pos) => &mut self.networks[pos],
            None => {
                self.networks.push(Network::new(&self.uri, kind));
                let last = self.networks.len() - 1;
                &mut self.networks[last]
            }
        }
    }

    pub fn presentation(&self) -> Option<&Network> {
        self.network(LinkKind::Presentation)
    }

    pub fn calculation(&self) -> Option<&Network> {
        self.network(LinkKind::Calculation)
    }

    pub fn definition_network(&self) -> Option<&Network> {
        self.network(LinkKind::Definition)
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }
}

#[derive(Debug, Clone)]
pub struct Dts {
    concepts: Vec<Concept>,
    by_qname: AHashMap<CompactString, ConceptId>,
    by_id: AHashMap<CompactString, ConceptId>,
    resources: Vec<Resource>,
    roles: Vec<Role>,
    role_index: AHashMap<CompactString, usize>,
    arcroles: AHashMap<CompactString, ArcroleType>,
}

impl Default for Dts {
    fn default() -> Self {
        Self::new()
    }
}

impl Dts {
    pub fn new() -> Self {
        let arcroles = STANDARD_ARCROLES
            .iter()
            .map(|uri| {
                let uri = CompactString::from(*uri);
                let arcrole = ArcroleType {
                    uri: uri.clone(),
                    ..ArcroleType::default()
                };
                (uri, arcrole)
            })
            .collect();

        Self {
            concepts: Vec::new(),
            by_qname: AHashMap::new(),
            by_id: AHashMap::new(),
            resources: Vec::new(),
            roles: Vec::new(),
            role_index: AHashMap::new(),
            arcroles,
        }
    }

    /// Registers a concept; a concept with the same qualified name keeps its
    /// first registration.
    pub fn add_concept(&mut self, concept: Concept) -> ConceptId {
        if let Some(&id) = self.by_qname.get(concept.qname()) {
            return id;
        }
        let id = ConceptId(self.concepts.len() as u32);
        self.by_qname.insert(CompactString::from(concept.qname()), id);
        self.by_id.insert(concept.id.clone(), id);
        self.concepts.push(concept);
        id
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn concept_by_id(&self, id: &str) -> Option<ConceptId> {
        self.by_id.get(id).copied()
    }

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(resource);
        id
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.index())
    }

    pub fn role(&self, uri: &str) -> Option<&Role> {
        self.role_index.get(uri).map(|&i| &self.roles[i])
    }

    pub fn role_mut(&mut self, uri: &str) -> &mut Role {
        let index = match self.role_index.get(uri) {
            Some(&i) => i,
            None => {
                self.roles.push(Role::new(uri));
                let i = self.roles.len() - 1;
                self.role_index.insert(CompactString::from(uri), i);
                i
            }
        };
        &mut self.roles[index]
    }

    pub fn declare_role(&mut self, role_type: RoleType) {
        let role = self.role_mut(&role_type.uri);
        role.definition = role_type.definition;
    }

    pub fn declare_arcrole(&mut self, arcrole: ArcroleType) {
        self.arcroles.insert(arcrole.uri.clone(), arcrole);
    }

    /// Resolves an arcrole URI against the registry. Unknown arcroles are
    /// logged and recorded as absent.
    pub fn resolve_arcrole(&self, uri: Option<&str>) -> Option<CompactString> {
        let uri = uri?;
        if self.arcroles.contains_key(uri) {
            Some(CompactString::from(uri))
        } else {
            tracing::warn!(arcrole = uri, "unresolved arcrole");
            None
        }
    }

    /// Applies `use="prohibited"` arcs in every network.
    pub fn resolve_prohibitions(&mut self) -> usize {
        self.roles
            .iter_mut()
            .flat_map(|role| role.networks.iter_mut())
            .map(Network::resolve_prohibitions)
            .sum()
    }

    /// Label text for a concept: exact role and language first, then any
    /// label in the language, then any label at all.
    pub fn label(&self, concept: ConceptId, label_type: &str, lang: &str) -> Option<&str> {
        let labels: Vec<&Resource> = self
            .roles
            .iter()
            .filter_map(|role| role.network(LinkKind::Label))
            .flat_map(|net| net.children_of(concept).iter().map(move |&id| net.arc(id)))
            .filter_map(|arc| match arc.to {
                ArcTarget::Resource(id) => self.resource(id),
                ArcTarget::Concept(_) => None,
            })
            .collect();

        labels
            .iter()
            .copied()
            .find(|l| l.role.as_str() == label_type && l.lang == lang)
            .or_else(|| labels.iter().copied().find(|l| l.lang == lang))
            .or_else(|| labels.first().copied())
            .map(|l| l.text.as_str())
    }
}

impl TaxonomySource for Dts {
    fn roles(&self) -> &[Role] {
        &self.roles
    }

    fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(id.index())
    }

    fn find_concept(&self, qname: &str) -> Option<ConceptId> {
        self.by_qname.get(qname).copied()
    }

    fn walk(&self, role: &Role, consumer: &mut dyn TreeConsumer) -> Result<()> {
        match role.presentation() {
            Some(network) => network.walk(&self.concepts, consumer),
            None => Ok(()),
        }
    }
}
