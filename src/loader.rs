// Taxonomy schema and linkbase loading
use crate::dts::Dts;
use crate::model::*;
use crate::Result;
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Contents of a file read from disk, memory-mapped with the `mmap` feature.
pub(crate) enum FileBytes {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Owned(bytes) => bytes,
            #[cfg(feature = "mmap")]
            FileBytes::Mapped(map) => map,
        }
    }
}

#[cfg(feature = "mmap")]
pub(crate) fn read_file(path: &Path) -> io::Result<FileBytes> {
    let file = std::fs::File::open(path)?;
    // SAFETY: the map is only read, and only for the duration of one load.
    let map = unsafe { memmap2::Mmap::map(&file)? };
    Ok(FileBytes::Mapped(map))
}

#[cfg(not(feature = "mmap"))]
pub(crate) fn read_file(path: &Path) -> io::Result<FileBytes> {
    std::fs::read(path).map(FileBytes::Owned)
}

/// Files a document points at.
#[derive(Debug, Default)]
pub struct References {
    pub schemas: Vec<PathBuf>,
    pub linkbases: Vec<PathBuf>,
}

/// Discovers and loads a taxonomy from local files.
///
/// Schemas are followed first (imports, includes, linkbase references) so
/// that every concept is registered before any linkbase locator is resolved.
/// Remote references are skipped.
pub struct DtsLoader {
    dts: Dts,
    visited: AHashSet<PathBuf>,
    linkbases: Vec<PathBuf>,
}

impl Default for DtsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DtsLoader {
    pub fn new() -> Self {
        Self {
            dts: Dts::new(),
            visited: AHashSet::new(),
            linkbases: Vec::new(),
        }
    }

    /// Loads an entry schema and everything it references locally.
    pub fn load<P: AsRef<Path>>(entry: P) -> Result<Dts> {
        let mut loader = Self::new();
        loader.add_schema(entry)?;
        loader.load_linkbases();
        Ok(loader.finish())
    }

    /// Parses a schema and, best-effort, the schemas it references.
    /// Linkbases found along the way are queued for [`Self::load_linkbases`].
    pub fn add_schema<P: AsRef<Path>>(&mut self, entry: P) -> Result<()> {
        let entry = entry.as_ref().to_path_buf();
        self.visited.insert(entry.clone());
        let refs = self.parse_file(&entry)?;
        self.linkbases.extend(refs.linkbases);

        let mut queue: VecDeque<PathBuf> = refs.schemas.into();
        while let Some(path) = queue.pop_front() {
            if !self.visited.insert(path.clone()) {
                continue;
            }
            match self.parse_file(&path) {
                Ok(refs) => {
                    queue.extend(refs.schemas);
                    self.linkbases.extend(refs.linkbases);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping schema");
                }
            }
        }
        Ok(())
    }

    pub fn add_linkbase<P: AsRef<Path>>(&mut self, path: P) {
        self.linkbases.push(path.as_ref().to_path_buf());
    }

    /// Parses every queued linkbase once; unreadable ones are logged.
    pub fn load_linkbases(&mut self) {
        let queued = std::mem::take(&mut self.linkbases);
        for path in queued {
            if !self.visited.insert(path.clone()) {
                continue;
            }
            if let Err(err) = self.parse_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "skipping linkbase");
            }
        }
    }

    fn parse_file(&mut self, path: &Path) -> Result<References> {
        tracing::debug!(path = %path.display(), "loading taxonomy document");
        let bytes = read_file(path)?;
        self.parse_bytes(&bytes, Some(path))
    }

    /// Parses one schema or linkbase document. `base` resolves relative hrefs.
    pub fn parse_bytes(&mut self, data: &[u8], base: Option<&Path>) -> Result<References> {
        // Skip BOM if present
        let data = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
            &data[3..]
        } else {
            data
        };

        let mut parser = DocumentParser::new(&mut self.dts, base);
        parser.parse(data)?;
        Ok(parser.refs)
    }

    pub fn finish(mut self) -> Dts {
        let removed = self.dts.resolve_prohibitions();
        tracing::debug!(
            concepts = self.dts.concepts().len(),
            prohibited = removed,
            "taxonomy loaded"
        );
        self.dts
    }
}

// ============================================================================
// Document parsing
// ============================================================================

/// Attributes of one element, keyed by their qualified names.
#[derive(Debug, Default)]
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn read(e: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self(attrs))
    }

    /// Looks up by local name, ignoring the prefix.
    fn get(&self, local: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| {
                key == local
                    || (!key.starts_with("xmlns") && key.rsplit(':').next() == Some(local))
            })
            .map(|(_, value)| value.as_str())
    }

    fn prefix_for(&self, namespace: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, value)| key.starts_with("xmlns:") && value == namespace)
            .map(|(key, _)| &key["xmlns:".len()..])
    }
}

#[derive(Debug)]
struct PendingArc {
    kind: LinkKind,
    from: CompactString,
    to: CompactString,
    attrs: Attrs,
}

#[derive(Debug)]
struct ExtendedLink {
    kind: LinkKind,
    role: CompactString,
    locs: AHashMap<CompactString, Vec<ConceptId>>,
    resources: AHashMap<CompactString, Vec<ResourceId>>,
    arcs: Vec<PendingArc>,
    unresolved: usize,
}

#[derive(Debug)]
struct ResourceCapture {
    kind: LinkKind,
    label: CompactString,
    role: LabelType,
    lang: CompactString,
    text: String,
    depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum TextTarget {
    RoleDefinition,
    RoleUsedOn,
    ArcroleDefinition,
}

struct DocumentParser<'a> {
    dts: &'a mut Dts,
    base: Option<&'a Path>,
    refs: References,
    stack: Vec<CompactString>,
    target_namespace: CompactString,
    prefix: Option<CompactString>,
    role_type: Option<RoleType>,
    arcrole_type: Option<ArcroleType>,
    text_target: Option<TextTarget>,
    link: Option<ExtendedLink>,
    resource: Option<ResourceCapture>,
}

impl<'a> DocumentParser<'a> {
    fn new(dts: &'a mut Dts, base: Option<&'a Path>) -> Self {
        Self {
            dts,
            base,
            refs: References::default(),
            stack: Vec::new(),
            target_namespace: CompactString::default(),
            prefix: None,
            role_type: None,
            arcrole_type: None,
            text_target: None,
            link: None,
            resource: None,
        }
    }

    fn parse(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let local = CompactString::from_utf8_lossy(e.local_name().as_ref());
                    self.start(&e, &local)?;
                    self.stack.push(local);
                }
                Event::Empty(e) => {
                    let local = CompactString::from_utf8_lossy(e.local_name().as_ref());
                    self.start(&e, &local)?;
                    self.end(&local);
                }
                Event::End(e) => {
                    let local = CompactString::from_utf8_lossy(e.local_name().as_ref());
                    self.stack.pop();
                    self.end(&local);
                }
                Event::Text(t) => {
                    if self.wants_text() {
                        let text = t.unescape()?;
                        self.text(&text);
                    }
                }
                Event::CData(t) => {
                    if self.wants_text() {
                        let text = String::from_utf8_lossy(&t);
                        self.text(&text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn parent(&self) -> Option<&str> {
        self.stack.last().map(CompactString::as_str)
    }

    fn wants_text(&self) -> bool {
        self.text_target.is_some() || self.resource.is_some()
    }

    fn start(&mut self, e: &BytesStart<'_>, local: &str) -> Result<()> {
        if let Some(resource) = self.resource.as_mut() {
            // Reference parts and footnote markup are flattened into the text.
            if !resource.text.is_empty() {
                resource.text.push_str("; ");
            }
            return Ok(());
        }

        match local {
            "schema" if self.stack.is_empty() => {
                let attrs = Attrs::read(e)?;
                self.target_namespace = CompactString::from(attrs.get("targetNamespace").unwrap_or_default());
                self.prefix = attrs.prefix_for(&self.target_namespace).map(CompactString::from);
            }
            "element" if self.parent() == Some("schema") => {
                let attrs = Attrs::read(e)?;
                self.add_concept(&attrs);
            }
            "import" | "include" if self.parent() == Some("schema") => {
                let attrs = Attrs::read(e)?;
                if let Some(path) = attrs.get("schemaLocation").and_then(|h| self.resolve_href(h)) {
                    self.refs.schemas.push(path);
                }
            }
            "linkbaseRef" => {
                let attrs = Attrs::read(e)?;
                if let Some(path) = attrs.get("href").and_then(|h| self.resolve_href(h)) {
                    self.refs.linkbases.push(path);
                }
            }
            "roleType" => {
                let attrs = Attrs::read(e)?;
                self.role_type = Some(RoleType {
                    uri: CompactString::from(attrs.get("roleURI").unwrap_or_default()),
                    id: attrs.get("id").map(CompactString::from),
                    ..RoleType::default()
                });
            }
            "arcroleType" => {
                let attrs = Attrs::read(e)?;
                self.arcrole_type = Some(ArcroleType {
                    uri: CompactString::from(attrs.get("arcroleURI").unwrap_or_default()),
                    cycles_allowed: CompactString::from(attrs.get("cyclesAllowed").unwrap_or_default()),
                    ..ArcroleType::default()
                });
            }
            "definition" if self.role_type.is_some() => {
                self.text_target = Some(TextTarget::RoleDefinition);
            }
            "definition" if self.arcrole_type.is_some() => {
                self.text_target = Some(TextTarget::ArcroleDefinition);
            }
            "usedOn" if self.role_type.is_some() => {
                self.text_target = Some(TextTarget::RoleUsedOn);
            }
            _ => self.start_link_element(e, local)?,
        }
        Ok(())
    }

    fn start_link_element(&mut self, e: &BytesStart<'_>, local: &str) -> Result<()> {
        let bytes = local.as_bytes();

        if let Some(kind) = LinkKind::from_link_name(bytes) {
            let attrs = Attrs::read(e)?;
            self.link = Some(ExtendedLink {
                kind,
                role: CompactString::from(attrs.get("role").unwrap_or(STANDARD_LINK_ROLE)),
                locs: AHashMap::new(),
                resources: AHashMap::new(),
                arcs: Vec::new(),
                unresolved: 0,
            });
            return Ok(());
        }

        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        if local == "loc" {
            let attrs = Attrs::read(e)?;
            let label = CompactString::from(attrs.get("label").unwrap_or_default());
            let fragment = attrs
                .get("href")
                .and_then(|href| href.rsplit_once('#'))
                .map(|(_, id)| id)
                .unwrap_or_default();
            match self.dts.concept_by_id(fragment) {
                Some(concept) => link.locs.entry(label).or_default().push(concept),
                None => {
                    tracing::debug!(href = attrs.get("href"), "unresolved locator");
                    link.unresolved += 1;
                }
            }
        } else if let Some(kind) = LinkKind::from_arc_name(bytes) {
            let attrs = Attrs::read(e)?;
            link.arcs.push(PendingArc {
                kind,
                from: CompactString::from(attrs.get("from").unwrap_or_default()),
                to: CompactString::from(attrs.get("to").unwrap_or_default()),
                attrs,
            });
        } else if let Some(kind) = LinkKind::from_resource_name(bytes) {
            let attrs = Attrs::read(e)?;
            self.resource = Some(ResourceCapture {
                kind,
                label: CompactString::from(attrs.get("label").unwrap_or_default()),
                role: LabelType::from_role(attrs.get("role")),
                lang: CompactString::from(attrs.get("lang").unwrap_or_default()),
                text: String::new(),
                depth: self.stack.len(),
            });
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(resource) = self.resource.as_mut() {
            resource.text.push_str(text);
            return;
        }
        match self.text_target {
            Some(TextTarget::RoleDefinition) => {
                if let Some(role) = self.role_type.as_mut() {
                    role.definition.push_str(text);
                }
            }
            Some(TextTarget::RoleUsedOn) => {
                if let Some(role) = self.role_type.as_mut() {
                    role.used_on.push(CompactString::from(text));
                }
            }
            Some(TextTarget::ArcroleDefinition) => {
                if let Some(arcrole) = self.arcrole_type.as_mut() {
                    arcrole.definition.push_str(text);
                }
            }
            None => {}
        }
    }

    fn end(&mut self, local: &str) {
        if let Some(resource) = &self.resource {
            if resource.depth == self.stack.len() {
                if let Some(resource) = self.resource.take() {
                    self.finish_resource(resource);
                }
            }
            return;
        }

        match local {
            "definition" | "usedOn" => self.text_target = None,
            "roleType" => {
                if let Some(role_type) = self.role_type.take() {
                    self.dts.declare_role(role_type);
                }
            }
            "arcroleType" => {
                if let Some(arcrole) = self.arcrole_type.take() {
                    self.dts.declare_arcrole(arcrole);
                }
            }
            _ if LinkKind::from_link_name(local.as_bytes()).is_some() => {
                if let Some(link) = self.link.take() {
                    self.finish_link(link);
                }
            }
            _ => {}
        }
    }

    fn add_concept(&mut self, attrs: &Attrs) {
        let Some(name) = attrs.get("name") else {
            return;
        };
        let id = attrs.get("id");
        let prefix = match (&self.prefix, id) {
            (Some(prefix), _) => prefix.clone(),
            (None, Some(id)) => id
                .strip_suffix(name)
                .and_then(|p| p.strip_suffix('_'))
                .map(CompactString::from)
                .unwrap_or_default(),
            (None, None) => CompactString::default(),
        };

        let mut concept = Concept::new(&prefix, name);
        concept.id = match id {
            Some(id) => CompactString::from(id),
            None => compact_str::format_compact!("{}_{}", prefix, name),
        };
        concept.namespace = self.target_namespace.clone();
        concept.balance = attrs.get("balance").map(CompactString::from);
        concept.period_type = attrs.get("periodType").map(CompactString::from);
        concept.substitution_group = attrs.get("substitutionGroup").map(CompactString::from);
        concept.abstract_element = attrs.get("abstract").is_some_and(|v| v.trim() == "true");
        self.dts.add_concept(concept);
    }

    fn finish_resource(&mut self, resource: ResourceCapture) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let id = self.dts.add_resource(Resource {
            kind: resource.kind,
            role: resource.role,
            lang: resource.lang,
            text: resource.text.trim().to_string(),
        });
        link.resources.entry(resource.label).or_default().push(id);
    }

    fn finish_link(&mut self, link: ExtendedLink) {
        if link.unresolved > 0 {
            tracing::warn!(
                role = %link.role,
                count = link.unresolved,
                "unresolved locators in {:?} link",
                link.kind
            );
        }

        for pending in &link.arcs {
            if pending.kind != link.kind {
                continue;
            }
            let Some(sources) = link.locs.get(&pending.from) else {
                continue;
            };

            let mut targets: Vec<ArcTarget> = link
                .locs
                .get(&pending.to)
                .into_iter()
                .flatten()
                .map(|&concept| ArcTarget::Concept(concept))
                .collect();
            if link.kind.targets_resources() {
                targets.extend(
                    link.resources
                        .get(&pending.to)
                        .into_iter()
                        .flatten()
                        .map(|&resource| ArcTarget::Resource(resource)),
                );
            }

            let attrs = &pending.attrs;
            let kind = match link.kind {
                LinkKind::Presentation => ArcKind::Presentation {
                    preferred_label: LabelType::from_role(attrs.get("preferredLabel")),
                },
                LinkKind::Calculation => ArcKind::Calculation {
                    weight: parse_weight(attrs.get("weight")),
                },
                LinkKind::Definition => ArcKind::Definition {
                    closed: parse_closed(attrs.get("closed")),
                    context_element: ContextElement::parse(attrs.get("contextElement")),
                },
                LinkKind::Label => ArcKind::Label,
                LinkKind::Reference => ArcKind::Reference,
                LinkKind::Footnote => ArcKind::Footnote,
            };
            let arcrole = self.dts.resolve_arcrole(attrs.get("arcrole"));
            let network = self.dts.role_mut(&link.role).network_mut(link.kind);

            for &from in sources {
                for &to in &targets {
                    network.insert(Arc {
                        from,
                        to,
                        order: parse_order(attrs.get("order")),
                        arcrole: arcrole.clone(),
                        priority: parse_priority(attrs.get("priority")),
                        use_attribute: ArcUse::parse(attrs.get("use")),
                        arc_type: CompactString::from(attrs.get("type").unwrap_or("arc")),
                        title: attrs.get("title").map(CompactString::from),
                        kind: kind.clone(),
                    });
                }
            }
        }
    }

    fn resolve_href(&self, href: &str) -> Option<PathBuf> {
        let file = href.split('#').next().unwrap_or_default();
        if file.is_empty() {
            return None;
        }
        if file.contains("://") {
            tracing::debug!(href, "skipping remote reference");
            return None;
        }
        let base = self.base.and_then(Path::parent).unwrap_or_else(|| Path::new(""));
        Some(base.join(file))
    }
}
