//! Categorized statement trees and their persisted, gzip-compressed form.

use crate::builder::TreeBuilder;
use crate::classify::{RoleClassifier, StatementCategory};
use crate::dts::{Role, TaxonomySource};
use crate::loader::read_file;
use crate::tree::{NodeIndex, Tree, TreeNode};
use crate::Result;
use ahash::AHashSet;
use compact_str::CompactString;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const DEFAULT_STARTING_CONCEPT: &str = "us-gaap:StatementLineItems";

/// Tree building configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub starting_concept: Option<CompactString>,
    pub allowed_duplicates: AHashSet<CompactString>,
    pub classifier: RoleClassifier,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            starting_concept: Some(CompactString::from(DEFAULT_STARTING_CONCEPT)),
            allowed_duplicates: AHashSet::new(),
            classifier: RoleClassifier::us_gaap(),
        }
    }
}

impl BuildConfig {
    pub fn with_starting_concept(mut self, concept: Option<&str>) -> Self {
        self.starting_concept = concept.map(CompactString::from);
        self
    }

    pub fn allow_duplicate(mut self, concept: &str) -> Self {
        self.allowed_duplicates.insert(CompactString::from(concept));
        self
    }

    pub fn with_classifier(mut self, classifier: RoleClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxonomy {
    income: Vec<Tree>,
    financial_position: Vec<Tree>,
    cash_flow: Vec<Tree>,
    other: Vec<Tree>,
}

impl Taxonomy {
    pub fn income(&self) -> &[Tree] {
        &self.income
    }

    pub fn financial_position(&self) -> &[Tree] {
        &self.financial_position
    }

    pub fn cash_flow(&self) -> &[Tree] {
        &self.cash_flow
    }

    pub fn other(&self) -> &[Tree] {
        &self.other
    }

    pub fn trees(&self, category: StatementCategory) -> &[Tree] {
        match category {
            StatementCategory::Income => &self.income,
            StatementCategory::FinancialPosition => &self.financial_position,
            StatementCategory::CashFlow => &self.cash_flow,
            StatementCategory::Other => &self.other,
        }
    }

    pub fn push(&mut self, category: StatementCategory, tree: Tree) {
        match category {
            StatementCategory::Income => self.income.push(tree),
            StatementCategory::FinancialPosition => self.financial_position.push(tree),
            StatementCategory::CashFlow => self.cash_flow.push(tree),
            StatementCategory::Other => self.other.push(tree),
        }
    }

    /// Every tree with its category, in category order.
    pub fn iter(&self) -> impl Iterator<Item = (StatementCategory, &Tree)> {
        StatementCategory::ALL
            .into_iter()
            .flat_map(move |category| self.trees(category).iter().map(move |tree| (category, tree)))
    }

    pub fn len(&self) -> usize {
        StatementCategory::ALL
            .into_iter()
            .map(|category| self.trees(category).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occurrences of every concept across all trees of one category.
    pub fn node_index<P>(&self, category: StatementCategory, traverse: P) -> NodeIndex<'_>
    where
        P: Fn(&TreeNode) -> bool,
    {
        let mut index = NodeIndex::default();
        for tree in self.trees(category) {
            tree.index_into(&mut index, &traverse);
        }
        index
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Builds one tree per eligible, classified role. A role whose build
    /// fails is logged and left out; the remaining roles still build.
    pub fn build<S>(source: &S, config: &BuildConfig) -> Self
    where
        S: TaxonomySource + ?Sized,
    {
        let mut taxonomy = Taxonomy::default();
        for role in source.roles() {
            let Some(category) = config.classifier.classify(role) else {
                continue;
            };
            match build_role(source, role, config) {
                Ok(Some(tree)) => taxonomy.push(category, tree),
                Ok(None) => {
                    tracing::debug!(role = %role.uri, "no statement root found, discarding");
                }
                Err(err) => {
                    tracing::error!(role = %role.uri, error = %err, "statement tree build aborted");
                }
            }
        }

        tracing::info!(
            income = taxonomy.income.len(),
            financial_position = taxonomy.financial_position.len(),
            cash_flow = taxonomy.cash_flow.len(),
            other = taxonomy.other.len(),
            "built taxonomy"
        );
        taxonomy
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        Ok(encoder.finish()?)
    }

    /// `None` on any decompression or format error. Nesting depth is not
    /// limited, every tree level adds two levels of JSON.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut de = serde_json::Deserializer::from_reader(GzDecoder::new(bytes));
        de.disable_recursion_limit();
        let parsed = Taxonomy::deserialize(&mut de).and_then(|taxonomy| de.end().map(|()| taxonomy));
        match parsed {
            Ok(taxonomy) => Some(taxonomy),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable taxonomy");
                None
            }
        }
    }

    /// Writes a uniquely named file next to `path` first and renames it into
    /// place, so a failed write never leaves a partial file behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        match read_file(path) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read taxonomy");
                None
            }
        }
    }
}

fn build_role<S>(source: &S, role: &Role, config: &BuildConfig) -> Result<Option<Tree>>
where
    S: TaxonomySource + ?Sized,
{
    // Roles that never reference the line-items anchor fall back to the walk root.
    let starting_concept = config.starting_concept.as_deref().filter(|name| {
        match (source.find_concept(name), role.presentation()) {
            (Some(id), Some(network)) => network.references(id),
            _ => false,
        }
    });
    let title = if role.definition.is_empty() {
        role.uri.as_str()
    } else {
        role.definition.as_str()
    };

    let mut builder = TreeBuilder::new(title, starting_concept, &config.allowed_duplicates);
    source.walk(role, &mut builder)?;
    Ok(builder.finish())
}

/// Builds every statement tree of `source` and returns the persisted bytes.
pub fn build_taxonomy<S>(source: &S, config: &BuildConfig) -> Result<Vec<u8>>
where
    S: TaxonomySource + ?Sized,
{
    Taxonomy::build(source, config).to_bytes()
}

pub fn load_taxonomy(bytes: &[u8]) -> Option<Taxonomy> {
    Taxonomy::from_bytes(bytes)
}
