//! crabtree - Canonical statement trees from XBRL presentation linkbases
//!
//! Loads a taxonomy, walks each statement role's presentation network and
//! reduces it to a deduplicated tree annotated with balances. The trees are
//! grouped by statement category and persisted as gzip-compressed JSON.
//!
//! Licensed under AGPL-3.0

pub mod builder;
pub mod classify;
pub mod dts;
pub mod hash;
pub mod loader;
pub mod model;
pub mod network;
pub mod taxonomy;
pub mod tree;

pub use builder::TreeBuilder;
pub use classify::{RoleClassifier, StatementCategory};
pub use dts::{Dts, Role, TaxonomySource};
pub use loader::DtsLoader;
pub use model::{Balance, Concept, SubTreeBalance};
pub use network::{Network, TreeConsumer, Visit};
pub use taxonomy::{build_taxonomy, load_taxonomy, BuildConfig, Taxonomy, DEFAULT_STARTING_CONCEPT};
pub use tree::{NodeId, NodeIndex, Occurrence, Tree, TreeNode};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid balance: {0:?}")]
    InvalidBalance(String),

    #[error("No parent for {name} [{label_type}] at path hash {path_hash:#010x}")]
    MissingParent {
        name: String,
        label_type: String,
        path_hash: u32,
    },

    #[error("Duplicate node {name} [{label_type}] at path hash {path_hash:#010x}")]
    DuplicateNode {
        name: String,
        label_type: String,
        path_hash: u32,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}
