//! Country catalog: node types, the immutable tree and its loaders.

mod catalog;
mod names;
mod tree;
mod types;

pub use catalog::{load_catalog, parse_catalog, CatalogError};
pub use names::CountryNames;
pub use tree::{CountryNode, CountryTree, CountryTreeBuilder, TreeError};
pub use types::{CountryId, CountryIdAndName, DataVersion, NodeErrorCode, NodeStatus, Progress};
