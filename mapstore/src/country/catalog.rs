//! Catalog file loading.
//!
//! The catalog is a nested JSON document:
//!
//! ```text
//! { "id": "Countries", "v": 250101, "g": [
//!     { "id": "Europe", "g": [ { "id": "Cyprus", "s": 1234, "sha256": "..." } ] },
//!     { "id": "Luna", "s": 1000 }
//! ] }
//! ```
//!
//! A node with a `g` array is a group, anything else is a leaf. Unknown keys
//! (polygon bounds, affiliations, ...) are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::tree::{CountryTree, CountryTreeBuilder, TreeError};
use super::types::DataVersion;

/// Errors that can occur while loading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid catalog structure: {0}")]
    Structure(#[from] TreeError),
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    v: Option<DataVersion>,
    #[serde(default)]
    g: Option<Vec<RawNode>>,
    #[serde(default)]
    s: u64,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parses a catalog document.
pub fn parse_catalog(json: &str) -> Result<CountryTree, CatalogError> {
    let root: RawNode = serde_json::from_str(json)?;
    let mut builder = CountryTreeBuilder::new(root.id.clone(), root.v.unwrap_or_default());
    describe(&mut builder, &root);
    for child in root.g.as_deref().unwrap_or(&[]) {
        add_node(&mut builder, &root.id, child)?;
    }
    Ok(builder.build())
}

/// Reads and parses a catalog file.
pub fn load_catalog(path: &Path) -> Result<CountryTree, CatalogError> {
    let json = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&json)
}

fn add_node(
    builder: &mut CountryTreeBuilder,
    parent: &str,
    raw: &RawNode,
) -> Result<(), CatalogError> {
    match &raw.g {
        Some(children) => {
            builder.add_group(parent, raw.id.clone())?;
            describe(builder, raw);
            for child in children {
                add_node(builder, &raw.id, child)?;
            }
        }
        None => {
            builder.add_leaf(parent, raw.id.clone(), raw.s)?;
            describe(builder, raw);
            if let Some(sha) = &raw.sha256 {
                builder.checksum(&raw.id, sha);
            }
        }
    }
    Ok(())
}

fn describe(builder: &mut CountryTreeBuilder, raw: &RawNode) {
    if raw.name.is_some() || raw.description.is_some() {
        builder.describe(
            &raw.id,
            raw.name.as_deref().unwrap_or_default(),
            raw.description.as_deref().unwrap_or_default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "id": "Countries",
        "v": 250101,
        "g": [
            { "id": "Europe", "g": [
                { "id": "Cyprus", "s": 100, "sha256": "aa", "rect": [1, 2, 3, 4] },
                { "id": "Malta", "s": 40 }
            ] },
            { "id": "Luna", "s": 1000, "name": "Moon", "description": "Dusty" }
        ]
    }"#;

    #[test]
    fn test_parse_catalog() {
        let tree = parse_catalog(CATALOG).unwrap();
        assert_eq!(tree.root_id(), "Countries");
        assert_eq!(tree.version(), 250101);
        assert_eq!(tree.children("Countries"), ["Europe", "Luna"]);
        assert_eq!(tree.get("Cyprus").unwrap().sha256.as_deref(), Some("aa"));
        assert_eq!(tree.get("Luna").unwrap().name, "Moon");
        assert_eq!(tree.get("Malta").unwrap().size, 40);
    }

    #[test]
    fn test_empty_group_is_a_group() {
        let tree = parse_catalog(r#"{"id": "Root", "v": 1, "g": [{"id": "Empty", "g": []}]}"#)
            .unwrap();
        assert!(!tree.is_leaf("Empty"));
        assert!(tree.leaf_ids("Empty").is_empty());
    }

    #[test]
    fn test_duplicate_group_is_rejected() {
        let json = r#"{"id": "Root", "v": 1, "g": [
            {"id": "A", "g": []}, {"id": "A", "g": []}
        ]}"#;
        assert!(matches!(
            parse_catalog(json),
            Err(CatalogError::Structure(TreeError::DuplicateGroup(_)))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_catalog("{"), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_catalog(Path::new("/nonexistent/countries.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }
}
