//! Localized node names.
//!
//! Translations are a flat JSON object. `"<id>"` maps to the display name and
//! `"<id> Description"` to the description. Missing entries fall back to the
//! catalog name, then to the id itself.

use std::collections::HashMap;

use super::tree::CountryNode;

const DESCRIPTION_SUFFIX: &str = " Description";

#[derive(Debug, Clone, Default)]
pub struct CountryNames {
    entries: HashMap<String, String>,
}

impl CountryNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a translation object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn name(&self, node: &CountryNode) -> String {
        if let Some(name) = self.entries.get(&node.id) {
            return name.clone();
        }
        if !node.name.is_empty() {
            return node.name.clone();
        }
        node.id.clone()
    }

    pub fn description(&self, node: &CountryNode) -> String {
        let key = format!("{}{}", node.id, DESCRIPTION_SUFFIX);
        self.entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| node.description.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country::CountryTreeBuilder;

    #[test]
    fn test_name_fallback_chain() {
        let mut b = CountryTreeBuilder::new("Root", 1);
        b.add_leaf("Root", "Luna", 1).unwrap();
        b.add_leaf("Root", "Mars", 1).unwrap();
        b.add_leaf("Root", "Venus", 1).unwrap();
        b.describe("Mars", "Red Planet", "");
        let tree = b.build();

        let names =
            CountryNames::from_json(r#"{"Luna": "Moon", "Luna Description": "Grey"}"#).unwrap();
        assert_eq!(names.name(tree.get("Luna").unwrap()), "Moon");
        assert_eq!(names.description(tree.get("Luna").unwrap()), "Grey");
        assert_eq!(names.name(tree.get("Mars").unwrap()), "Red Planet");
        assert_eq!(names.name(tree.get("Venus").unwrap()), "Venus");
        assert_eq!(names.description(tree.get("Venus").unwrap()), "");
    }
}
