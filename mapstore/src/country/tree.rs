//! The static country catalog.
//!
//! The tree is built once (usually from the catalog JSON) and never mutated
//! afterwards. Leaves are downloadable regions; groups only aggregate. A leaf
//! may sit under several groups (disputed territories), so the structure is a
//! DAG rather than a strict tree, but every group appears exactly once.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::types::{CountryId, DataVersion};

/// Errors raised while assembling a [`CountryTree`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("parent node '{0}' does not exist")]
    UnknownParent(CountryId),

    #[error("node '{0}' is a leaf and cannot have children")]
    ParentIsLeaf(CountryId),

    #[error("group '{0}' is declared more than once")]
    DuplicateGroup(CountryId),

    #[error("'{0}' is declared both as a leaf and as a group")]
    LeafGroupConflict(CountryId),
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryNode {
    pub id: CountryId,
    /// Direct parents. Empty only for the root.
    pub parents: Vec<CountryId>,
    /// Ordered direct children. Always empty for leaves.
    pub children: Vec<CountryId>,
    pub is_group: bool,
    /// Catalog display name (fallback when no localization exists).
    pub name: String,
    pub description: String,
    /// Nominal byte size of the leaf's map file. Zero for groups.
    pub size: u64,
    /// Expected SHA-256 of the map file, when the catalog provides one.
    pub sha256: Option<String>,
}

impl CountryNode {
    fn group(id: CountryId, parent: Option<CountryId>) -> Self {
        Self {
            id,
            parents: parent.into_iter().collect(),
            children: Vec::new(),
            is_group: true,
            name: String::new(),
            description: String::new(),
            size: 0,
            sha256: None,
        }
    }

    fn leaf(id: CountryId, parent: CountryId, size: u64) -> Self {
        Self {
            id,
            parents: vec![parent],
            children: Vec::new(),
            is_group: false,
            name: String::new(),
            description: String::new(),
            size,
            sha256: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_group
    }
}

/// Immutable catalog of all known nodes.
#[derive(Debug, Clone)]
pub struct CountryTree {
    root: CountryId,
    version: DataVersion,
    nodes: HashMap<CountryId, CountryNode>,
}

impl CountryTree {
    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// The catalog's current data version.
    pub fn version(&self) -> DataVersion {
        self.version
    }

    pub fn get(&self, id: &str) -> Option<&CountryNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.nodes.get(id).map(CountryNode::is_leaf).unwrap_or(false)
    }

    /// Direct children of `id` in catalog order.
    pub fn children(&self, id: &str) -> &[CountryId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Direct parents of `id`.
    pub fn parents(&self, id: &str) -> &[CountryId] {
        self.nodes
            .get(id)
            .map(|n| n.parents.as_slice())
            .unwrap_or(&[])
    }

    /// All leaves in the subtree of `id`, each visited once, in depth-first
    /// catalog order. A leaf's subtree is the leaf itself.
    pub fn leaves(&self, id: &str) -> Vec<&CountryNode> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_leaves(id, &mut visited, &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        id: &str,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<&'a CountryNode>,
    ) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !visited.insert(node.id.as_str()) {
            return;
        }
        if node.is_leaf() {
            out.push(node);
            return;
        }
        for child in &node.children {
            self.collect_leaves(child, visited, out);
        }
    }

    /// Ids of the leaves in the subtree of `id`.
    pub fn leaf_ids(&self, id: &str) -> Vec<CountryId> {
        self.leaves(id).into_iter().map(|n| n.id.clone()).collect()
    }

    /// Nominal size of every leaf in the subtree.
    pub fn subtree_size(&self, id: &str) -> u64 {
        self.leaves(id).iter().map(|n| n.size).sum()
    }

    /// Nodes directly below the root whose subtree contains `id`.
    ///
    /// Returns an empty list for the root itself. Multi-parent leaves may
    /// have several topmost parents.
    pub fn topmost_parents(&self, id: &str) -> Vec<CountryId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for parent in self.parents(current) {
                if parent == &self.root {
                    if current != id && seen.insert(current.to_string()) {
                        out.push(current.to_string());
                    }
                } else {
                    stack.push(parent);
                }
            }
        }
        out
    }

    /// Iterator over every node in the catalog (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &CountryNode> {
        self.nodes.values()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incremental builder that rejects structures violating the catalog rules.
///
/// Groups can only be attached to an existing group, and each group id can be
/// declared once, so the resulting graph is acyclic by construction.
#[derive(Debug)]
pub struct CountryTreeBuilder {
    root: CountryId,
    version: DataVersion,
    nodes: HashMap<CountryId, CountryNode>,
}

impl CountryTreeBuilder {
    pub fn new(root: impl Into<CountryId>, version: DataVersion) -> Self {
        let root = root.into();
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), CountryNode::group(root.clone(), None));
        Self {
            root,
            version,
            nodes,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// Declares a group under `parent`.
    pub fn add_group(
        &mut self,
        parent: &str,
        id: impl Into<CountryId>,
    ) -> Result<&mut Self, TreeError> {
        let id = id.into();
        self.check_parent(parent)?;
        match self.nodes.get(&id) {
            Some(existing) if existing.is_group => return Err(TreeError::DuplicateGroup(id)),
            Some(_) => return Err(TreeError::LeafGroupConflict(id)),
            None => {}
        }
        self.attach(parent, &id);
        self.nodes
            .insert(id.clone(), CountryNode::group(id, Some(parent.to_string())));
        Ok(self)
    }

    /// Declares a leaf under `parent`.
    ///
    /// Declaring an existing leaf under another group adds a parent link; the
    /// size of the first declaration wins.
    pub fn add_leaf(
        &mut self,
        parent: &str,
        id: impl Into<CountryId>,
        size: u64,
    ) -> Result<&mut Self, TreeError> {
        let id = id.into();
        self.check_parent(parent)?;
        match self.nodes.get_mut(&id) {
            Some(existing) if existing.is_group => return Err(TreeError::LeafGroupConflict(id)),
            Some(existing) => {
                if existing.parents.iter().any(|p| p == parent) {
                    return Ok(self);
                }
                existing.parents.push(parent.to_string());
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    CountryNode::leaf(id.clone(), parent.to_string(), size),
                );
            }
        }
        self.attach(parent, &id);
        Ok(self)
    }

    /// Sets the catalog name and description of an existing node.
    pub fn describe(&mut self, id: &str, name: &str, description: &str) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(id) {
            node.name = name.to_string();
            node.description = description.to_string();
        }
        self
    }

    /// Sets the expected checksum of an existing leaf.
    pub fn checksum(&mut self, id: &str, sha256: &str) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.is_leaf() {
                node.sha256 = Some(sha256.to_string());
            }
        }
        self
    }

    pub fn build(self) -> CountryTree {
        CountryTree {
            root: self.root,
            version: self.version,
            nodes: self.nodes,
        }
    }

    fn check_parent(&self, parent: &str) -> Result<(), TreeError> {
        match self.nodes.get(parent) {
            None => Err(TreeError::UnknownParent(parent.to_string())),
            Some(node) if !node.is_group => Err(TreeError::ParentIsLeaf(parent.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn attach(&mut self, parent: &str, child: &str) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child.to_string());
        }
    }
}
