//! Tree structure and structural operations

use thiserror::Error;

/// Comment-line prefix that marks a committer annotation in the text format.
pub const COMMITTER_TAG: &str = "@@-";

/// Characters that may not appear in section or option names.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '{', '}', '=', '#', '\n'];

/// Errors produced by tree navigation and mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("not a section: {0}")]
    NotASection(String),

    #[error("not an option: {0}")]
    NotAnOption(String),

    #[error("invalid key name: {0:?}")]
    BadName(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// A named child of a section: either a nested section or a leaf option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgEntry {
    Section(CfgTree),
    Option(String),
}

/// One tree node: entry payload plus its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgNode {
    /// Free-text comment, one or more lines. Committer-tag lines are kept
    /// out of this field and live in `last_committer` instead.
    pub comment: String,
    /// Identity of the most recent committer that touched this node.
    pub last_committer: Option<String>,
    pub entry: CfgEntry,
}

impl CfgNode {
    pub fn section() -> Self {
        Self {
            comment: String::new(),
            last_committer: None,
            entry: CfgEntry::Section(CfgTree::new()),
        }
    }

    pub fn option(value: impl Into<String>) -> Self {
        Self {
            comment: String::new(),
            last_committer: None,
            entry: CfgEntry::Option(value.into()),
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self.entry, CfgEntry::Section(_))
    }

    pub fn as_section(&self) -> Option<&CfgTree> {
        match &self.entry {
            CfgEntry::Section(tree) => Some(tree),
            CfgEntry::Option(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match &self.entry {
            CfgEntry::Option(value) => Some(value),
            CfgEntry::Section(_) => None,
        }
    }
}

/// Order-preserving mapping of names to nodes.
///
/// Child names are unique within a parent and insertion order is
/// significant: rendering, diffing and replication all observe it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgTree {
    children: Vec<(String, CfgNode)>,
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name != name.trim() || name.contains(FORBIDDEN_NAME_CHARS) {
        return Err(TreeError::BadName(name.to_string()));
    }
    Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl CfgTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Ordered iteration over all children.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CfgNode)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&CfgNode> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CfgNode> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    /// Names of children that are sections, in insertion order.
    pub fn sections(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, node)| node.is_section())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of children that are leaf options, in insertion order.
    pub fn options(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, node)| !node.is_section())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Insert a fully-built node; fails if the name is taken.
    pub(crate) fn insert_node(&mut self, name: &str, node: CfgNode) -> Result<(), TreeError> {
        validate_name(name)?;
        if self.index_of(name).is_some() {
            return Err(TreeError::AlreadyExists(name.to_string()));
        }
        self.children.push((name.to_string(), node));
        Ok(())
    }

    /// Create an empty child section; fails if the name is taken.
    pub fn create_section(&mut self, name: &str) -> Result<&mut CfgTree, TreeError> {
        validate_name(name)?;
        if self.index_of(name).is_some() {
            return Err(TreeError::AlreadyExists(name.to_string()));
        }
        self.children.push((name.to_string(), CfgNode::section()));
        self.section_mut_at(self.children.len() - 1)
    }

    /// Return the named child section, creating it if absent.
    pub fn ensure_section(&mut self, name: &str) -> Result<&mut CfgTree, TreeError> {
        validate_name(name)?;
        let idx = match self.index_of(name) {
            Some(idx) => idx,
            None => {
                self.children.push((name.to_string(), CfgNode::section()));
                self.children.len() - 1
            }
        };
        self.section_mut_at(idx)
    }

    fn section_mut_at(&mut self, idx: usize) -> Result<&mut CfgTree, TreeError> {
        let (name, node) = &mut self.children[idx];
        match &mut node.entry {
            CfgEntry::Section(tree) => Ok(tree),
            CfgEntry::Option(_) => Err(TreeError::NotASection(name.clone())),
        }
    }

    /// Set an option value, creating the option if absent. Fails if the
    /// name already belongs to a section.
    pub fn set_option(&mut self, name: &str, value: impl Into<String>) -> Result<(), TreeError> {
        validate_name(name)?;
        match self.get_mut(name) {
            Some(node) => match &mut node.entry {
                CfgEntry::Option(existing) => {
                    *existing = value.into();
                    Ok(())
                }
                CfgEntry::Section(_) => Err(TreeError::NotAnOption(name.to_string())),
            },
            None => {
                self.children.push((name.to_string(), CfgNode::option(value)));
                Ok(())
            }
        }
    }

    /// Delete a child and its subtree.
    pub fn delete(&mut self, name: &str) -> Result<(), TreeError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| TreeError::NotFound(name.to_string()))?;
        self.children.remove(idx);
        Ok(())
    }

    pub fn comment(&self, name: &str) -> Option<&str> {
        self.get(name).map(|node| node.comment.as_str())
    }

    /// Replace a child's comment, reporting whether the text changed.
    ///
    /// Committer-tag lines are stripped from the input so they cannot
    /// masquerade as annotations in the serialized form.
    pub fn set_comment(&mut self, name: &str, text: &str) -> Result<bool, TreeError> {
        let node = self
            .get_mut(name)
            .ok_or_else(|| TreeError::NotFound(name.to_string()))?;
        let cleaned: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with(COMMITTER_TAG))
            .collect();
        let cleaned = cleaned.join("\n");
        if node.comment == cleaned {
            return Ok(false);
        }
        node.comment = cleaned;
        Ok(true)
    }

    /// Record the most recent committer for a child.
    pub fn set_last_committer(&mut self, name: &str, committer: &str) -> Result<(), TreeError> {
        let node = self
            .get_mut(name)
            .ok_or_else(|| TreeError::NotFound(name.to_string()))?;
        node.last_committer = Some(committer.to_string());
        Ok(())
    }

    /// Rename a child in place, keeping its position, subtree and comments.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), TreeError> {
        validate_name(new)?;
        let idx = self
            .index_of(old)
            .ok_or_else(|| TreeError::NotFound(old.to_string()))?;
        if old == new {
            return Ok(());
        }
        if self.index_of(new).is_some() {
            return Err(TreeError::AlreadyExists(new.to_string()));
        }
        self.children[idx].0 = new.to_string();
        Ok(())
    }

    /// Clone a child and its subtree under a new name.
    pub fn copy(&mut self, from: &str, to: &str) -> Result<(), TreeError> {
        validate_name(to)?;
        let node = self
            .get(from)
            .ok_or_else(|| TreeError::NotFound(from.to_string()))?
            .clone();
        if from == to || self.index_of(to).is_some() {
            return Err(TreeError::AlreadyExists(to.to_string()));
        }
        self.children.push((to.to_string(), node));
        Ok(())
    }

    /// Non-destructive structural merge: `other` is authoritative for any
    /// path it defines, paths present only in `self` are preserved, and
    /// conflicting leaves take `other`'s value.
    pub fn merge(&self, other: &CfgTree) -> CfgTree {
        let mut out = CfgTree::new();
        for (name, node) in &self.children {
            match other.get(name) {
                None => out.children.push((name.clone(), node.clone())),
                Some(theirs) => {
                    let merged = match (&node.entry, &theirs.entry) {
                        (CfgEntry::Section(ours), CfgEntry::Section(them)) => CfgNode {
                            comment: theirs.comment.clone(),
                            last_committer: theirs.last_committer.clone(),
                            entry: CfgEntry::Section(ours.merge(them)),
                        },
                        _ => theirs.clone(),
                    };
                    out.children.push((name.clone(), merged));
                }
            }
        }
        for (name, node) in &other.children {
            if self.get(name).is_none() {
                out.children.push((name.clone(), node.clone()));
            }
        }
        out
    }

    /// Follow a slash-separated path of sections; `""` resolves to `self`.
    pub fn subtree(&self, path: &str) -> Option<&CfgTree> {
        let mut cur = self;
        for seg in split_path(path) {
            cur = cur.get(seg)?.as_section()?;
        }
        Some(cur)
    }

    pub fn subtree_mut(&mut self, path: &str) -> Option<&mut CfgTree> {
        let mut cur = self;
        for seg in split_path(path) {
            cur = match &mut cur.get_mut(seg)?.entry {
                CfgEntry::Section(tree) => tree,
                CfgEntry::Option(_) => return None,
            };
        }
        Some(cur)
    }

    /// Resolve a path to its parent section and leaf name.
    pub fn resolve_parent<'t, 'p>(&'t self, path: &'p str) -> Option<(&'t CfgTree, &'p str)> {
        let segs = split_path(path);
        let (leaf, parents) = segs.split_last()?;
        let mut cur = self;
        for seg in parents {
            cur = cur.get(seg)?.as_section()?;
        }
        Some((cur, leaf))
    }

    pub fn resolve_parent_mut<'t, 'p>(
        &'t mut self,
        path: &'p str,
    ) -> Option<(&'t mut CfgTree, &'p str)> {
        let segs = split_path(path);
        let (leaf, parents) = segs.split_last()?;
        let mut cur = self;
        for seg in parents {
            cur = match &mut cur.get_mut(seg)?.entry {
                CfgEntry::Section(tree) => tree,
                CfgEntry::Option(_) => return None,
            };
        }
        Some((cur, leaf))
    }

    /// Node at a full path, if every intermediate segment resolves.
    pub fn node_at(&self, path: &str) -> Option<&CfgNode> {
        let (parent, leaf) = self.resolve_parent(path)?;
        parent.get(leaf)
    }

    /// Create every section along the path, returning the innermost one.
    pub fn make_path(&mut self, path: &str) -> Result<&mut CfgTree, TreeError> {
        let mut cur = self;
        for seg in split_path(path) {
            cur = cur.ensure_section(seg)?;
        }
        Ok(cur)
    }

    /// Leaf value at a full path.
    pub fn option_value(&self, path: &str) -> Option<&str> {
        self.node_at(path)?.as_value()
    }

    /// Set a leaf value at a full path, creating intermediate sections.
    pub fn set_option_at(&mut self, path: &str, value: impl Into<String>) -> Result<(), TreeError> {
        let segs = split_path(path);
        let (leaf, parents) = segs
            .split_last()
            .ok_or_else(|| TreeError::BadName(path.to_string()))?;
        let mut cur = self;
        for seg in parents {
            cur = cur.ensure_section(seg)?;
        }
        cur.set_option(leaf, value)
    }
}
