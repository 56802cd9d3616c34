//! File tree nodes and path helpers.
//!
//! The workspace is a forest of [`FileNode`]s. Paths are slash-delimited
//! joins of ancestor names and are unique within the forest.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// A file or directory in the replicated tree.
///
/// Wire and cache format: `{id, name, type, path, content?, children?, size, lastModified?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub path: String,
    /// File content; always `None` for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Children in display order; always empty for files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

/// A node whose shape breaks the file/directory rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("directory {0:?} carries content")]
    DirectoryWithContent(String),
    #[error("file {0:?} carries children")]
    FileWithChildren(String),
}

impl FileNode {
    /// A file node with a fresh random id.
    pub fn file(path: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: new_node_id(),
            name: final_segment(path).to_string(),
            kind: NodeKind::File,
            path: path.to_string(),
            size: content.len() as u64,
            content: Some(content),
            children: Vec::new(),
            last_modified: None,
        }
    }

    /// An empty directory node with a fresh random id.
    pub fn directory(path: &str) -> Self {
        Self {
            id: new_node_id(),
            name: final_segment(path).to_string(),
            kind: NodeKind::Directory,
            path: path.to_string(),
            content: None,
            children: Vec::new(),
            size: 0,
            last_modified: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Content if present and non-empty.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Check path syntax and the file/directory shape rules, recursively.
    pub fn validate(&self) -> Result<(), NodeError> {
        if split_path(&self.path).is_none() {
            return Err(NodeError::InvalidPath(self.path.clone()));
        }
        match self.kind {
            NodeKind::Directory if self.content.is_some() => {
                Err(NodeError::DirectoryWithContent(self.path.clone()))
            }
            NodeKind::File if !self.children.is_empty() => {
                Err(NodeError::FileWithChildren(self.path.clone()))
            }
            _ => self.children.iter().try_for_each(FileNode::validate),
        }
    }

    /// Place this node at `path`: the name becomes the final segment,
    /// descendant paths are recomputed from their names, and shape rules are
    /// enforced by dropping whatever does not belong.
    pub(crate) fn rebase(&mut self, path: &str) {
        self.name = final_segment(path).to_string();
        self.path = path.to_string();
        match self.kind {
            NodeKind::File => self.children.clear(),
            NodeKind::Directory => {
                self.content = None;
                // Children with unusable or colliding names are dropped
                let mut seen = HashSet::new();
                self.children
                    .retain(|c| is_valid_name(&c.name) && seen.insert(c.name.clone()));
                for child in &mut self.children {
                    let child_path = join_path(path, &child.name);
                    child.rebase(&child_path);
                }
                sort_siblings(&mut self.children);
            }
        }
    }

    /// Depth-first iterator over this node and its descendants.
    pub fn walk(&self) -> impl Iterator<Item = &FileNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

pub(crate) fn new_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Split a path into segments. `None` for empty, `.` or `..` segments.
pub fn split_path(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    let valid = segments
        .iter()
        .all(|s| !s.is_empty() && *s != "." && *s != "..");
    valid.then_some(segments)
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent path, or `""` for a top-level node.
pub fn parent_path(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[..pos]).unwrap_or("")
}

pub fn final_segment(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[pos + 1..]).unwrap_or(path)
}

/// True if `path` is `ancestor` itself or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

/// Is `name` usable as a single path segment?
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// Directories first, then byte-wise (case-sensitive) by name.
pub fn sibling_order(a: &FileNode, b: &FileNode) -> Ordering {
    match (a.kind, b.kind) {
        (NodeKind::Directory, NodeKind::File) => Ordering::Less,
        (NodeKind::File, NodeKind::Directory) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    }
}

pub fn sort_siblings(siblings: &mut [FileNode]) {
    siblings.sort_by(sibling_order);
}
