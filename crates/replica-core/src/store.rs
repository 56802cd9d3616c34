//! ReplicaStore: the local copy of the shared file tree and open buffers.
//!
//! Every operation is total: input that does not fit the current tree
//! (unknown path, name collision, malformed path) is a no-op reported by a
//! `false` return, never an error. Local edits and replayed remote envelopes
//! go through the same operations.

use crate::clock::Timestamp;
use crate::node::{
    FileNode, is_valid_name, is_within, join_path, parent_path, sort_siblings, split_path,
};
use crate::templates::scaffold_for;
use serde::Serialize;
use tracing::debug;

/// A file open in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBuffer {
    pub path: String,
    pub content: String,
    /// Node content when the buffer was opened or last saved.
    pub saved_content: Option<String>,
    pub dirty: bool,
    pub last_saved_at: Option<Timestamp>,
}

impl OpenBuffer {
    fn refresh_dirty(&mut self) {
        self.dirty = self.saved_content.as_deref() != Some(self.content.as_str());
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplicaStore {
    tree: Vec<FileNode>,
    buffers: Vec<OpenBuffer>,
    active: Option<usize>,
    /// Bumped on every tree change; drives cache writes.
    revision: u64,
}

/// Walk from `siblings` down through the named directories.
fn children_of_mut<'a>(
    mut siblings: &'a mut Vec<FileNode>,
    dirs: &[&str],
) -> Option<&'a mut Vec<FileNode>> {
    for name in dirs {
        let node = siblings.iter_mut().find(|n| n.is_dir() && n.name == *name)?;
        siblings = &mut node.children;
    }
    Some(siblings)
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &[FileNode] {
        &self.tree
    }

    pub fn buffers(&self) -> &[OpenBuffer] {
        &self.buffers
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_buffer(&self) -> Option<&OpenBuffer> {
        self.active.and_then(|i| self.buffers.get(i))
    }

    pub fn buffer_index(&self, path: &str) -> Option<usize> {
        self.buffers.iter().position(|b| b.path == path)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn find(&self, path: &str) -> Option<&FileNode> {
        let segments = split_path(path)?;
        let mut siblings = &self.tree;
        let mut found = None;
        for name in segments {
            let node = siblings.iter().find(|n| n.name == name)?;
            siblings = &node.children;
            found = Some(node);
        }
        found
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        let segments = split_path(path)?;
        let (name, dirs) = segments.split_last()?;
        children_of_mut(&mut self.tree, dirs)?
            .iter_mut()
            .find(|n| n.name == *name)
    }

    fn touch_tree(&mut self) {
        self.revision += 1;
    }

    /// Place `node` at `node.path`, creating missing parent directories.
    ///
    /// No-op if something already occupies that name, or a file sits where
    /// a parent directory is needed.
    pub fn insert(&mut self, node: FileNode) -> bool {
        let path = node.path.clone();
        let Some(segments) = split_path(&path) else {
            debug!("insert: invalid path {:?}", path);
            return false;
        };
        let Some((leaf, dirs)) = segments.split_last() else {
            return false;
        };

        let mut siblings = &mut self.tree;
        let mut prefix = String::new();
        for name in dirs {
            prefix = join_path(&prefix, name);
            let idx = match siblings.iter().position(|n| n.name == *name) {
                Some(i) if siblings[i].is_dir() => i,
                Some(_) => {
                    debug!("insert: {:?} blocked by file {:?}", path, prefix);
                    return false;
                }
                None => {
                    siblings.push(FileNode::directory(&prefix));
                    sort_siblings(siblings);
                    match siblings.iter().position(|n| n.name == *name) {
                        Some(i) => i,
                        None => return false,
                    }
                }
            };
            siblings = &mut siblings[idx].children;
        }

        if siblings.iter().any(|n| n.name == *leaf) {
            return false;
        }

        let mut node = node;
        node.rebase(&path);
        siblings.push(node);
        sort_siblings(siblings);
        self.touch_tree();
        true
    }

    /// Delete the node at `path` together with its descendants.
    pub fn remove(&mut self, path: &str) -> bool {
        let Some(segments) = split_path(path) else {
            return false;
        };
        let Some((name, dirs)) = segments.split_last() else {
            return false;
        };
        let Some(siblings) = children_of_mut(&mut self.tree, dirs) else {
            return false;
        };
        let Some(idx) = siblings.iter().position(|n| n.name == *name) else {
            return false;
        };
        siblings.remove(idx);
        self.touch_tree();
        true
    }

    /// Local delete: close buffers at or under `path`, then [`remove`](Self::remove) it.
    pub fn delete(&mut self, path: &str) -> bool {
        if self.find(path).is_none() {
            return false;
        }
        while let Some(idx) = self.buffers.iter().rposition(|b| is_within(&b.path, path)) {
            self.close_buffer(idx);
        }
        self.remove(path)
    }

    /// Give the node at `old_path` a new final segment, keeping its id.
    pub fn rename(&mut self, old_path: &str, new_name: &str) -> bool {
        if !is_valid_name(new_name) {
            return false;
        }
        let Some(segments) = split_path(old_path) else {
            return false;
        };
        let Some((name, dirs)) = segments.split_last() else {
            return false;
        };
        if *name == new_name {
            return false;
        }
        let Some(siblings) = children_of_mut(&mut self.tree, dirs) else {
            return false;
        };
        let Some(idx) = siblings.iter().position(|n| n.name == *name) else {
            return false;
        };
        if siblings.iter().any(|n| n.name == new_name) {
            debug!("rename: {:?} -> {:?} collides with a sibling", old_path, new_name);
            return false;
        }

        let new_path = join_path(parent_path(old_path), new_name);
        siblings[idx].rebase(&new_path);
        sort_siblings(siblings);

        for buffer in &mut self.buffers {
            if is_within(&buffer.path, old_path) {
                buffer.path = format!("{}{}", new_path, &buffer.path[old_path.len()..]);
            }
        }
        self.touch_tree();
        true
    }

    /// Set the content of the file at `path` and sync its open buffer.
    pub fn update_content(&mut self, path: &str, content: &str) -> bool {
        self.update_content_at(path, content, None)
    }

    /// Like [`update_content`](Self::update_content), for a change stamped
    /// `remote_at`. Changes not newer than the node's `last_modified` are
    /// skipped, and the open buffer only follows changes newer than its last
    /// save.
    pub fn update_content_at(
        &mut self,
        path: &str,
        content: &str,
        remote_at: Option<Timestamp>,
    ) -> bool {
        let Some(node) = self.find_mut(path).filter(|n| n.is_file()) else {
            return false;
        };
        if let (Some(at), Some(modified)) = (remote_at, node.last_modified) {
            if at <= modified {
                return false;
            }
        }

        let tree_changed = node.content.as_deref() != Some(content);
        if tree_changed {
            node.content = Some(content.to_string());
            node.size = content.len() as u64;
            if remote_at.is_some() {
                node.last_modified = remote_at;
            }
        }

        let mut buffer_changed = false;
        if let Some(buffer) = self.buffers.iter_mut().find(|b| b.path == path) {
            let newer = match (remote_at, buffer.last_saved_at) {
                (Some(at), Some(saved)) => at > saved,
                _ => true,
            };
            if newer && buffer.content != content {
                buffer.content = content.to_string();
                buffer.refresh_dirty();
                buffer_changed = true;
            }
        }

        if tree_changed {
            self.touch_tree();
        }
        tree_changed || buffer_changed
    }

    /// Open (or re-activate) a buffer for the file at `path`.
    ///
    /// Files without content yet start from the scaffold for their extension.
    pub fn open_buffer(&mut self, path: &str) -> Option<usize> {
        if let Some(idx) = self.buffer_index(path) {
            self.active = Some(idx);
            return Some(idx);
        }

        let node = self.find(path).filter(|n| n.is_file())?;
        let content = node
            .text()
            .map(str::to_string)
            .unwrap_or_else(|| scaffold_for(&node.name));
        let buffer = OpenBuffer {
            path: path.to_string(),
            content,
            saved_content: node.content.clone(),
            dirty: false,
            last_saved_at: None,
        };
        self.buffers.push(buffer);
        let idx = self.buffers.len() - 1;
        self.active = Some(idx);
        Some(idx)
    }

    pub fn close_buffer(&mut self, index: usize) -> Option<OpenBuffer> {
        if index >= self.buffers.len() {
            return None;
        }
        let closed = self.buffers.remove(index);
        self.active = match self.active {
            Some(active) if active == index => {
                if self.buffers.is_empty() {
                    None
                } else {
                    Some(index.min(self.buffers.len() - 1))
                }
            }
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        Some(closed)
    }

    pub fn set_active_buffer(&mut self, index: usize) -> bool {
        if index < self.buffers.len() {
            self.active = Some(index);
            true
        } else {
            false
        }
    }

    /// Write the buffer back into its tree node and mark it clean.
    pub fn save_buffer(&mut self, index: usize, now: Timestamp) -> bool {
        let Some(buffer) = self.buffers.get_mut(index) else {
            return false;
        };
        buffer.dirty = false;
        buffer.last_saved_at = Some(now);
        buffer.saved_content = Some(buffer.content.clone());
        let (path, content) = (buffer.path.clone(), buffer.content.clone());

        if let Some(node) = self.find_mut(&path).filter(|n| n.is_file()) {
            node.size = content.len() as u64;
            node.last_modified = Some(now);
            node.content = Some(content);
            self.touch_tree();
        }
        true
    }

    /// Drop the whole tree and every buffer.
    pub fn reset_all(&mut self) {
        self.tree.clear();
        self.buffers.clear();
        self.active = None;
        self.touch_tree();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, sibling_order};
    use proptest::prelude::*;

    fn names(nodes: &[FileNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn store_with(paths: &[&str]) -> ReplicaStore {
        let mut store = ReplicaStore::new();
        for path in paths {
            assert!(store.insert(FileNode::file(path, format!("// {}", path))));
        }
        store
    }

    // ==================== insert ====================

    #[test]
    fn test_insert_creates_intermediate_directories() {
        let mut store = ReplicaStore::new();
        assert!(store.insert(FileNode::file("src/a.txt", "x")));

        assert_eq!(store.tree().len(), 1);
        let src = &store.tree()[0];
        assert_eq!(src.kind, NodeKind::Directory);
        assert_eq!(src.path, "src");
        assert_eq!(names(&src.children), vec!["a.txt"]);
        assert_eq!(src.children[0].path, "src/a.txt");
        assert_eq!(store.find("src/a.txt").unwrap().content.as_deref(), Some("x"));
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut store = ReplicaStore::new();
        let node = FileNode::file("src/lib/a.rs", "fn a() {}");
        assert!(store.insert(node.clone()));
        let once = store.tree().to_vec();
        let revision = store.revision();

        assert!(!store.insert(node));
        assert_eq!(store.tree(), once.as_slice());
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_insert_does_not_replace_existing_name() {
        let mut store = store_with(&["a.txt"]);
        assert!(!store.insert(FileNode::file("a.txt", "other")));
        assert_eq!(store.find("a.txt").unwrap().content.as_deref(), Some("// a.txt"));
        assert!(!store.insert(FileNode::directory("a.txt")));
    }

    #[test]
    fn test_insert_blocked_by_file_in_the_way() {
        let mut store = store_with(&["notes"]);
        assert!(!store.insert(FileNode::file("notes/today.md", "")));
        assert_eq!(store.tree().len(), 1);
        assert!(store.find("notes").unwrap().is_file());
    }

    #[test]
    fn test_insert_rejects_invalid_paths() {
        let mut store = ReplicaStore::new();
        assert!(!store.insert(FileNode::file("", "")));
        assert!(!store.insert(FileNode::file("a//b", "")));
        assert!(!store.insert(FileNode::file("../escape", "")));
        assert!(store.tree().is_empty());
    }

    #[test]
    fn test_insert_subtree_normalises_paths() {
        let mut dir = FileNode::directory("pkg");
        let mut stale = FileNode::file("somewhere/else.rs", "x");
        stale.name = "main.rs".into();
        dir.children.push(stale);

        let mut store = ReplicaStore::new();
        assert!(store.insert(dir));
        let main = store.find("pkg/main.rs").unwrap();
        assert_eq!(main.path, "pkg/main.rs");
    }

    #[test]
    fn test_insert_drops_content_from_directories() {
        let mut dir = FileNode::directory("d");
        dir.content = Some("nope".into());
        let mut store = ReplicaStore::new();
        assert!(store.insert(dir));
        assert_eq!(store.find("d").unwrap().content, None);
    }

    #[test]
    fn test_insert_sorts_directories_before_files() {
        let store = store_with(&["src/z.rs", "src/b/inner.rs", "src/A.rs", "src/a/x.rs"]);
        let src = store.find("src").unwrap();
        assert_eq!(names(&src.children), vec!["a", "b", "A.rs", "z.rs"]);
    }

    // ==================== remove / delete ====================

    #[test]
    fn test_remove_directory_removes_descendants() {
        let mut store = store_with(&["src/a.txt", "src/b/c.txt", "top.txt"]);
        assert!(store.remove("src"));
        assert_eq!(names(store.tree()), vec!["top.txt"]);
        assert!(store.find("src/b/c.txt").is_none());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut store = store_with(&["a.txt"]);
        let revision = store.revision();
        assert!(!store.remove("b.txt"));
        assert!(!store.remove("a.txt/child"));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_remove_keeps_open_buffers() {
        let mut store = store_with(&["a.txt"]);
        store.open_buffer("a.txt");
        assert!(store.remove("a.txt"));
        assert_eq!(store.buffers().len(), 1);
    }

    #[test]
    fn test_delete_closes_buffers_under_path() {
        let mut store = store_with(&["src/a.rs", "src/b.rs", "main.rs"]);
        store.open_buffer("src/a.rs");
        store.open_buffer("main.rs");
        store.open_buffer("src/b.rs");
        store.set_active_buffer(1);

        assert!(store.delete("src"));
        assert_eq!(store.buffers().len(), 1);
        assert_eq!(store.buffers()[0].path, "main.rs");
        assert_eq!(store.active_index(), Some(0));
        assert!(store.find("src").is_none());
    }

    // ==================== rename ====================

    #[test]
    fn test_rename_keeps_id_and_resorts() {
        let mut store = store_with(&["b.txt", "c.txt"]);
        let id = store.find("c.txt").unwrap().id.clone();

        assert!(store.rename("c.txt", "a.txt"));
        assert_eq!(names(store.tree()), vec!["a.txt", "b.txt"]);
        let renamed = store.find("a.txt").unwrap();
        assert_eq!(renamed.id, id);
        assert_eq!(renamed.path, "a.txt");
    }

    #[test]
    fn test_rename_directory_moves_descendants_and_buffers() {
        let mut store = store_with(&["old/x/y.rs", "old/z.rs"]);
        store.open_buffer("old/x/y.rs");

        assert!(store.rename("old", "new"));
        assert!(store.find("new/x/y.rs").is_some());
        assert!(store.find("new/z.rs").is_some());
        assert!(store.find("old").is_none());
        assert_eq!(store.buffers()[0].path, "new/x/y.rs");
    }

    #[test]
    fn test_rename_noops() {
        let mut store = store_with(&["a.txt", "b.txt"]);
        assert!(!store.rename("missing.txt", "c.txt"));
        assert!(!store.rename("a.txt", "b.txt"));
        assert!(!store.rename("a.txt", "a.txt"));
        assert!(!store.rename("a.txt", ""));
        assert!(!store.rename("a.txt", "dir/c.txt"));
        assert!(!store.rename("a.txt", ".."));
        assert_eq!(names(store.tree()), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_rename_round_trip_restores_path_and_id() {
        let mut store = store_with(&["src/main.rs"]);
        let before = store.tree().to_vec();

        assert!(store.rename("src/main.rs", "lib.rs"));
        assert!(store.rename("src/lib.rs", "main.rs"));
        assert_eq!(store.tree(), before.as_slice());
    }

    // ==================== content & buffers ====================

    #[test]
    fn test_update_content_marks_buffer_dirty_against_saved() {
        let mut store = store_with(&["a.txt"]);
        store.open_buffer("a.txt");

        assert!(store.update_content("a.txt", "edited"));
        let buffer = &store.buffers()[0];
        assert_eq!(buffer.content, "edited");
        assert!(buffer.dirty);
        assert_eq!(store.find("a.txt").unwrap().size, 6);

        assert!(store.update_content("a.txt", "// a.txt"));
        assert!(!store.buffers()[0].dirty);
    }

    #[test]
    fn test_update_content_ignores_directories_and_missing() {
        let mut store = store_with(&["src/a.txt"]);
        assert!(!store.update_content("src", "x"));
        assert!(!store.update_content("nope.txt", "x"));
        assert!(!store.update_content("src/a.txt", "// src/a.txt"));
    }

    #[test]
    fn test_remote_content_not_newer_than_save_is_skipped() {
        let mut store = store_with(&["a.txt"]);
        let idx = store.open_buffer("a.txt").unwrap();
        store.save_buffer(idx, 1_000);

        assert!(!store.update_content_at("a.txt", "stale", Some(900)));
        assert!(!store.update_content_at("a.txt", "same ms", Some(1_000)));
        assert_eq!(store.find("a.txt").unwrap().content.as_deref(), Some("// a.txt"));
        assert_eq!(store.buffers()[0].content, "// a.txt");

        assert!(store.update_content_at("a.txt", "fresh", Some(1_100)));
        assert_eq!(store.buffers()[0].content, "fresh");
        assert_eq!(store.find("a.txt").unwrap().last_modified, Some(1_100));
        assert!(store.buffers()[0].dirty);
    }

    #[test]
    fn test_remote_content_newest_stamp_wins() {
        let mut store = store_with(&["f.ts"]);
        assert!(store.update_content_at("f.ts", "at 100", Some(100)));
        assert!(!store.update_content_at("f.ts", "at 50", Some(50)));
        assert_eq!(store.find("f.ts").unwrap().content.as_deref(), Some("at 100"));
    }

    #[test]
    fn test_open_buffer_uses_scaffold_for_empty_file() {
        let mut store = ReplicaStore::new();
        store.insert(FileNode::file("hello.rs", ""));
        let idx = store.open_buffer("hello.rs").unwrap();
        let buffer = &store.buffers()[idx];
        assert!(buffer.content.contains("fn main()"));
        assert!(!buffer.dirty);
    }

    #[test]
    fn test_open_buffer_reactivates_existing() {
        let mut store = store_with(&["a.txt", "b.txt"]);
        assert_eq!(store.open_buffer("a.txt"), Some(0));
        assert_eq!(store.open_buffer("b.txt"), Some(1));
        assert_eq!(store.open_buffer("a.txt"), Some(0));
        assert_eq!(store.buffers().len(), 2);
        assert_eq!(store.active_index(), Some(0));
    }

    #[test]
    fn test_open_buffer_rejects_directories() {
        let mut store = store_with(&["src/a.txt"]);
        assert_eq!(store.open_buffer("src"), None);
        assert_eq!(store.open_buffer("missing"), None);
        assert_eq!(store.active_index(), None);
    }

    #[test]
    fn test_close_buffer_active_index_rules() {
        let mut store = store_with(&["a", "b", "c"]);
        store.open_buffer("a");
        store.open_buffer("b");
        store.open_buffer("c");

        // Closing the active last buffer activates the new last one
        store.close_buffer(2);
        assert_eq!(store.active_index(), Some(1));

        // Closing a buffer before the active one shifts it down
        store.close_buffer(0);
        assert_eq!(store.active_index(), Some(0));
        assert_eq!(store.active_buffer().unwrap().path, "b");

        store.close_buffer(0);
        assert_eq!(store.active_index(), None);
        assert!(store.close_buffer(0).is_none());
    }

    #[test]
    fn test_set_active_buffer_bounds() {
        let mut store = store_with(&["a"]);
        assert!(!store.set_active_buffer(0));
        store.open_buffer("a");
        assert!(store.set_active_buffer(0));
        assert!(!store.set_active_buffer(1));
    }

    #[test]
    fn test_save_buffer_writes_back() {
        let mut store = store_with(&["a.txt"]);
        let idx = store.open_buffer("a.txt").unwrap();
        store.update_content("a.txt", "draft");
        store.buffers.get_mut(idx).unwrap().content = "final".into();

        assert!(store.save_buffer(idx, 42));
        let buffer = &store.buffers()[idx];
        assert!(!buffer.dirty);
        assert_eq!(buffer.last_saved_at, Some(42));
        let node = store.find("a.txt").unwrap();
        assert_eq!(node.content.as_deref(), Some("final"));
        assert_eq!(node.last_modified, Some(42));
        assert!(!store.save_buffer(7, 42));
    }

    #[test]
    fn test_reset_all() {
        let mut store = store_with(&["a", "b/c"]);
        store.open_buffer("a");
        store.reset_all();
        assert!(store.tree().is_empty());
        assert!(store.buffers().is_empty());
        assert_eq!(store.active_index(), None);
    }

    // ==================== properties ====================

    fn assert_sorted(nodes: &[FileNode]) {
        for pair in nodes.windows(2) {
            assert_ne!(
                sibling_order(&pair[0], &pair[1]),
                std::cmp::Ordering::Greater,
                "{:?} before {:?}",
                pair[0].path,
                pair[1].path
            );
        }
        for node in nodes {
            assert_sorted(&node.children);
        }
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!["a", "B", "c", "d.txt", "E.rs"]), 1..4)
            .prop_map(|segments| segments.join("/"))
    }

    proptest! {
        #[test]
        fn prop_siblings_stay_sorted(paths in prop::collection::vec((path_strategy(), any::<bool>()), 0..24)) {
            let mut store = ReplicaStore::new();
            for (path, is_dir) in paths {
                let node = if is_dir { FileNode::directory(&path) } else { FileNode::file(&path, "") };
                store.insert(node);
            }
            assert_sorted(store.tree());
        }

        #[test]
        fn prop_insert_twice_equals_once(paths in prop::collection::vec(path_strategy(), 1..12)) {
            let nodes: Vec<FileNode> = paths.iter().map(|p| FileNode::file(p, "x")).collect();
            let mut store = ReplicaStore::new();
            for node in &nodes {
                store.insert(node.clone());
            }
            let once = store.tree().to_vec();
            for node in &nodes {
                store.insert(node.clone());
            }
            prop_assert_eq!(store.tree(), once.as_slice());
        }

        #[test]
        fn prop_paths_match_ancestor_names(paths in prop::collection::vec(path_strategy(), 1..16)) {
            let mut store = ReplicaStore::new();
            for path in &paths {
                store.insert(FileNode::file(path, ""));
            }
            for root in store.tree() {
                for node in root.walk() {
                    for child in &node.children {
                        prop_assert_eq!(&child.path, &join_path(&node.path, &child.name));
                    }
                }
            }
        }
    }
}
