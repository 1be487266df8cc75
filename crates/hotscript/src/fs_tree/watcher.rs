//! Event normalization
//!
//! notify reports raw per-path changes whose kinds differ between platforms.
//! They are turned into create/update/delete events by comparing the disk
//! with the set of paths the tree already knows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind};
use serde::{Deserialize, Serialize};

use super::node::{scan, IgnoreRules, NodeKind, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEventKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEvent {
    pub kind: TreeEventKind,
    pub node: TreeNode,
    /// Root generation the event belongs to
    pub generation: u64,
}

/// Paths currently in the tree
#[derive(Debug, Default)]
pub struct KnownPaths {
    paths: HashMap<PathBuf, NodeKind>,
}

impl KnownPaths {
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn insert_tree(&mut self, node: &TreeNode) {
        for n in node.walk() {
            self.paths.insert(n.path.clone(), n.kind);
        }
    }

    pub fn get(&self, path: &Path) -> Option<NodeKind> {
        self.paths.get(path).copied()
    }

    /// Remove `path` and everything below it, returned as a tree
    fn remove_subtree(&mut self, root: &Path, path: &Path, kind: NodeKind) -> TreeNode {
        let mut node = TreeNode::new(root, path, kind);
        self.paths.remove(path);

        if kind == NodeKind::Directory {
            let mut children: Vec<(PathBuf, NodeKind)> = self
                .paths
                .iter()
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, k)| (p.clone(), *k))
                .collect();
            children.sort();
            node.children = children
                .into_iter()
                .map(|(child, kind)| self.remove_subtree(root, &child, kind))
                .collect();
        }

        node
    }
}

/// Whether the raw event can change the tree at all
pub fn is_structural(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Classify a change of `path` and update `known` accordingly
pub fn normalize(
    root: &Path,
    path: &Path,
    known: &mut KnownPaths,
    rules: &IgnoreRules,
) -> Vec<(TreeEventKind, TreeNode)> {
    if path == root || !path.starts_with(root) {
        return Vec::new();
    }

    let previous = known.get(path);
    let current = scan(root, path, rules);

    match (previous, current) {
        (None, Some(node)) => {
            known.insert_tree(&node);
            vec![(TreeEventKind::Create, node)]
        }
        (Some(kind), None) => {
            vec![(TreeEventKind::Delete, known.remove_subtree(root, path, kind))]
        }
        (Some(NodeKind::File), Some(node)) if node.is_file() => {
            vec![(TreeEventKind::Update, node)]
        }
        (Some(kind), Some(node)) if kind != node.kind => {
            let deleted = known.remove_subtree(root, path, kind);
            known.insert_tree(&node);
            vec![(TreeEventKind::Delete, deleted), (TreeEventKind::Create, node)]
        }
        // A directory whose entries changed reports those entries separately
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_update_delete() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let rules = IgnoreRules::default();
        let mut known = KnownPaths::default();
        let file = root.join("a.js");

        std::fs::write(&file, "1").unwrap();
        let events = normalize(root, &file, &mut known, &rules);
        assert_eq!(events[0].0, TreeEventKind::Create);
        assert_eq!(events[0].1.rel_path, "a.js");

        std::fs::write(&file, "2").unwrap();
        let events = normalize(root, &file, &mut known, &rules);
        assert_eq!(events[0].0, TreeEventKind::Update);

        std::fs::remove_file(&file).unwrap();
        let events = normalize(root, &file, &mut known, &rules);
        assert_eq!(events[0].0, TreeEventKind::Delete);

        // Already gone and forgotten
        assert!(normalize(root, &file, &mut known, &rules).is_empty());
    }

    #[test]
    fn test_directory_delete_carries_children() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let rules = IgnoreRules::default();
        let mut known = KnownPaths::default();

        let sub = root.join("audio");
        std::fs::create_dir_all(sub.join("fx")).unwrap();
        std::fs::write(sub.join("synth.js"), "").unwrap();
        std::fs::write(sub.join("fx/reverb.js"), "").unwrap();

        let created = normalize(root, &sub, &mut known, &rules);
        assert_eq!(created[0].0, TreeEventKind::Create);
        assert_eq!(created[0].1.walk().count(), 4);

        std::fs::remove_dir_all(&sub).unwrap();
        let deleted = normalize(root, &sub, &mut known, &rules);
        assert_eq!(deleted[0].0, TreeEventKind::Delete);
        let files: Vec<_> = deleted[0]
            .1
            .walk()
            .filter(|n| n.is_file())
            .map(|n| n.rel_path.clone())
            .collect();
        assert_eq!(files, vec!["audio/fx/reverb.js", "audio/synth.js"]);
        assert!(known.get(&sub.join("synth.js")).is_none());
    }

    #[test]
    fn test_ignored_paths_produce_nothing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut known = KnownPaths::default();
        let backup = root.join("a.js~");
        std::fs::write(&backup, "").unwrap();
        assert!(normalize(root, &backup, &mut known, &IgnoreRules::default()).is_empty());
    }
}
