//! Tree nodes and directory scanning

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub kind: NodeKind,
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the root with `/` separators, empty for the root
    pub rel_path: String,
    pub name: String,
    /// Extension including the dot, e.g. `.js`
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(root: &Path, path: &Path, kind: NodeKind) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = match kind {
            NodeKind::File => path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy())),
            NodeKind::Directory => None,
        };

        Self {
            kind,
            path: path.to_path_buf(),
            rel_path: rel_path(root, path),
            name,
            extension,
            children: Vec::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Depth-first iterator over this node and its descendants
    pub fn walk(&self) -> impl Iterator<Item = &TreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Find a descendant by relative path
    pub fn find(&self, rel_path: &str) -> Option<&TreeNode> {
        let rel_path = rel_path.trim_matches('/');
        self.walk().find(|n| n.rel_path == rel_path)
    }
}

/// Relative path of `path` under `root` with `/` separators
pub fn rel_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Which paths stay out of the tree
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<WildMatch>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| WildMatch::new(p)).collect(),
        }
    }

    /// Dot-files, editor backups and configured patterns
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if rel_path.is_empty() {
            return false;
        }
        let hidden = rel_path
            .split('/')
            .any(|segment| segment.starts_with('.') || segment.ends_with('~'));

        hidden || self.patterns.iter().any(|p| p.matches(rel_path))
    }
}

/// Scan `path` below `root`, sorted by name, skipping ignored entries.
///
/// Returns `None` when the path does not exist or is ignored.
pub fn scan(root: &Path, path: &Path, rules: &IgnoreRules) -> Option<TreeNode> {
    let meta = std::fs::metadata(path).ok()?;
    if rules.is_ignored(&rel_path(root, path)) {
        return None;
    }

    if !meta.is_dir() {
        return Some(TreeNode::new(root, path, NodeKind::File));
    }

    let mut node = TreeNode::new(root, path, NodeKind::Directory);
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(path) {
        Ok(dir) => dir.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            tracing::warn!("Failed to read directory {}: {}", path.display(), e);
            Vec::new()
        }
    };
    entries.sort();

    node.children = entries
        .iter()
        .filter_map(|child| scan(root, child, rules))
        .collect();
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("audio/synth")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("vendor")).unwrap();
        for file in ["b.js", "a.js", "a.js~", ".hidden.js", "audio/synth/voice.js", "vendor/x.js"] {
            std::fs::write(root.join(file), "").unwrap();
        }

        let rules = IgnoreRules::new(&["vendor".to_string()]);
        let tree = scan(root, root, &rules).unwrap();
        let paths: Vec<_> = tree.walk().map(|n| n.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["", "a.js", "audio", "audio/synth", "audio/synth/voice.js", "b.js"]);

        let voice = tree.find("audio/synth/voice.js").unwrap();
        assert_eq!(voice.name, "voice.js");
        assert_eq!(voice.extension.as_deref(), Some(".js"));
        assert!(voice.is_file());
    }

    #[test]
    fn test_ignore_rules() {
        let rules = IgnoreRules::new(&["*.tmp.js".to_string()]);
        assert!(rules.is_ignored("dir/.cache/x.js"));
        assert!(rules.is_ignored("x.js~"));
        assert!(rules.is_ignored("draft.tmp.js"));
        assert!(!rules.is_ignored("dir/x.js"));
        assert!(!rules.is_ignored(""));
    }
}
