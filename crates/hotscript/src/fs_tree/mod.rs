//! File Tree
//!
//! Watches one root directory at a time and exposes it as a tree of nodes,
//! a stream of change events and a small set of file operations confined to
//! the root.

mod node;
mod watcher;

pub use node::*;
pub use watcher::{TreeEvent, TreeEventKind};

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use watcher::{is_structural, normalize, KnownPaths};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("No root directory is being watched")]
    NoRoot,

    #[error("Path escapes the root directory: {0}")]
    OutsideRoot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type FsResult<T> = Result<T, FsError>;

/// Watched directory tree
#[derive(Clone)]
pub struct FileTree {
    inner: Arc<TreeInner>,
}

struct TreeInner {
    rules: IgnoreRules,
    root: RwLock<Option<PathBuf>>,
    known: Mutex<KnownPaths>,
    generation: AtomicU64,
    watcher: Mutex<Option<RecommendedWatcher>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TreeEvent>>>,
}

impl TreeInner {
    fn handle(&self, generation: u64, event: Event) {
        if generation != self.generation.load(Ordering::SeqCst) || !is_structural(&event) {
            return;
        }
        let Some(root) = self.root.read().clone() else {
            return;
        };

        let mut events = Vec::new();
        {
            let mut known = self.known.lock();
            for path in &event.paths {
                events.extend(normalize(&root, path, &mut known, &self.rules));
            }
        }

        for (kind, node) in events {
            debug!(kind = ?kind, path = %node.rel_path, "Tree event");
            self.publish(TreeEvent {
                kind,
                node,
                generation,
            });
        }
    }

    fn publish(&self, event: TreeEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl FileTree {
    pub fn new(ignore: &[String]) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                rules: IgnoreRules::new(ignore),
                root: RwLock::new(None),
                known: Mutex::new(KnownPaths::default()),
                generation: AtomicU64::new(0),
                watcher: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Receive every tree event from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TreeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.inner.root.read().clone()
    }

    /// Generation of the current root; bumped on every switch
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Watch `root` instead of the current root, or nothing at all.
    ///
    /// The root is created if missing. Returns the scanned tree.
    pub async fn switch(&self, root: Option<&Path>) -> FsResult<Option<TreeNode>> {
        self.inner.watcher.lock().take();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.known.lock().clear();

        let Some(root) = root else {
            *self.inner.root.write() = None;
            info!("File tree idle");
            return Ok(None);
        };

        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        *self.inner.root.write() = Some(root.clone());

        // Watch before scanning so nothing created in between is missed
        let weak: Weak<TreeInner> = Arc::downgrade(&self.inner);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match res {
                Ok(event) => inner.handle(generation, event),
                Err(e) => warn!("File watcher error: {}", e),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        *self.inner.watcher.lock() = Some(watcher);

        let tree = scan(&root, &root, &self.inner.rules)
            .unwrap_or_else(|| TreeNode::new(&root, &root, NodeKind::Directory));
        self.inner.known.lock().insert_tree(&tree);

        info!("Watching scripts directory: {}", root.display());
        Ok(Some(tree))
    }

    /// Fresh scan of the whole root
    pub fn tree(&self) -> FsResult<TreeNode> {
        let root = self.root().ok_or(FsError::NoRoot)?;
        Ok(scan(&root, &root, &self.inner.rules)
            .unwrap_or_else(|| TreeNode::new(&root, &root, NodeKind::Directory)))
    }

    pub fn find_in_tree(&self, rel_path: &str) -> FsResult<Option<TreeNode>> {
        let root = self.root().ok_or(FsError::NoRoot)?;
        let path = self.resolve(rel_path)?;
        Ok(scan(&root, &path, &self.inner.rules))
    }

    pub async fn read_file(&self, rel_path: &str) -> FsResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(rel_path)?).await?)
    }

    /// Write a file, creating parent directories as needed
    pub async fn write_file(&self, rel_path: &str, contents: impl AsRef<[u8]>) -> FsResult<()> {
        let path = self.resolve(rel_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        Ok(())
    }

    /// Remove a file or a whole directory
    pub async fn rm(&self, rel_path: &str) -> FsResult<()> {
        let path = self.resolve(rel_path)?;
        if tokio::fs::metadata(&path).await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub async fn mkdir(&self, rel_path: &str) -> FsResult<()> {
        tokio::fs::create_dir_all(self.resolve(rel_path)?).await?;
        Ok(())
    }

    /// Absolute path of `rel_path`, which must stay inside the root
    pub fn resolve(&self, rel_path: &str) -> FsResult<PathBuf> {
        let root = self.root().ok_or(FsError::NoRoot)?;
        let rel = Path::new(rel_path);

        let mut path = root;
        for component in rel.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(FsError::OutsideRoot(rel_path.to_string())),
            }
        }
        Ok(path)
    }
}
