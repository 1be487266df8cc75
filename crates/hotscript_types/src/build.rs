//! Build Backend Seam
//!
//! A backend turns one entry file into an artifact for one platform and keeps
//! doing so while it is watched. Rebuild results are delivered over a channel
//! until the watch context is disposed.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{BuildDiagnostic, Platform};

/// Result of one backend build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    pub errors: Vec<BuildDiagnostic>,
    pub artifact: Option<String>,
}

impl BuildOutput {
    pub fn success(artifact: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            artifact: Some(artifact.into()),
        }
    }

    pub fn failure(error: BuildDiagnostic) -> Self {
        Self {
            errors: vec![error],
            artifact: None,
        }
    }

    /// The artifact, if the build produced one without errors
    pub fn artifact(&self) -> Option<&str> {
        if self.errors.is_empty() {
            self.artifact.as_deref()
        } else {
            None
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact().is_some()
    }
}

/// Parameters of a watch session
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Absolute path of the entry file
    pub entry: PathBuf,
    /// Directory relative imports may not leave. Defaults to the entry's parent.
    pub root: PathBuf,
    pub platform: Platform,
    /// Embed an inline source map in the artifact
    pub sourcemap: bool,
    /// Name the artifact reports as its source, usually the script name
    pub display_name: String,
    /// Window in which file change notifications are coalesced
    pub debounce: Duration,
}

impl WatchOptions {
    pub fn new(entry: impl Into<PathBuf>, platform: Platform, display_name: impl Into<String>) -> Self {
        let entry = entry.into();
        let root = entry.parent().map(PathBuf::from).unwrap_or_default();
        Self {
            entry,
            root,
            platform,
            sourcemap: true,
            display_name: display_name.into(),
            debounce: Duration::from_millis(50),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Failure to start a watch session. Failed builds are not errors at this
/// level, they arrive as [`BuildOutput`]s.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to watch {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A build backend with a watch mode
pub trait BuildBackend: Send + Sync + 'static {
    /// Start watching `options.entry`.
    ///
    /// The backend builds once right away and again on every change of the
    /// entry or of a file it imports, sending each result to `sink`.
    fn watch(
        &self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<BuildOutput>,
    ) -> BackendResult<Box<dyn WatchContext>>;
}

/// Live watch session, owner of the backend resources
#[async_trait]
pub trait WatchContext: Send {
    /// Stop watching.
    ///
    /// Waits for a build in flight to finish. Once this returns nothing more
    /// is sent to the sink. Calling it again is a no-op.
    async fn dispose(&mut self);
}
