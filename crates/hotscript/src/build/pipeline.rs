//! Build Pipeline
//!
//! Wraps one backend watch session. The pipeline owns the watch context;
//! results are numbered as they are taken from the event side.

use hotscript_types::{BackendResult, BuildBackend, BuildOutput, Platform, WatchContext, WatchOptions};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

pub struct BuildPipeline {
    platform: Platform,
    entry: String,
    context: Mutex<Option<Box<dyn WatchContext>>>,
}

impl BuildPipeline {
    /// Start watching. The returned events deliver every rebuild.
    pub fn start(
        backend: &dyn BuildBackend,
        options: WatchOptions,
    ) -> BackendResult<(Self, PipelineEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let platform = options.platform;
        let entry = options.display_name.clone();
        let context = backend.watch(options, tx)?;

        let pipeline = Self {
            platform,
            entry,
            context: Mutex::new(Some(context)),
        };
        let events = PipelineEvents {
            platform,
            sequence: 0,
            rx,
        };
        Ok((pipeline, events))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Release the watch context.
    ///
    /// Waits for in-flight work; a concurrent or repeated call waits for the
    /// first one and then does nothing.
    pub async fn dispose(&self) {
        let mut context = self.context.lock().await;
        if let Some(mut ctx) = context.take() {
            ctx.dispose().await;
            debug!(script = %self.entry, platform = %self.platform, "Pipeline disposed");
        }
    }

    pub async fn is_live(&self) -> bool {
        self.context.lock().await.is_some()
    }
}

/// Numbered rebuild results of one pipeline
pub struct PipelineEvents {
    platform: Platform,
    sequence: u64,
    rx: mpsc::UnboundedReceiver<BuildOutput>,
}

impl PipelineEvents {
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Sequence number of the last result taken
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Next result with its sequence number; `None` once the backend has
    /// let go of the sink
    pub async fn next(&mut self) -> Option<(u64, BuildOutput)> {
        let output = self.rx.recv().await?;
        self.sequence += 1;
        Some((self.sequence, output))
    }
}
