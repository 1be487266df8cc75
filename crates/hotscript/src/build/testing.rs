//! Scripted build backend for tests
//!
//! Nothing is built; tests push canned outputs into the watch sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use hotscript_types::{
    BackendError, BackendResult, BuildBackend, BuildOutput, Platform, WatchContext, WatchOptions,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

type Sessions = Arc<Mutex<HashMap<u64, (String, Platform, mpsc::UnboundedSender<BuildOutput>)>>>;

type InitialFn = dyn Fn(&WatchOptions) -> Option<BuildOutput> + Send + Sync;

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    sessions: Sessions,
    next_id: Arc<AtomicU64>,
    disposed: Arc<AtomicUsize>,
    initial: Option<Arc<InitialFn>>,
    refuse: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send an output right when a session starts
    pub fn with_initial(
        mut self,
        initial: impl Fn(&WatchOptions) -> Option<BuildOutput> + Send + Sync + 'static,
    ) -> Self {
        self.initial = Some(Arc::new(initial));
        self
    }

    /// Fail every `watch` call
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Deliver `output` to the live session of `name` on `platform`
    pub fn emit(&self, name: &str, platform: Platform, output: BuildOutput) -> bool {
        self.sessions
            .lock()
            .values()
            .find(|(n, p, _)| n == name && *p == platform)
            .is_some_and(|(_, _, tx)| tx.send(output).is_ok())
    }

    pub fn live(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl BuildBackend for ScriptedBackend {
    fn watch(
        &self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<BuildOutput>,
    ) -> BackendResult<Box<dyn WatchContext>> {
        if self.refuse {
            return Err(BackendError::Unavailable("scripted refusal".into()));
        }

        if let Some(output) = self.initial.as_ref().and_then(|f| f(&options)) {
            let _ = sink.send(output);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .insert(id, (options.display_name.clone(), options.platform, sink));

        Ok(Box::new(ScriptedWatch {
            id,
            sessions: self.sessions.clone(),
            disposed: self.disposed.clone(),
        }))
    }
}

struct ScriptedWatch {
    id: u64,
    sessions: Sessions,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl WatchContext for ScriptedWatch {
    async fn dispose(&mut self) {
        if self.sessions.lock().remove(&self.id).is_some() {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
