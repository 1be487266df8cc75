//! Script Registry
//!
//! Maps script names to their records and build pipelines, follows the file
//! tree, and hands out [`ScriptHandle`]s.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use hotscript_types::{
    sanitize_script_name, BuildBackend, BuildDiagnostic, ModuleEvaluator, Platform,
    RuntimeDiagnostic, WatchOptions, SOURCE_EXTENSION,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::build::{BuildCorrelator, BuildPipeline};
use crate::config::ScriptingConfig;
use crate::error::{ScriptingError, ScriptingResult};
use crate::fs_tree::{FileTree, TreeEvent, TreeEventKind, TreeNode};
use crate::handle::ScriptHandle;
use crate::locate;
use crate::router::RuntimeErrorRouter;
use crate::script::{ScriptPatch, ScriptRecord};
use crate::state::{InternalState, SharedState, StateClass, StateId, Subscription};

/// Longest wait for a correlator to stop once its pipelines are disposed
const CORRELATOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What [`ScriptRegistry::switch`] retargets to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    Path(PathBuf),
    Dirname { dirname: PathBuf },
    Idle,
}

impl SwitchTarget {
    pub fn path(&self) -> Option<&Path> {
        match self {
            SwitchTarget::Path(path) | SwitchTarget::Dirname { dirname: path } => {
                Some(path.as_path())
            }
            SwitchTarget::Idle => None,
        }
    }
}

impl From<Option<PathBuf>> for SwitchTarget {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(SwitchTarget::Idle, SwitchTarget::Path)
    }
}

impl From<&Path> for SwitchTarget {
    fn from(path: &Path) -> Self {
        SwitchTarget::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for SwitchTarget {
    fn from(path: PathBuf) -> Self {
        SwitchTarget::Path(path)
    }
}

/// A tracked script
struct ScriptEntry {
    state: SharedState<ScriptRecord>,
    filename: PathBuf,
    pipelines: Vec<BuildPipeline>,
    teardown: Arc<AtomicBool>,
    correlator: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ScriptRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: ScriptingConfig,
    tree: FileTree,
    backend: Arc<dyn BuildBackend>,
    evaluator: Arc<dyn ModuleEvaluator>,
    router: RuntimeErrorRouter,
    records: StateClass<ScriptRecord>,
    internal_class: StateClass<InternalState>,
    internal: Mutex<Option<SharedState<InternalState>>>,
    scripts: DashMap<String, ScriptEntry>,
    /// Serializes switches, tree events and authoring calls
    lifecycle: tokio::sync::Mutex<()>,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptRegistry {
    pub fn new(
        config: ScriptingConfig,
        backend: Arc<dyn BuildBackend>,
        evaluator: Arc<dyn ModuleEvaluator>,
        router: RuntimeErrorRouter,
    ) -> Self {
        let records = StateClass::new();
        records.register_update_hook(resolve_runtime_location);

        Self {
            inner: Arc::new(RegistryInner {
                tree: FileTree::new(&config.ignore),
                config,
                backend,
                evaluator,
                router,
                records,
                internal_class: StateClass::new(),
                internal: Mutex::new(None),
                scripts: DashMap::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                events: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.inner.config
    }

    pub fn tree(&self) -> &FileTree {
        &self.inner.tree
    }

    pub fn router(&self) -> &RuntimeErrorRouter {
        &self.inner.router
    }

    /// Follow the file tree and switch to the configured directory
    pub async fn start(&self) -> ScriptingResult<()> {
        {
            let mut internal = self.inner.internal.lock();
            if internal.is_none() {
                *internal = Some(self.inner.internal_class.create(InternalState::default()));
            }
        }

        {
            let mut events = self.inner.events.lock();
            if events.is_none() {
                let rx = self.inner.tree.subscribe();
                *events = Some(tokio::spawn(event_loop(Arc::downgrade(&self.inner), rx)));
            }
        }

        let target = SwitchTarget::from(self.inner.config.dirname.clone());
        self.switch(target).await
    }

    /// Tear every script down and stop following the tree
    pub async fn stop(&self) -> ScriptingResult<()> {
        self.switch(SwitchTarget::Idle).await?;

        if let Some(events) = self.inner.events.lock().take() {
            events.abort();
        }
        if let Some(internal) = self.inner.internal.lock().take() {
            let _ = internal.delete();
        }
        info!("Script registry stopped");
        Ok(())
    }

    /// Retarget the registry.
    ///
    /// Every tracked script is torn down first. Returns once the new root has
    /// been scanned and every script found has finished its first build round.
    pub async fn switch(&self, target: impl Into<SwitchTarget>) -> ScriptingResult<()> {
        let target = target.into();
        let _lifecycle = self.inner.lifecycle.lock().await;

        let names: Vec<String> = self.inner.scripts.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.inner.delete_by_name(&name).await;
        }

        let tree = self.inner.tree.switch(target.path()).await?;
        match &tree {
            Some(tree) => {
                info!("Switched scripts directory to {}", tree.path.display());
                self.inner.create_for_node(tree).await;
            }
            None => info!("Script registry idle"),
        }
        self.inner.publish_listing();
        Ok(())
    }

    /// Names of the tracked scripts
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.scripts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        sanitize_script_name(name).is_ok_and(|name| self.inner.scripts.contains_key(&name))
    }

    /// Every script record, for monitoring
    pub fn collection(&self) -> Vec<ScriptRecord> {
        self.inner
            .records
            .values()
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    /// Attach a handle importing the configured target's artifacts
    pub fn attach(&self, name: &str) -> ScriptingResult<ScriptHandle> {
        self.attach_for(name, self.inner.config.target)
    }

    pub fn attach_for(&self, name: &str, target: Platform) -> ScriptingResult<ScriptHandle> {
        let name = sanitize_script_name(name)?;
        let id = self.inner.state_id(&name)?;
        let state = self.inner.records.attach(id)?;
        ScriptHandle::new(
            name,
            target,
            state,
            self.inner.evaluator.clone(),
            self.inner.router.clone(),
        )
    }

    /// Listen for changes of the script listing
    pub fn on_update(
        &self,
        callback: impl Fn(&InternalState) + Send + Sync + 'static,
        immediately: bool,
    ) -> ScriptingResult<Subscription> {
        let internal = self
            .inner
            .internal
            .lock()
            .as_ref()
            .map(|s| s.id())
            .and_then(|id| self.inner.internal_class.attach(id).ok())
            .ok_or_else(|| ScriptingError::NotFound("internal state".into()))?;
        Ok(internal.on_update(move |_, listing| callback(listing), immediately)?)
    }

    /// Listen for changes of any script record; `None` means deleted
    pub fn on_collection_update(
        &self,
        callback: impl Fn(StateId, Option<&ScriptRecord>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.records.observe(callback)
    }

    /// Write a new script and wait for its first build round
    pub async fn create_script(&self, name: &str, source: &str) -> ScriptingResult<()> {
        let name = sanitize_script_name(name)?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.scripts.contains_key(&name) {
            return Err(ScriptingError::AlreadyExists(name));
        }

        self.inner.tree.write_file(&name, source).await?;
        let node = self
            .inner
            .tree
            .find_in_tree(&name)?
            .ok_or_else(|| ScriptingError::NotFound(name.clone()))?;
        self.inner.create_for_node(&node).await;
        self.inner.publish_listing();
        Ok(())
    }

    /// Overwrite a script's source; the pipelines pick the change up
    pub async fn update_script(&self, name: &str, source: &str) -> ScriptingResult<()> {
        let name = sanitize_script_name(name)?;
        if !self.inner.scripts.contains_key(&name) {
            return Err(ScriptingError::NotFound(name));
        }
        self.inner.tree.write_file(&name, source).await?;
        Ok(())
    }

    /// Remove a script's file and tear the script down
    pub async fn delete_script(&self, name: &str) -> ScriptingResult<()> {
        let name = sanitize_script_name(name)?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.inner.scripts.contains_key(&name) {
            return Err(ScriptingError::NotFound(name));
        }

        self.inner.tree.rm(&name).await?;
        self.inner.delete_by_name(&name).await;
        self.inner.publish_listing();
        Ok(())
    }

    /// Value scripts read through `getGlobalScriptingContext()`
    pub fn set_global_scripting_context(&self, context: serde_json::Value) {
        self.inner.evaluator.set_global_context(context);
    }
}

impl RegistryInner {
    fn state_id(&self, name: &str) -> ScriptingResult<StateId> {
        self.scripts
            .get(name)
            .map(|entry| entry.state.id())
            .ok_or_else(|| ScriptingError::NotFound(name.to_string()))
    }

    /// Track every source file under `node` that is not tracked yet and wait
    /// for their first build rounds
    async fn create_for_node(&self, node: &TreeNode) {
        let mut first_rounds = Vec::new();
        let mut stack = vec![node];

        while let Some(node) = stack.pop() {
            if node.is_dir() {
                stack.extend(node.children.iter().rev());
                continue;
            }
            if node.extension.as_deref() != Some(SOURCE_EXTENSION) {
                continue;
            }

            let name = match sanitize_script_name(&node.rel_path) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping {}: {}", node.path.display(), e);
                    continue;
                }
            };
            if self.scripts.contains_key(&name) {
                continue;
            }

            if let Some(first_round) = self.track(name, &node.path) {
                first_rounds.push(first_round);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.first_build_timeout();
        for (name, first_round) in first_rounds {
            match tokio::time::timeout_at(deadline, first_round).await {
                Ok(_) => debug!(script = %name, "First build round done"),
                Err(_) => warn!(script = %name, "Timed out waiting for first build round"),
            }
        }
    }

    /// Create the record and pipelines of one script
    fn track(&self, name: String, filename: &Path) -> Option<(String, oneshot::Receiver<()>)> {
        let state = self.records.create(ScriptRecord::new(name.clone(), filename));
        let teardown = Arc::new(AtomicBool::new(false));
        let root = self.tree.root();
        let options = |platform| {
            let options = WatchOptions::new(filename, platform, name.clone())
                .with_debounce(self.config.debounce());
            match &root {
                Some(root) => options.with_root(root),
                None => options,
            }
        };

        let browser = BuildPipeline::start(self.backend.as_ref(), options(Platform::Browser));
        let node = BuildPipeline::start(self.backend.as_ref(), options(Platform::Node));

        let mut entry = ScriptEntry {
            state,
            filename: filename.to_path_buf(),
            pipelines: Vec::new(),
            teardown: teardown.clone(),
            correlator: None,
        };

        let first_round = match (browser, node) {
            (Ok((browser, browser_events)), Ok((node, node_events))) => {
                let (tx, rx) = oneshot::channel();
                let correlator = self
                    .records
                    .attach(entry.state.id())
                    .ok()
                    .map(|state| BuildCorrelator::new(name.clone(), state, teardown, tx));
                if let Some(correlator) = correlator {
                    entry.correlator = Some(tokio::spawn(correlator.run(browser_events, node_events)));
                }
                entry.pipelines = vec![browser, node];
                Some((name.clone(), rx))
            }
            (browser, node) => {
                let mut message = String::new();
                for result in [browser, node] {
                    match result {
                        Ok((pipeline, _)) => entry.pipelines.push(pipeline),
                        Err(e) => {
                            error!(script = %name, "Failed to start build pipeline: {}", e);
                            if message.is_empty() {
                                message = e.to_string();
                            }
                        }
                    }
                }
                let patch = ScriptPatch {
                    build_error: Some(Some(BuildDiagnostic::backend(message))),
                    ..ScriptPatch::default()
                };
                if let Err(e) = entry.state.set(patch) {
                    warn!(script = %name, "Failed to record pipeline failure: {}", e);
                }
                None
            }
        };

        info!(script = %name, "Script created");
        self.scripts.insert(name, entry);
        first_round
    }

    /// Tear one script down. Returns once no build of it can publish anymore.
    async fn delete_by_name(&self, name: &str) -> bool {
        let Some((_, mut entry)) = self.scripts.remove(name) else {
            return false;
        };

        entry.teardown.store(true, Ordering::SeqCst);
        for pipeline in &entry.pipelines {
            pipeline.dispose().await;
        }

        if let Some(mut correlator) = entry.correlator.take() {
            match tokio::time::timeout(CORRELATOR_STOP_TIMEOUT, &mut correlator).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(script = %name, "Correlator task failed: {}", e),
                Err(_) => {
                    warn!(script = %name, "Correlator did not stop, aborting it");
                    correlator.abort();
                }
            }
        }

        if let Err(e) = entry.state.delete() {
            debug!(script = %name, "Record already gone: {}", e);
        }
        info!(script = %name, "Script deleted");
        true
    }

    /// Names of the scripts whose files lie at or under `path`
    fn names_under(&self, path: &Path) -> Vec<String> {
        self.scripts
            .iter()
            .filter(|e| e.value().filename.starts_with(path))
            .map(|e| e.key().clone())
            .collect()
    }

    fn publish_listing(&self) {
        let Some(internal) = self.internal.lock().as_ref().map(|s| s.id()) else {
            return;
        };
        let Ok(internal) = self.internal_class.attach(internal) else {
            return;
        };

        let name_ids: BTreeMap<String, StateId> = self
            .scripts
            .iter()
            .map(|e| (e.key().clone(), e.value().state.id()))
            .collect();
        if let Err(e) = internal.set(InternalState::from_ids(name_ids)) {
            warn!("Failed to publish script listing: {}", e);
        }
        internal.detach();
    }

    async fn handle_event(&self, event: TreeEvent) {
        let _lifecycle = self.lifecycle.lock().await;
        if event.generation != self.tree.generation() {
            debug!(path = %event.node.rel_path, "Dropping tree event from a previous root");
            return;
        }

        match event.kind {
            TreeEventKind::Create => {
                // The path may be gone again by the time its event is handled
                match self.tree.find_in_tree(&event.node.rel_path) {
                    Ok(Some(node)) => self.create_for_node(&node).await,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(path = %event.node.rel_path, "Failed to rescan: {}", e);
                        return;
                    }
                }
            }
            TreeEventKind::Delete => {
                for name in self.names_under(&event.node.path) {
                    self.delete_by_name(&name).await;
                }
            }
            // Rebuilds are driven by the pipelines' own watchers
            TreeEventKind::Update => return,
        }
        self.publish_listing();
    }
}

async fn event_loop(registry: Weak<RegistryInner>, mut rx: mpsc::UnboundedReceiver<TreeEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.handle_event(event).await;
    }
    debug!("Tree event loop stopped");
}

/// Fill in the source location of a runtime error as it is reported
fn resolve_runtime_location(patch: &ScriptPatch, current: &ScriptRecord) -> Option<ScriptPatch> {
    let Some(Some(error)) = &patch.runtime_error else {
        return None;
    };
    if error.location.is_some() {
        return None;
    }

    let artifact = current.build(error.source)?;
    let location = locate::locate(&error.stack, artifact)?;

    let mut resolved: RuntimeDiagnostic = error.clone();
    resolved.location = Some(location);
    Some(ScriptPatch {
        runtime_error: Some(Some(resolved)),
        ..patch.clone()
    })
}
