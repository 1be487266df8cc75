//! Script Handles
//!
//! A handle is one consumer's view of a script record. Handles of the same
//! script share the record; each owns only its own callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hotscript_types::{
    BuildDiagnostic, ModuleEvaluator, ModuleId, Platform, RuntimeDiagnostic, ScriptException,
    ScriptModule,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ScriptingError, ScriptingResult};
use crate::router::{ErrorSink, RuntimeErrorRouter};
use crate::script::{ScriptPatch, ScriptRecord};
use crate::state::{SharedState, Subscription};

/// Imports remembered per handle for runtime error attribution
const IMPORT_HISTORY: usize = 16;

pub struct ScriptHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    target: Platform,
    state: SharedState<ScriptRecord>,
    evaluator: Arc<dyn ModuleEvaluator>,
    router: RuntimeErrorRouter,
    router_token: AtomicU64,
    imports: Mutex<VecDeque<ModuleId>>,
    detached: AtomicBool,
}

impl ScriptHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        target: Platform,
        state: SharedState<ScriptRecord>,
        evaluator: Arc<dyn ModuleEvaluator>,
        router: RuntimeErrorRouter,
    ) -> ScriptingResult<Self> {
        let name = name.into();
        let inner = Arc::new_cyclic(|weak: &Weak<HandleInner>| {
            let sink: Weak<dyn ErrorSink> = weak.clone();
            let token = router.register(sink);
            HandleInner {
                name,
                target,
                state,
                evaluator,
                router,
                router_token: AtomicU64::new(token),
                imports: Mutex::new(VecDeque::with_capacity(IMPORT_HISTORY)),
                detached: AtomicBool::new(false),
            }
        });

        // The record going away ends this handle as well
        let weak = Arc::downgrade(&inner);
        let registered = inner.state.on_detach(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release();
            }
        });
        if let Err(e) = registered {
            inner.release();
            return Err(e.into());
        }

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Platform whose artifact [`import`](Self::import) evaluates
    pub fn target(&self) -> Platform {
        self.inner.target
    }

    pub fn record(&self) -> ScriptingResult<ScriptRecord> {
        Ok(self.inner.state.get()?)
    }

    pub fn build_error(&self) -> ScriptingResult<Option<BuildDiagnostic>> {
        Ok(self.inner.state.read(|r| r.build_error.clone())?)
    }

    pub fn runtime_error(&self) -> ScriptingResult<Option<RuntimeDiagnostic>> {
        Ok(self.inner.state.read(|r| r.runtime_error.clone())?)
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Evaluate the latest artifact for the handle's target.
    ///
    /// Every call evaluates into a new module; modules loaded earlier keep
    /// running as they were. An error thrown while the module body runs is
    /// recorded on the script and returned. Promise rejections the module
    /// leaves unhandled go through the router.
    pub fn import(&self) -> ScriptingResult<LoadedModule> {
        let inner = &self.inner;
        let artifact = inner
            .state
            .read(|r| r.build(inner.target).cloned())?
            .ok_or_else(|| ScriptingError::NoArtifact {
                name: inner.name.clone(),
                platform: inner.target,
            })?;

        let id = ModuleId::new(&inner.name);
        inner.remember(id.clone());

        match inner.evaluator.instantiate(&id, &artifact) {
            Ok(module) => {
                debug!(script = %inner.name, module = %id, "Imported module");
                let loaded = LoadedModule {
                    id,
                    platform: inner.target,
                    module,
                    router: inner.router.clone(),
                };
                loaded.route_unhandled_rejections();
                Ok(loaded)
            }
            Err(exception) => {
                inner.report(&exception);
                Err(ScriptingError::Evaluation(exception))
            }
        }
    }

    /// Record `exception` as the script's runtime error. Never fails; a
    /// record that is already gone is logged and left alone.
    pub fn report_runtime_error(&self, exception: &ScriptException) {
        self.inner.report(exception);
    }

    /// Whether `stack` mentions one of this handle's recent imports
    pub fn owns(&self, stack: &str) -> bool {
        self.inner.owns(stack)
    }

    pub fn on_update(
        &self,
        callback: impl Fn(&ScriptPatch, &ScriptRecord) + Send + Sync + 'static,
        immediately: bool,
    ) -> ScriptingResult<Subscription> {
        Ok(self.inner.state.on_update(callback, immediately)?)
    }

    /// Run `callback` once the handle ends, by [`detach`](Self::detach) or
    /// because the script was deleted
    pub fn on_detach(&self, callback: impl FnOnce() + Send + Sync + 'static) -> ScriptingResult<()> {
        Ok(self.inner.state.on_detach(callback)?)
    }

    /// End this handle. The record and other handles are unaffected.
    pub fn detach(&self) {
        self.inner.release();
        self.inner.state.detach();
    }
}

impl Drop for ScriptHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("name", &self.inner.name)
            .field("target", &self.inner.target)
            .finish()
    }
}

impl HandleInner {
    fn remember(&self, id: ModuleId) {
        let mut imports = self.imports.lock();
        if imports.len() == IMPORT_HISTORY {
            imports.pop_front();
        }
        imports.push_back(id);
    }

    fn release(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            self.router.unregister(self.router_token.load(Ordering::SeqCst));
        }
    }
}

impl ErrorSink for HandleInner {
    fn script_name(&self) -> &str {
        &self.name
    }

    fn owns(&self, stack: &str) -> bool {
        self.imports.lock().iter().any(|id| id.appears_in(stack))
    }

    fn report(&self, exception: &ScriptException) {
        let mut diagnostic =
            RuntimeDiagnostic::new(self.target, exception.message.clone(), exception.stack.clone());
        diagnostic.name = exception.name.clone();
        diagnostic.text = exception.summary();

        if let Err(e) = self.state.set(ScriptPatch::runtime_error(Some(diagnostic))) {
            warn!(script = %self.name, "Dropping runtime error: {}", e);
        }
    }
}

/// An evaluated artifact
pub struct LoadedModule {
    id: ModuleId,
    platform: Platform,
    module: Box<dyn ScriptModule>,
    router: RuntimeErrorRouter,
}

impl LoadedModule {
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn exports(&self) -> Vec<String> {
        self.module.exports()
    }

    /// Call an exported function. A thrown error is returned to the caller;
    /// rejections left unhandled meanwhile are routed.
    pub fn call(
        &self,
        export: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ScriptException> {
        let result = self.module.call(export, args);
        self.route_unhandled_rejections();
        result
    }

    pub fn get(&self, export: &str) -> Result<serde_json::Value, ScriptException> {
        let result = self.module.get(export);
        self.route_unhandled_rejections();
        result
    }

    fn route_unhandled_rejections(&self) {
        for rejection in self.module.take_unhandled_rejections() {
            if let Err(unowned) = self.router.route(rejection) {
                warn!(module = %self.id, "Unhandled rejection outside any live script: {}", unowned);
            }
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .finish()
    }
}
