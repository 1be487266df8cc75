//! QuickJS Module Evaluator
//!
//! Every instantiation gets its own runtime, so modules imported from two
//! builds of the same script never share state. Modules embedded in the
//! artifact are served by the runtime's loader under the entry's scope, and
//! promise rejections nothing handles are queued for the host.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::Arc;

use hotscript_types::bundle::{embedded_modules, join_relative};
use hotscript_types::{split_module_url, ModuleEvaluator, ModuleId, ScriptException, ScriptModule};
use parking_lot::{Mutex, RwLock};
use rquickjs::function::Rest;
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{qjs, CatchResultExt, Context, Ctx, Module, Object, Runtime, Value};

use crate::convert::{js_to_json, json_to_js};
use crate::error::{from_value, new_context, to_exception};
use crate::globals::register_globals;

/// Global under which a module's namespace object is kept alive
const NAMESPACE_KEY: &str = "__hotscriptNamespace";

/// Evaluates artifacts as ES modules in fresh QuickJS runtimes
#[derive(Debug, Clone, Default)]
pub struct QuickJsEvaluator {
    context: Arc<RwLock<serde_json::Value>>,
}

impl QuickJsEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned by `getGlobalScriptingContext()` in every module,
    /// including ones already imported
    pub fn global_context(&self) -> serde_json::Value {
        self.context.read().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedded modules
// ─────────────────────────────────────────────────────────────────────────────

struct BundleResolver {
    entry: String,
    modules: Arc<HashMap<String, String>>,
}

impl Resolver for BundleResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        let resolved = split_module_url(base).and_then(|(scope, importer)| {
            let target = join_relative(importer, name)?;
            let extended = format!("{}.js", target);
            [target, extended]
                .into_iter()
                .find(|candidate| *candidate == self.entry || self.modules.contains_key(candidate))
                .map(|candidate| format!("{}{}", scope, candidate))
        });
        resolved.ok_or_else(|| rquickjs::Error::new_resolving(base, name))
    }
}

struct BundleLoader {
    modules: Arc<HashMap<String, String>>,
}

impl Loader for BundleLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let source = split_module_url(name)
            .and_then(|(_, path)| self.modules.get(path))
            .ok_or_else(|| rquickjs::Error::new_loading(name))?;
        Module::declare(ctx.clone(), name, source.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unhandled rejections
// ─────────────────────────────────────────────────────────────────────────────

/// Rejected promises without a handler, keyed by promise
#[derive(Default)]
struct Rejections {
    pending: Mutex<Vec<(usize, ScriptException)>>,
}

impl Rejections {
    /// The host looked at this promise's outcome itself
    fn observed(&self, key: usize) {
        self.pending.lock().retain(|(pending, _)| *pending != key);
    }

    fn take(&self) -> Vec<ScriptException> {
        std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .map(|(_, exception)| exception)
            .collect()
    }
}

fn promise_key(promise: &Value<'_>) -> usize {
    // SAFETY: only the address is read, the value is not dereferenced
    unsafe { qjs::JS_VALUE_GET_PTR(promise.as_raw()) as usize }
}

/// Called by QuickJS when a promise is rejected without a handler, and again
/// with `is_handled` set if one is attached later
unsafe extern "C" fn track_rejection(
    ctx: *mut qjs::JSContext,
    promise: qjs::JSValue,
    reason: qjs::JSValue,
    is_handled: c_int,
    opaque: *mut c_void,
) {
    // SAFETY: `opaque` is the `Rejections` installed with the tracker, which
    // outlives the runtime
    let rejections = unsafe { &*(opaque as *const Rejections) };
    let key = unsafe { qjs::JS_VALUE_GET_PTR(promise) } as usize;
    if is_handled != 0 {
        rejections.observed(key);
        return;
    }

    let Some(ctx) = NonNull::new(ctx) else {
        return;
    };
    // SAFETY: QuickJS holds the runtime while calling the tracker; `reason`
    // is borrowed, so it is duplicated before being owned
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let reason = unsafe { Value::from_raw(ctx.clone(), qjs::JS_DupValue(reason)) };
    let exception = from_value(reason);
    rejections.pending.lock().push((key, exception));
}

fn install_rejection_tracker(ctx: &Ctx<'_>, rejections: &Arc<Rejections>) {
    // SAFETY: every runtime is dropped before the `Rejections` it reports to
    unsafe {
        let runtime = qjs::JS_GetRuntime(ctx.as_raw().as_ptr());
        qjs::JS_SetHostPromiseRejectionTracker(
            runtime,
            Some(track_rejection),
            Arc::as_ptr(rejections) as *mut c_void,
        );
    }
}

impl ModuleEvaluator for QuickJsEvaluator {
    fn instantiate(
        &self,
        id: &ModuleId,
        artifact: &str,
    ) -> Result<Box<dyn ScriptModule>, ScriptException> {
        // Declared first so it is dropped after the runtime
        let rejections = Arc::new(Rejections::default());
        let (runtime, context) = new_context()?;

        let modules: Arc<HashMap<String, String>> =
            Arc::new(embedded_modules(artifact).into_iter().collect());
        runtime.set_loader(
            BundleResolver {
                entry: id.script_name().to_string(),
                modules: modules.clone(),
            },
            BundleLoader { modules },
        );

        let exports = context.with(|ctx| -> Result<Vec<String>, ScriptException> {
            install_rejection_tracker(&ctx, &rejections);
            register_globals(&ctx, id.script_name(), self.context.clone())
                .catch(&ctx)
                .map_err(to_exception)?;

            let declared = Module::declare(ctx.clone(), id.as_str(), artifact)
                .catch(&ctx)
                .map_err(to_exception)?;
            let (module, promise) = declared.eval().catch(&ctx).map_err(to_exception)?;
            promise.finish::<()>().catch(&ctx).map_err(to_exception)?;

            let namespace = module.namespace().catch(&ctx).map_err(to_exception)?;
            let exports = namespace
                .keys::<String>()
                .collect::<rquickjs::Result<Vec<_>>>()
                .catch(&ctx)
                .map_err(to_exception)?;
            ctx.globals()
                .set(NAMESPACE_KEY, namespace)
                .catch(&ctx)
                .map_err(to_exception)?;

            Ok(exports)
        })?;

        tracing::debug!(module = %id, exports = ?exports, "Instantiated module");

        Ok(Box::new(QuickJsModule {
            exports,
            context,
            _runtime: runtime,
            rejections,
        }))
    }

    fn set_global_context(&self, context: serde_json::Value) {
        *self.context.write() = context;
    }
}

struct QuickJsModule {
    exports: Vec<String>,
    // Drop order: context, runtime, then the rejections the runtime reports to
    context: Context,
    _runtime: Runtime,
    rejections: Arc<Rejections>,
}

impl QuickJsModule {
    fn with_export<R>(
        &self,
        export: &str,
        f: impl for<'js> FnOnce(&rquickjs::Ctx<'js>, Value<'js>) -> Result<R, ScriptException>,
    ) -> Result<R, ScriptException> {
        self.context.with(|ctx| {
            let namespace: Object = ctx
                .globals()
                .get(NAMESPACE_KEY)
                .catch(&ctx)
                .map_err(to_exception)?;
            if !self.exports.iter().any(|e| e == export) {
                return Err(ScriptException::new(
                    format!("module has no export named '{}'", export),
                    "",
                )
                .with_name("ReferenceError"));
            }
            let value: Value = namespace.get(export).catch(&ctx).map_err(to_exception)?;
            f(&ctx, value)
        })
    }
}

impl ScriptModule for QuickJsModule {
    fn exports(&self) -> Vec<String> {
        self.exports.clone()
    }

    fn call(
        &self,
        export: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ScriptException> {
        self.with_export(export, |ctx, value| {
            let Some(function) = value.as_function().cloned() else {
                return Err(ScriptException::new(format!("'{}' is not a function", export), "")
                    .with_name("TypeError"));
            };

            let args = args
                .iter()
                .map(|arg| json_to_js(ctx, arg))
                .collect::<rquickjs::Result<Vec<_>>>()
                .catch(ctx)
                .map_err(to_exception)?;

            let result: Value = function.call((Rest(args),)).catch(ctx).map_err(to_exception)?;
            let result = match result.as_promise() {
                Some(promise) => {
                    let settled = promise.finish::<Value>();
                    self.rejections.observed(promise_key(&result));
                    settled.catch(ctx).map_err(to_exception)?
                }
                None => result,
            };
            while ctx.execute_pending_job() {}

            js_to_json(result).map_err(ScriptException::from)
        })
    }

    fn get(&self, export: &str) -> Result<serde_json::Value, ScriptException> {
        self.with_export(export, |_ctx, value| js_to_json(value).map_err(ScriptException::from))
    }

    fn take_unhandled_rejections(&self) -> Vec<ScriptException> {
        self.rejections.take()
    }
}
