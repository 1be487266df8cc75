//! Runtime Error Router
//!
//! Process-scoped set of live script handles. An error nobody caught is
//! offered to the handles in registration order; the first handle that
//! imported a module named in the stack records it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use hotscript_types::ScriptException;
use tracing::debug;

/// Something that can own a runtime error
pub trait ErrorSink: Send + Sync {
    fn script_name(&self) -> &str;

    /// Whether `stack` mentions a module this sink imported
    fn owns(&self, stack: &str) -> bool;

    fn report(&self, exception: &ScriptException);
}

#[derive(Clone, Default)]
pub struct RuntimeErrorRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    active: AtomicBool,
    next_token: AtomicU64,
    sinks: DashMap<u64, Weak<dyn ErrorSink>>,
}

impl RuntimeErrorRouter {
    /// A router that is not yet routing; see [`init`](Self::init)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
    }

    /// Stop routing and forget every registered sink
    pub fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.sinks.clear();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn register(&self, sink: Weak<dyn ErrorSink>) -> u64 {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        self.inner.sinks.insert(token, sink);
        token
    }

    pub fn unregister(&self, token: u64) {
        self.inner.sinks.remove(&token);
    }

    pub fn len(&self) -> usize {
        self.inner.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sinks.is_empty()
    }

    /// Attribute an uncaught error to the handle that produced it.
    ///
    /// Returns the owning script's name, or hands the exception back when no
    /// live handle owns it (or the router is inactive) so the host can apply
    /// its own policy.
    pub fn route(&self, exception: ScriptException) -> Result<String, ScriptException> {
        if !self.is_active() {
            return Err(exception);
        }

        // Snapshot first: sinks may detach while we report
        let mut sinks: Vec<(u64, Weak<dyn ErrorSink>)> = self
            .inner
            .sinks
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        sinks.sort_by_key(|(token, _)| *token);

        for (token, sink) in sinks {
            let Some(sink) = sink.upgrade() else {
                self.inner.sinks.remove(&token);
                continue;
            };
            if sink.owns(&exception.stack) {
                sink.report(&exception);
                debug!(script = %sink.script_name(), "Routed runtime error");
                return Ok(sink.script_name().to_string());
            }
        }

        Err(exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Sink {
        name: String,
        marker: String,
        reported: Mutex<Vec<String>>,
    }

    impl Sink {
        fn new(name: &str, marker: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                marker: marker.into(),
                reported: Mutex::new(Vec::new()),
            })
        }
    }

    impl ErrorSink for Sink {
        fn script_name(&self) -> &str {
            &self.name
        }

        fn owns(&self, stack: &str) -> bool {
            stack.contains(&self.marker)
        }

        fn report(&self, exception: &ScriptException) {
            self.reported.lock().push(exception.message.clone());
        }
    }

    fn register(router: &RuntimeErrorRouter, sink: &Arc<Sink>) -> u64 {
        let weak: Weak<dyn ErrorSink> = Arc::downgrade(sink) as Weak<dyn ErrorSink>;
        router.register(weak)
    }

    #[test]
    fn test_routes_to_first_owner() {
        let router = RuntimeErrorRouter::new();
        router.init();
        let a = Sink::new("a.js", "mod-a");
        let b = Sink::new("b.js", "mod-b");
        let also_b = Sink::new("b-again.js", "mod-b");
        register(&router, &a);
        register(&router, &b);
        register(&router, &also_b);

        let owner = router
            .route(ScriptException::new("boom", "    at f (mod-b:1:1)"))
            .unwrap();
        assert_eq!(owner, "b.js");
        assert_eq!(*b.reported.lock(), vec!["boom".to_string()]);
        assert!(a.reported.lock().is_empty());
        assert!(also_b.reported.lock().is_empty());
    }

    #[test]
    fn test_unattributable_errors_come_back() {
        let router = RuntimeErrorRouter::new();
        let a = Sink::new("a.js", "mod-a");
        register(&router, &a);

        let exception = ScriptException::new("boom", "    at f (mod-a:1:1)");
        // Inactive router routes nothing
        assert_eq!(router.route(exception.clone()), Err(exception.clone()));

        router.init();
        let foreign = ScriptException::new("other", "    at g (elsewhere:1:1)");
        assert_eq!(router.route(foreign.clone()), Err(foreign));
    }

    #[test]
    fn test_dropped_and_unregistered_sinks() {
        let router = RuntimeErrorRouter::new();
        router.init();
        let a = Sink::new("a.js", "mod");
        let token = register(&router, &a);
        let b = Sink::new("b.js", "mod");
        register(&router, &b);

        router.unregister(token);
        drop(b);
        assert!(router.route(ScriptException::new("x", "mod")).is_err());
        assert!(router.is_empty());

        router.shutdown();
        assert!(!router.is_active());
    }
}
