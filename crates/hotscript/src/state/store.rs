//! In-process state store
//!
//! Writes are applied under the class lock; listeners run after it is
//! released, from a snapshot of the listener list, so they may call back into
//! the store. Delivery for one class is serialized, so every listener sees
//! updates in the order they were applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};

use super::{Schema, StateError, StateId, StateResult, Subscription};

type UpdateFn<S> = Arc<dyn Fn(&<S as Schema>::Patch, &S) + Send + Sync>;
type HookFn<S> = Arc<dyn Fn(&<S as Schema>::Patch, &S) -> Option<<S as Schema>::Patch> + Send + Sync>;
type ObserverFn<S> = Arc<dyn Fn(StateId, Option<&S>) + Send + Sync>;
type DetachFn = Box<dyn FnOnce() + Send + Sync>;

struct Listener<S: Schema> {
    id: u64,
    attachment: u64,
    callback: UpdateFn<S>,
}

struct Entry<S: Schema> {
    value: S,
    listeners: Vec<Listener<S>>,
    on_detach: Vec<(u64, DetachFn)>,
}

struct ClassInner<S: Schema> {
    entries: RwLock<HashMap<StateId, Entry<S>>>,
    hooks: RwLock<Vec<HookFn<S>>>,
    observers: RwLock<Vec<(u64, ObserverFn<S>)>>,
    dispatch: ReentrantMutex<()>,
    next_state: AtomicU64,
    next_token: AtomicU64,
}

impl<S: Schema> ClassInner<S> {
    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn notify_observers(&self, id: StateId, value: Option<&S>) {
        let observers: Vec<_> = self.observers.read().iter().map(|(_, f)| f.clone()).collect();
        for observer in observers {
            observer(id, value);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State Class
// ─────────────────────────────────────────────────────────────────────────────

/// All records of one schema
pub struct StateClass<S: Schema> {
    inner: Arc<ClassInner<S>>,
}

impl<S: Schema> Clone for StateClass<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Schema> Default for StateClass<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Schema> StateClass<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClassInner {
                entries: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                observers: RwLock::new(Vec::new()),
                dispatch: ReentrantMutex::new(()),
                next_state: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Create a record and attach to it
    pub fn create(&self, initial: S) -> SharedState<S> {
        let id = self.inner.next_state.fetch_add(1, Ordering::Relaxed);
        let _dispatch = self.inner.dispatch.lock();

        self.inner.entries.write().insert(
            id,
            Entry {
                value: initial.clone(),
                listeners: Vec::new(),
                on_detach: Vec::new(),
            },
        );
        self.inner.notify_observers(id, Some(&initial));

        self.attachment(id)
    }

    /// Attach to an existing record
    pub fn attach(&self, id: StateId) -> StateResult<SharedState<S>> {
        if !self.inner.entries.read().contains_key(&id) {
            return Err(StateError::NotFound(id));
        }
        Ok(self.attachment(id))
    }

    fn attachment(&self, id: StateId) -> SharedState<S> {
        SharedState {
            class: self.clone(),
            id,
            attachment: self.inner.token(),
        }
    }

    pub fn get(&self, id: StateId) -> Option<S> {
        self.inner.entries.read().get(&id).map(|e| e.value.clone())
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.inner.entries.read().contains_key(&id)
    }

    /// Snapshot of every record, ordered by id
    pub fn values(&self) -> Vec<(StateId, S)> {
        let mut values: Vec<_> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(id, e)| (*id, e.value.clone()))
            .collect();
        values.sort_by_key(|(id, _)| *id);
        values
    }

    /// Register a hook that may rewrite incoming patches.
    ///
    /// Hooks run in registration order, under the class lock, and receive the
    /// record as it is before the patch. They must not call into this class.
    pub fn register_update_hook(
        &self,
        hook: impl Fn(&S::Patch, &S) -> Option<S::Patch> + Send + Sync + 'static,
    ) {
        self.inner.hooks.write().push(Arc::new(hook));
    }

    /// Observe every record of the class. The callback receives `None` when a
    /// record is deleted.
    pub fn observe(
        &self,
        observer: impl Fn(StateId, Option<&S>) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.inner.token();
        self.inner.observers.write().push((token, Arc::new(observer)));

        let weak: Weak<ClassInner<S>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.write().retain(|(t, _)| *t != token);
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared State
// ─────────────────────────────────────────────────────────────────────────────

/// One attachment to a record
pub struct SharedState<S: Schema> {
    class: StateClass<S>,
    id: StateId,
    attachment: u64,
}

impl<S: Schema> std::fmt::Debug for SharedState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("id", &self.id)
            .field("attachment", &self.attachment)
            .finish()
    }
}

impl<S: Schema> SharedState<S> {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn class(&self) -> &StateClass<S> {
        &self.class
    }

    pub fn get(&self) -> StateResult<S> {
        self.class.get(self.id).ok_or(StateError::Deleted(self.id))
    }

    /// Borrow the record without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> StateResult<R> {
        let entries = self.class.inner.entries.read();
        let entry = entries.get(&self.id).ok_or(StateError::Deleted(self.id))?;
        Ok(f(&entry.value))
    }

    pub fn is_deleted(&self) -> bool {
        !self.class.contains(self.id)
    }

    /// Apply `patch` as one update
    pub fn set(&self, patch: S::Patch) -> StateResult<()> {
        let inner = &self.class.inner;
        let _dispatch = inner.dispatch.lock();
        let hooks: Vec<_> = inner.hooks.read().clone();

        let (patch, value, listeners) = {
            let mut entries = inner.entries.write();
            let entry = entries.get_mut(&self.id).ok_or(StateError::Deleted(self.id))?;

            let mut patch = patch;
            for hook in &hooks {
                if let Some(rewritten) = hook(&patch, &entry.value) {
                    patch = rewritten;
                }
            }
            entry.value.apply(&patch);

            let listeners: Vec<_> = entry.listeners.iter().map(|l| l.callback.clone()).collect();
            (patch, entry.value.clone(), listeners)
        };

        for listener in listeners {
            listener(&patch, &value);
        }
        inner.notify_observers(self.id, Some(&value));

        Ok(())
    }

    /// Listen for updates; with `immediately` the callback also runs once now
    /// with the whole record
    pub fn on_update(
        &self,
        callback: impl Fn(&S::Patch, &S) + Send + Sync + 'static,
        immediately: bool,
    ) -> StateResult<Subscription> {
        let inner = &self.class.inner;
        let callback: UpdateFn<S> = Arc::new(callback);
        let token = inner.token();

        let current = {
            let mut entries = inner.entries.write();
            let entry = entries.get_mut(&self.id).ok_or(StateError::Deleted(self.id))?;
            entry.listeners.push(Listener {
                id: token,
                attachment: self.attachment,
                callback: callback.clone(),
            });
            immediately.then(|| entry.value.clone())
        };

        if let Some(value) = current {
            let _dispatch = inner.dispatch.lock();
            callback(&value.as_patch(), &value);
        }

        let weak = Arc::downgrade(inner);
        let id = self.id;
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(entry) = inner.entries.write().get_mut(&id) {
                    entry.listeners.retain(|l| l.id != token);
                }
            }
        }))
    }

    /// Run `callback` when this attachment ends, through [`detach`](Self::detach)
    /// or because the record was deleted
    pub fn on_detach(&self, callback: impl FnOnce() + Send + Sync + 'static) -> StateResult<()> {
        let mut entries = self.class.inner.entries.write();
        let entry = entries.get_mut(&self.id).ok_or(StateError::Deleted(self.id))?;
        entry.on_detach.push((self.attachment, Box::new(callback)));
        Ok(())
    }

    /// End this attachment: remove its listeners and run its detach
    /// callbacks. The record and other attachments are unaffected.
    pub fn detach(&self) {
        let callbacks = {
            let mut entries = self.class.inner.entries.write();
            let Some(entry) = entries.get_mut(&self.id) else {
                return;
            };
            entry.listeners.retain(|l| l.attachment != self.attachment);

            let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.on_detach)
                .into_iter()
                .partition(|(attachment, _)| *attachment == self.attachment);
            entry.on_detach = others;
            mine
        };

        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Delete the record, ending every attachment to it
    pub fn delete(&self) -> StateResult<()> {
        let inner = &self.class.inner;
        let _dispatch = inner.dispatch.lock();

        let entry = inner
            .entries
            .write()
            .remove(&self.id)
            .ok_or(StateError::Deleted(self.id))?;

        for (_, callback) in entry.on_detach {
            callback();
        }
        inner.notify_observers(self.id, None);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        a: i32,
        b: i32,
    }

    #[derive(Debug, Clone, Default)]
    struct CounterPatch {
        a: Option<i32>,
        b: Option<i32>,
    }

    impl Schema for Counter {
        type Patch = CounterPatch;

        fn apply(&mut self, patch: &CounterPatch) {
            if let Some(a) = patch.a {
                self.a = a;
            }
            if let Some(b) = patch.b {
                self.b = b;
            }
        }

        fn as_patch(&self) -> CounterPatch {
            CounterPatch {
                a: Some(self.a),
                b: Some(self.b),
            }
        }
    }

    #[test]
    fn test_set_is_multi_field() {
        let class = StateClass::<Counter>::new();
        let state = class.create(Counter::default());
        let other = class.attach(state.id()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        other
            .on_update(move |_, value| sink.lock().push(value.clone()), false)
            .unwrap();

        state
            .set(CounterPatch {
                a: Some(1),
                b: Some(2),
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![Counter { a: 1, b: 2 }]);
        assert_eq!(other.get().unwrap(), Counter { a: 1, b: 2 });
    }

    #[test]
    fn test_immediate_listener_gets_whole_record() {
        let class = StateClass::<Counter>::new();
        let state = class.create(Counter { a: 3, b: 4 });

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        state
            .on_update(move |patch, _| *sink.lock() = Some((patch.a, patch.b)), true)
            .unwrap();

        assert_eq!(*seen.lock(), Some((Some(3), Some(4))));
    }

    #[test]
    fn test_detach_removes_only_own_listeners() {
        let class = StateClass::<Counter>::new();
        let first = class.create(Counter::default());
        let second = class.attach(first.id()).unwrap();

        let calls = Arc::new(AtomicU64::new(0));
        for state in [&first, &second] {
            let calls = calls.clone();
            state
                .on_update(move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }, false)
                .unwrap();
        }

        let detached = Arc::new(AtomicU64::new(0));
        let flag = detached.clone();
        second
            .on_detach(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        second.detach();
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        first.set(CounterPatch { a: Some(1), b: None }).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!second.is_deleted());
    }

    #[test]
    fn test_delete_ends_every_attachment() {
        let class = StateClass::<Counter>::new();
        let first = class.create(Counter::default());
        let second = class.attach(first.id()).unwrap();

        let detached = Arc::new(AtomicU64::new(0));
        for state in [&first, &second] {
            let flag = detached.clone();
            state
                .on_detach(move || {
                    flag.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        first.delete().unwrap();
        assert_eq!(detached.load(Ordering::SeqCst), 2);
        assert_eq!(
            second.set(CounterPatch::default()),
            Err(StateError::Deleted(first.id()))
        );
        assert!(matches!(class.attach(first.id()), Err(StateError::NotFound(_))));
    }

    #[test]
    fn test_update_hook_rewrites_patch() {
        let class = StateClass::<Counter>::new();
        class.register_update_hook(|patch: &CounterPatch, current: &Counter| {
            patch.a.map(|a| CounterPatch {
                a: Some(a),
                b: Some(current.b + a),
            })
        });

        let state = class.create(Counter { a: 0, b: 10 });
        state.set(CounterPatch { a: Some(5), b: None }).unwrap();
        assert_eq!(state.get().unwrap(), Counter { a: 5, b: 15 });
    }

    #[test]
    fn test_listener_may_reenter_store() {
        let class = StateClass::<Counter>::new();
        let state = Arc::new(class.create(Counter::default()));

        let inner = state.clone();
        state
            .on_update(
                move |patch, _| {
                    if patch.a == Some(1) {
                        inner.set(CounterPatch { a: None, b: Some(2) }).unwrap();
                    }
                },
                false,
            )
            .unwrap();

        state.set(CounterPatch { a: Some(1), b: None }).unwrap();
        assert_eq!(state.get().unwrap(), Counter { a: 1, b: 2 });
    }

    #[test]
    fn test_observe_and_unsubscribe() {
        let class = StateClass::<Counter>::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = class.observe(move |id, value| sink.lock().push((id, value.is_some())));

        let state = class.create(Counter::default());
        state.set(CounterPatch::default()).unwrap();
        state.delete().unwrap();
        subscription.unsubscribe();
        class.create(Counter::default());

        let id = state.id();
        assert_eq!(*events.lock(), vec![(id, true), (id, true), (id, false)]);
        assert_eq!(class.values().len(), 1);
    }
}
