//! Shared State
//!
//! Keyed records with partial updates and subscriptions. A [`StateClass`]
//! holds every record of one schema; each [`SharedState`] is one attachment to
//! one record, owning the listeners registered through it.

mod store;

pub use store::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Record identifier, unique within its class
pub type StateId = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("State {0} not found")]
    NotFound(StateId),

    #[error("State {0} was deleted")]
    Deleted(StateId),
}

pub type StateResult<T> = Result<T, StateError>;

/// A record type with partial updates
pub trait Schema: Clone + Send + Sync + 'static {
    type Patch: Clone + Send + Sync + 'static;

    /// Apply every field the patch carries
    fn apply(&mut self, patch: &Self::Patch);

    /// A patch carrying every field, handed to immediate listeners
    fn as_patch(&self) -> Self::Patch;
}

/// Directory-level listing of the tracked scripts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalState {
    pub names: Vec<String>,
    pub name_ids: BTreeMap<String, StateId>,
}

impl InternalState {
    pub fn from_ids(name_ids: BTreeMap<String, StateId>) -> Self {
        Self {
            names: name_ids.keys().cloned().collect(),
            name_ids,
        }
    }
}

impl Schema for InternalState {
    type Patch = InternalState;

    fn apply(&mut self, patch: &Self::Patch) {
        *self = patch.clone();
    }

    fn as_patch(&self) -> Self::Patch {
        self.clone()
    }
}

/// Registered callback; call [`Subscription::unsubscribe`] to remove it
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
