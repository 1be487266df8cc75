//! Hotscript
//!
//! Treats a directory of JavaScript files as a set of live modules. Every
//! file is rebuilt for the browser and node platforms whenever it changes,
//! and the paired results are published as one record per script that any
//! number of handles can attach to.
//!
//! # Architecture
//!
//! - [`fs_tree`] watches the scripts directory and emits create/update/delete events
//! - [`build`] runs one watch-mode pipeline per platform and publishes a
//!   script's builds only when both pipelines agree on the round
//! - [`registry`] maps script names to records and pipelines and follows the tree
//! - [`handle`] is what consumers attach; it imports artifacts as modules
//! - [`router`] attributes runtime errors to the handle whose module threw them
//! - [`locate`] resolves a stack trace to a source position through the inline map
//! - [`report`] logs diagnostics as they change

pub mod build;
pub mod config;
pub mod error;
pub mod fs_tree;
pub mod handle;
pub mod locate;
pub mod registry;
pub mod report;
pub mod router;
pub mod script;
pub mod state;

pub use config::{ConfigError, ScriptingConfig};
pub use error::{ScriptingError, ScriptingResult};
pub use handle::{LoadedModule, ScriptHandle};
pub use registry::{ScriptRegistry, SwitchTarget};
pub use report::DiagnosticReporter;
pub use router::RuntimeErrorRouter;
pub use script::{ScriptPatch, ScriptRecord};
