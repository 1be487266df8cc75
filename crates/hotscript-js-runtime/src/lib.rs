//! Hotscript JavaScript Runtime
//!
//! The embedded QuickJS target of hotscript. It provides both halves of the
//! script pipeline that touch JavaScript:
//!
//! - [`QuickJsBackend`] watches an entry file and the scripts it imports,
//!   compiles each as an ES module to check it and emits an artifact with
//!   inline source maps and the dependencies embedded
//! - [`QuickJsEvaluator`] materializes artifacts as callable modules, each in
//!   its own QuickJS runtime
//!
//! Artifacts run with the privileges of the host process.

mod backend;
mod compile;
mod convert;
mod error;
mod evaluator;
mod globals;
mod imports;
mod transform;

pub use backend::QuickJsBackend;
pub use compile::check_syntax;
pub use error::{JsError, JsResult};
pub use evaluator::QuickJsEvaluator;
pub use transform::{emit_artifact, EmitOptions};
