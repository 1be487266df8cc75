//! Hotscript Types - shared data structures and seams
//!
//! This crate holds the plain data that flows between the build backends, the
//! module evaluator and the script registry, plus the traits those pieces are
//! plugged in through. It has no runtime of its own.

mod build;
pub mod bundle;
mod diagnostic;
mod module;
mod name;
mod platform;
pub mod source_map;

pub use build::*;
pub use diagnostic::*;
pub use module::*;
pub use name::*;
pub use platform::*;
