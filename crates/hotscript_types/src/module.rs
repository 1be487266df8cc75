//! Module Evaluation Seam
//!
//! Turning artifact text into something callable is the one place where
//! arbitrary code gets executed with host privileges. Everything that does so
//! goes through [`ModuleEvaluator`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// URL scheme of synthetic module identifiers
pub const MODULE_SCHEME: &str = "hotscript";

/// Unique identifier of one materialized module.
///
/// A fresh id is minted on every import. The id is used as the module's
/// file name, so it shows up in the stack frames of code the module defines;
/// runtime errors are attributed to scripts by looking for it in stack text.
/// That attribution is a heuristic: a stack that mentions the id in a message
/// string would match as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(script_name: &str) -> Self {
        Self(format!("{}://{}/{}", MODULE_SCHEME, Uuid::new_v4(), script_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the script the module was imported from
    pub fn script_name(&self) -> &str {
        split_module_url(&self.0).map_or("", |(_, path)| path)
    }

    /// `hotscript://<uuid>/`, the prefix shared by this module and every
    /// module it imports
    pub fn scope(&self) -> &str {
        split_module_url(&self.0).map_or(self.0.as_str(), |(scope, _)| scope)
    }

    /// Check whether a stack trace mentions this module or one it imported
    pub fn appears_in(&self, stack: &str) -> bool {
        stack.contains(self.scope())
    }
}

/// Split a module url into its scope and the script path inside it
pub fn split_module_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix(MODULE_SCHEME)?.strip_prefix("://")?;
    let slash = rest.find('/')?;
    Some(url.split_at(url.len() - rest.len() + slash + 1))
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value thrown by script code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptException {
    /// Error class, e.g. `ReferenceError`
    pub name: Option<String>,
    pub message: String,
    pub stack: String,
}

impl ScriptException {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: stack.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `Name: message`, or just the message when the class is unknown
    pub fn summary(&self) -> String {
        match &self.name {
            Some(name) if !self.message.starts_with(name.as_str()) => {
                format!("{}: {}", name, self.message)
            }
            _ => self.message.clone(),
        }
    }
}

impl std::fmt::Display for ScriptException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ScriptException {}

/// A materialized, callable module
pub trait ScriptModule: Send + Sync {
    /// Names of the module's exports
    fn exports(&self) -> Vec<String>;

    /// Call an exported function with JSON arguments
    fn call(&self, export: &str, args: &[serde_json::Value])
        -> Result<serde_json::Value, ScriptException>;

    /// Read a non-function export as JSON
    fn get(&self, export: &str) -> Result<serde_json::Value, ScriptException>;

    /// Promise rejections nothing handled since the last call, oldest first
    fn take_unhandled_rejections(&self) -> Vec<ScriptException> {
        Vec::new()
    }
}

/// Host facility that evaluates artifact text as a module.
///
/// Implementations execute untrusted text with the privileges of the host
/// process.
pub trait ModuleEvaluator: Send + Sync + 'static {
    fn instantiate(
        &self,
        id: &ModuleId,
        artifact: &str,
    ) -> Result<Box<dyn ScriptModule>, ScriptException>;

    /// Replace the value scripts read through the global scripting context
    fn set_global_context(&self, _context: serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_ids_are_unique() {
        let a = ModuleId::new("index.js");
        let b = ModuleId::new("index.js");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("hotscript://"));
        assert!(a.as_str().ends_with("/index.js"));
        assert_eq!(ModuleId::new("utils/math.js").script_name(), "utils/math.js");
    }

    #[test]
    fn test_appears_in_stack() {
        let id = ModuleId::new("utils/math.js");
        let stack = format!("    at add ({}:3:10)\n    at <eval> (host.js:1)", id);
        assert!(id.appears_in(&stack));
        assert!(!ModuleId::new("utils/math.js").appears_in(&stack));

        // Frames of imported modules share the scope
        let dependency = format!("    at tone ({}audio/synth.js:4:2)", id.scope());
        assert!(id.appears_in(&dependency));
    }

    #[test]
    fn test_split_module_url() {
        assert_eq!(
            split_module_url("hotscript://abc/audio/synth.js"),
            Some(("hotscript://abc/", "audio/synth.js"))
        );
        assert_eq!(split_module_url("file:///a.js"), None);
        assert_eq!(split_module_url("hotscript://abc"), None);
    }

    #[test]
    fn test_exception_summary() {
        let exc = ScriptException::new("x is not defined", "").with_name("ReferenceError");
        assert_eq!(exc.to_string(), "ReferenceError: x is not defined");

        let exc = ScriptException::new("TypeError: nope", "").with_name("TypeError");
        assert_eq!(exc.to_string(), "TypeError: nope");
    }
}
