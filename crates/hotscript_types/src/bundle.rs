//! Bundled Dependencies
//!
//! An artifact carries the modules its entry imports as trailing comment
//! lines, one per module, after the entry's own source map:
//!
//! ```text
//! //# hotscript-module audio/synth.js <base64 artifact>
//! ```
//!
//! Every embedded module is a complete artifact with its own banner and
//! inline map. Module names are paths relative to the scripts root.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const MODULE_COMMENT: &str = "//# hotscript-module ";

/// Append `module` to `artifact` under `name`
pub fn embed_module(artifact: &mut String, name: &str, module: &str) {
    if !artifact.is_empty() && !artifact.ends_with('\n') {
        artifact.push('\n');
    }
    artifact.push_str(MODULE_COMMENT);
    artifact.push_str(name);
    artifact.push(' ');
    artifact.push_str(&STANDARD.encode(module));
    artifact.push('\n');
}

/// Every module embedded in `artifact`, in the order they were embedded.
/// Lines that do not decode are skipped.
pub fn embedded_modules(artifact: &str) -> Vec<(String, String)> {
    artifact
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix(MODULE_COMMENT)?;
            let (name, payload) = rest.rsplit_once(' ')?;
            let bytes = STANDARD.decode(payload.trim()).ok()?;
            Some((name.to_string(), String::from_utf8(bytes).ok()?))
        })
        .collect()
}

pub fn embedded_module(artifact: &str, name: &str) -> Option<String> {
    embedded_modules(artifact)
        .into_iter()
        .find(|(embedded, _)| embedded == name)
        .map(|(_, module)| module)
}

/// Resolve a relative `specifier` against the module `importer`, both named
/// relative to the scripts root.
///
/// Returns `None` for bare specifiers and for paths that climb out of the
/// root.
pub fn join_relative(importer: &str, specifier: &str) -> Option<String> {
    if !(specifier.starts_with("./") || specifier.starts_with("../")) {
        return None;
    }

    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }

    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_modules_keep_order() {
        let mut artifact = "// hotscript:node main.js\nimport './a.js';\n".to_string();
        embed_module(&mut artifact, "a.js", "export const a = 1;\n");
        embed_module(&mut artifact, "lib/b c.js", "export const b = 2;\n");

        let modules = embedded_modules(&artifact);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0], ("a.js".into(), "export const a = 1;\n".into()));
        assert_eq!(modules[1].0, "lib/b c.js");
        assert_eq!(embedded_module(&artifact, "lib/b c.js").as_deref(), Some("export const b = 2;\n"));
        assert_eq!(embedded_module(&artifact, "missing.js"), None);
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("main.js", "./audio/synth.js").as_deref(), Some("audio/synth.js"));
        assert_eq!(join_relative("scenes/a.js", "../lib/./b.js").as_deref(), Some("lib/b.js"));
        assert_eq!(join_relative("scenes/a.js", "./b").as_deref(), Some("scenes/b"));
        assert_eq!(join_relative("main.js", "../outside.js"), None);
        assert_eq!(join_relative("main.js", "lodash"), None);
        assert_eq!(join_relative("main.js", "/etc/passwd"), None);
    }
}
