//! Static imports
//!
//! Finds the specifiers of `import ... from '...'`, `import '...'` and
//! `export ... from '...'` declarations and resolves them to scripts under
//! the root. Dynamic `import()` is left to the runtime.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use hotscript_types::bundle::join_relative;
use regex::Regex;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:import\s*(?:[\w$*{}\s,]+?\s*from\s*)?|export\s*(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s*)["']([^"'\n]+)["']"#,
    )
    .expect("import pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StaticImport {
    pub specifier: String,
    /// 1-based line of the specifier's opening quote
    pub line: u32,
    /// 0-based column of the specifier's opening quote
    pub column: u32,
}

pub(crate) fn static_imports(source: &str) -> Vec<StaticImport> {
    STATIC_IMPORT
        .captures_iter(source)
        .filter_map(|captures| {
            let specifier = captures.get(1)?;
            let quote = specifier.start().saturating_sub(1);
            let before = &source[..quote];
            let line_start = before.rfind('\n').map_or(0, |i| i + 1);
            Some(StaticImport {
                specifier: specifier.as_str().to_string(),
                line: before.matches('\n').count() as u32 + 1,
                column: before[line_start..].chars().count() as u32,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Found { name: String, path: PathBuf },
    /// Paths that would have satisfied the import, had they existed
    Missing { candidates: Vec<PathBuf> },
}

/// Resolve `specifier` as imported by the script `importer`.
///
/// Only relative specifiers resolve. A name without a match is retried with
/// the `.js` extension.
pub(crate) fn resolve(root: &Path, importer: &str, specifier: &str) -> Resolution {
    let Some(name) = join_relative(importer, specifier) else {
        return Resolution::Missing { candidates: Vec::new() };
    };

    let mut candidates = vec![name.clone()];
    if !name.ends_with(".js") {
        candidates.push(format!("{}.js", name));
    }

    for candidate in &candidates {
        let path = root.join(candidate);
        if path.is_file() {
            return Resolution::Found {
                name: candidate.clone(),
                path,
            };
        }
    }

    Resolution::Missing {
        candidates: candidates.iter().map(|c| root.join(c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn specifiers(source: &str) -> Vec<String> {
        static_imports(source).into_iter().map(|i| i.specifier).collect()
    }

    #[test]
    fn test_finds_static_forms() {
        let source = r#"import SimpleSynth from './audio/SimpleSynth.js';
import { a, b as c } from "./lib.js";
import * as ns from './ns.js';
import './side-effect.js';
import def, {
  x,
} from './multi.js';
export { tone } from './tone.js';
export * as all from './all.js';
const later = import('./lazy.js');
export const s = "./not-an-import.js";
"#;
        assert_eq!(
            specifiers(source),
            vec![
                "./audio/SimpleSynth.js",
                "./lib.js",
                "./ns.js",
                "./side-effect.js",
                "./multi.js",
                "./tone.js",
                "./all.js",
            ]
        );
    }

    #[test]
    fn test_reports_quote_position() {
        let imports = static_imports("const a = 1;\n  import x from './x.js';\n");
        assert_eq!(imports.len(), 1);
        assert_eq!((imports[0].line, imports[0].column), (2, 16));
    }

    #[test]
    fn test_resolve_under_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("audio")).unwrap();
        std::fs::write(dir.path().join("audio/synth.js"), "").unwrap();

        assert_eq!(
            resolve(dir.path(), "main.js", "./audio/synth.js"),
            Resolution::Found {
                name: "audio/synth.js".into(),
                path: dir.path().join("audio/synth.js"),
            }
        );
        assert_eq!(
            resolve(dir.path(), "main.js", "./audio/synth"),
            Resolution::Found {
                name: "audio/synth.js".into(),
                path: dir.path().join("audio/synth.js"),
            }
        );
        assert_eq!(
            resolve(dir.path(), "main.js", "./gone"),
            Resolution::Missing {
                candidates: vec![dir.path().join("gone"), dir.path().join("gone.js")],
            }
        );
        assert_eq!(
            resolve(dir.path(), "main.js", "lodash"),
            Resolution::Missing { candidates: Vec::new() }
        );
    }
}
