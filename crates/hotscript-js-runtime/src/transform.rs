//! Artifact emission
//!
//! An artifact is the checked source, adjusted for its platform, between a
//! banner line and an inline source map:
//!
//! ```text
//! // hotscript:node utils/math.js
//! ...source...
//! //# sourceMappingURL=data:application/json;base64,...
//! ```
//!
//! Lines map one to one, shifted down by the banner.

use std::path::Path;

use hotscript_types::source_map::SourceMapBuilder;
use hotscript_types::{BuildDiagnostic, Platform};

const IMPORT_META_URL: &str = "import.meta.url";

#[derive(Debug, Clone)]
pub struct EmitOptions<'a> {
    pub platform: Platform,
    /// Name recorded as the map's source and in the banner
    pub display_name: &'a str,
    pub entry: &'a Path,
    pub sourcemap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Space,
    Word,
    Punct,
}

fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Space
    } else if c.is_alphanumeric() || c == '_' || c == '$' {
        CharClass::Word
    } else {
        CharClass::Punct
    }
}

/// Build the artifact text for `source`
pub fn emit_artifact(source: &str, options: &EmitOptions<'_>) -> Result<String, BuildDiagnostic> {
    let entry_url = serde_json::to_string(&format!("file://{}", options.entry.display()))
        .map_err(|e| BuildDiagnostic::backend(e.to_string()))?;
    let replacement = match options.platform {
        Platform::Node => Some(entry_url.as_str()),
        Platform::Browser => None,
    };

    let mut out = format!("// hotscript:{} {}\n", options.platform, options.display_name);
    let mut map = SourceMapBuilder::new(options.display_name).with_content(source);

    for (index, line) in source.split('\n').enumerate() {
        let generated_line = index as u32 + 1;
        let original_line = index as u32;

        let mut column = 0u32;
        let mut previous = CharClass::Space;
        let mut rest = line;
        let mut original_column = 0u32;

        while let Some(c) = rest.chars().next() {
            if let Some(literal) = replacement.filter(|_| starts_import_meta_url(line, rest)) {
                map.add(generated_line, column, original_line, original_column);
                out.push_str(literal);
                column += literal.chars().count() as u32;
                original_column += IMPORT_META_URL.len() as u32;
                rest = &rest[IMPORT_META_URL.len()..];
                previous = CharClass::Punct;
                continue;
            }

            let class = classify(c);
            if class == CharClass::Punct || (class == CharClass::Word && previous != CharClass::Word) {
                map.add(generated_line, column, original_line, original_column);
            }

            out.push(c);
            column += 1;
            original_column += 1;
            rest = &rest[c.len_utf8()..];
            previous = class;
        }

        out.push('\n');
    }

    if options.sourcemap {
        let comment = map
            .build()
            .to_inline_comment()
            .map_err(|e| BuildDiagnostic::backend(e.to_string()))?;
        out.push_str(&comment);
        out.push('\n');
    }

    Ok(out)
}

/// `rest` is a suffix of `line` starting with a standalone `import.meta.url`
fn starts_import_meta_url(line: &str, rest: &str) -> bool {
    if !rest.starts_with(IMPORT_META_URL) {
        return false;
    }
    let before = line[..line.len() - rest.len()].chars().next_back();
    let after = rest[IMPORT_META_URL.len()..].chars().next();
    let is_word = |c: Option<char>| c.is_some_and(|c| classify(c) == CharClass::Word);

    !is_word(before) && before != Some('.') && !is_word(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotscript_types::source_map::SourceMap;

    fn emit(source: &str, platform: Platform) -> String {
        let options = EmitOptions {
            platform,
            display_name: "index.js",
            entry: Path::new("/scripts/index.js"),
            sourcemap: true,
        };
        emit_artifact(source, &options).unwrap()
    }

    #[test]
    fn test_banner_and_map() {
        let artifact = emit("export const a = 1;\n", Platform::Browser);
        let mut lines = artifact.lines();
        assert_eq!(lines.next(), Some("// hotscript:browser index.js"));
        assert_eq!(lines.next(), Some("export const a = 1;"));

        let map = SourceMap::from_artifact(&artifact).unwrap().unwrap();
        assert_eq!(map.sources, vec![Some("index.js".to_string())]);

        // `a` on generated line 2 maps to line 1, column 13
        let pos = map.original_position_for(2, 13).unwrap().unwrap();
        assert_eq!((pos.line, pos.column), (1, 13));
        assert_eq!(pos.line_text, Some("export const a = 1;"));
    }

    #[test]
    fn test_node_rewrites_import_meta_url() {
        let source = "const url = import.meta.url; foo(x);";
        let artifact = emit(source, Platform::Node);
        assert!(artifact.contains("const url = \"file:///scripts/index.js\"; foo(x);"));

        let map = SourceMap::from_artifact(&artifact).unwrap().unwrap();
        // `foo` moved right by the literal's length minus the expression's
        let shift = "\"file:///scripts/index.js\"".len() - IMPORT_META_URL.len();
        let foo = source.find("foo").unwrap();
        let pos = map.original_position_for(2, (foo + shift) as u32).unwrap().unwrap();
        assert_eq!(pos.column, foo as u32);
    }

    #[test]
    fn test_browser_keeps_source() {
        let artifact = emit("const url = import.meta.url;", Platform::Browser);
        assert!(artifact.contains("const url = import.meta.url;"));
    }

    #[test]
    fn test_member_access_is_not_rewritten() {
        let artifact = emit("x.import.meta.url; import.meta.urls;", Platform::Node);
        assert!(artifact.contains("x.import.meta.url; import.meta.urls;"));
    }
}
