//! Inline Source Maps
//!
//! Version 3 source maps, embedded in artifacts as a base64 `data:` URL in a
//! trailing `//# sourceMappingURL=` comment. Only what the backends emit and
//! the error locator reads is supported: `sources`, `sourcesContent`, `names`
//! and `mappings`. Index maps (`sections`) are not.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

const URL_COMMENT: &str = "//# sourceMappingURL=";
const DATA_PREFIX: &str = "data:application/json;";
const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug, thiserror::Error)]
pub enum SourceMapError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid mappings: {0}")]
    Mappings(String),

    #[error("Unsupported source map: {0}")]
    Unsupported(String),
}

pub type SourceMapResult<T> = Result<T, SourceMapError>;

// ─────────────────────────────────────────────────────────────────────────────
// Source Map
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub sources: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// One decoded mapping, all fields 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: u32,
    pub source: Option<u32>,
    pub original_line: u32,
    pub original_column: u32,
    pub name: Option<u32>,
}

/// Where a generated position came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition<'a> {
    /// `None` when the segment names no source or the source is `null`
    pub source: Option<&'a str>,
    /// 1-based
    pub line: u32,
    /// 0-based
    pub column: u32,
    pub name: Option<&'a str>,
    /// Text of the original line, when `sourcesContent` carries it
    pub line_text: Option<&'a str>,
}

impl SourceMap {
    /// Parse the source map embedded in an artifact, if any.
    ///
    /// The last `sourceMappingURL` comment wins. Comments pointing at external
    /// files are ignored.
    pub fn from_artifact(artifact: &str) -> SourceMapResult<Option<Self>> {
        let Some(url) = artifact
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix(URL_COMMENT))
        else {
            return Ok(None);
        };

        let Some(params) = url.trim().strip_prefix(DATA_PREFIX) else {
            return Ok(None);
        };
        let params = params.strip_prefix("charset=utf-8;").unwrap_or(params);
        let payload = params
            .strip_prefix("base64,")
            .ok_or_else(|| SourceMapError::Unsupported("data URL is not base64".into()))?;

        let json = STANDARD.decode(payload)?;
        let map: SourceMap = serde_json::from_slice(&json)?;
        if map.version != 3 {
            return Err(SourceMapError::Unsupported(format!("version {}", map.version)));
        }
        Ok(Some(map))
    }

    /// The trailing comment that embeds this map
    pub fn to_inline_comment(&self) -> SourceMapResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{}{}base64,{}", URL_COMMENT, DATA_PREFIX, STANDARD.encode(json)))
    }

    pub fn decode_mappings(&self) -> SourceMapResult<Vec<Vec<Segment>>> {
        decode_mappings(&self.mappings)
    }

    /// Map a generated position back to the original source.
    ///
    /// `line` is 1-based, `column` 0-based. The segment with the greatest
    /// generated column not after `column` is used; when the position lies
    /// before the first segment of its line, the first segment is used.
    pub fn original_position_for(
        &self,
        line: u32,
        column: u32,
    ) -> SourceMapResult<Option<OriginalPosition<'_>>> {
        let lines = self.decode_mappings()?;
        let Some(segments) = line.checked_sub(1).and_then(|l| lines.get(l as usize)) else {
            return Ok(None);
        };

        let mapped = segments
            .iter()
            .filter(|s| s.source.is_some())
            .take_while(|s| s.generated_column <= column)
            .last()
            .or_else(|| segments.iter().find(|s| s.source.is_some()));

        let Some(segment) = mapped else {
            return Ok(None);
        };

        let index = segment.source.map(|i| i as usize);
        let source = index
            .and_then(|i| self.sources.get(i))
            .and_then(|s| s.as_deref());
        let line_text = match (source, index) {
            (Some(_), Some(i)) => self.source_line(i, segment.original_line),
            _ => None,
        };

        Ok(Some(OriginalPosition {
            source,
            line: segment.original_line + 1,
            column: segment.original_column,
            name: segment
                .name
                .and_then(|n| self.names.get(n as usize))
                .map(String::as_str),
            line_text,
        }))
    }

    fn source_line(&self, source: usize, line: u32) -> Option<&str> {
        let content = self.sources_content.as_ref()?.get(source)?.as_deref()?;
        content
            .split('\n')
            .nth(line as usize)
            .map(|l| l.trim_end_matches('\r'))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates mappings for a single-source map
#[derive(Debug, Clone)]
pub struct SourceMapBuilder {
    source: String,
    content: Option<String>,
    lines: Vec<Vec<Segment>>,
}

impl SourceMapBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: None,
            lines: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Record that generated `(line, column)` came from original
    /// `(original_line, original_column)`. All values are 0-based.
    pub fn add(&mut self, line: u32, column: u32, original_line: u32, original_column: u32) {
        let line = line as usize;
        if self.lines.len() <= line {
            self.lines.resize_with(line + 1, Vec::new);
        }
        self.lines[line].push(Segment {
            generated_column: column,
            source: Some(0),
            original_line,
            original_column,
            name: None,
        });
    }

    pub fn build(mut self) -> SourceMap {
        for segments in &mut self.lines {
            segments.sort_by_key(|s| s.generated_column);
            segments.dedup_by_key(|s| s.generated_column);
        }

        SourceMap {
            version: 3,
            file: None,
            sources: vec![Some(self.source)],
            sources_content: self.content.map(|c| vec![Some(c)]),
            names: Vec::new(),
            mappings: encode_mappings(&self.lines),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mappings
// ─────────────────────────────────────────────────────────────────────────────

pub fn decode_mappings(mappings: &str) -> SourceMapResult<Vec<Vec<Segment>>> {
    let mut lines = Vec::new();
    // Fields other than the generated column are relative across lines
    let (mut source, mut original_line, mut original_column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for line in mappings.split(';') {
        let mut generated_column = 0i64;
        let mut segments = Vec::new();

        for raw in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq_fields(raw)?;
            generated_column += fields[0];

            let segment = match fields.len() {
                1 => Segment {
                    generated_column: to_u32(generated_column)?,
                    source: None,
                    original_line: 0,
                    original_column: 0,
                    name: None,
                },
                4 | 5 => {
                    source += fields[1];
                    original_line += fields[2];
                    original_column += fields[3];
                    let name = match fields.get(4) {
                        Some(delta) => {
                            name += delta;
                            Some(to_u32(name)?)
                        }
                        None => None,
                    };
                    Segment {
                        generated_column: to_u32(generated_column)?,
                        source: Some(to_u32(source)?),
                        original_line: to_u32(original_line)?,
                        original_column: to_u32(original_column)?,
                        name,
                    }
                }
                n => {
                    return Err(SourceMapError::Mappings(format!(
                        "segment '{}' has {} fields",
                        raw, n
                    )));
                }
            };
            segments.push(segment);
        }

        segments.sort_by_key(|s| s.generated_column);
        lines.push(segments);
    }

    Ok(lines)
}

pub fn encode_mappings(lines: &[Vec<Segment>]) -> String {
    let mut out = String::new();
    let (mut source, mut original_line, mut original_column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for (index, segments) in lines.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }
        let mut generated_column = 0i64;

        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            encode_vlq(segment.generated_column as i64 - generated_column, &mut out);
            generated_column = segment.generated_column as i64;

            let Some(src) = segment.source else {
                continue;
            };
            encode_vlq(src as i64 - source, &mut out);
            encode_vlq(segment.original_line as i64 - original_line, &mut out);
            encode_vlq(segment.original_column as i64 - original_column, &mut out);
            source = src as i64;
            original_line = segment.original_line as i64;
            original_column = segment.original_column as i64;

            if let Some(n) = segment.name {
                encode_vlq(n as i64 - name, &mut out);
                name = n as i64;
            }
        }
    }

    out
}

fn encode_vlq(value: i64, out: &mut String) {
    let mut vlq = if value < 0 {
        ((-value as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };

    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64_ALPHABET[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn decode_vlq_fields(segment: &str) -> SourceMapResult<Vec<i64>> {
    let mut fields = Vec::with_capacity(5);
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for byte in segment.bytes() {
        let digit = BASE64_ALPHABET
            .iter()
            .position(|&b| b == byte)
            .ok_or_else(|| SourceMapError::Mappings(format!("invalid character '{}'", byte as char)))?
            as u64;

        if shift > 60 {
            return Err(SourceMapError::Mappings(format!("overlong value in '{}'", segment)));
        }
        value |= (digit & 0b11111) << shift;

        if digit & 0b100000 != 0 {
            shift += 5;
            continue;
        }

        let magnitude = (value >> 1) as i64;
        fields.push(if value & 1 == 1 { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }

    if shift != 0 {
        return Err(SourceMapError::Mappings(format!("truncated segment '{}'", segment)));
    }
    Ok(fields)
}

fn to_u32(value: i64) -> SourceMapResult<u32> {
    u32::try_from(value).map_err(|_| SourceMapError::Mappings(format!("negative position {}", value)))
}
