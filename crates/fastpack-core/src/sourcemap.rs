//! Source Map V3 support.
//!
//! Line/column mappings with base64 VLQ encoding, a JSON codec, composition of
//! chained maps, and a builder used by the emitter to stitch per-module maps
//! into one bundle map.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// VLQ-encode a signed integer and append it to `out`.
pub fn vlq_encode(value: i64, out: &mut String) {
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation bit
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

fn b64_value(byte: u8) -> Option<u64> {
    match byte {
        b'A'..=b'Z' => Some(u64::from(byte - b'A')),
        b'a'..=b'z' => Some(u64::from(byte - b'a') + 26),
        b'0'..=b'9' => Some(u64::from(byte - b'0') + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Decode one VLQ value from the front of `input`, advancing it.
pub fn vlq_decode(input: &mut &[u8]) -> Option<i64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let (&byte, rest) = input.split_first()?;
        *input = rest;
        let digit = b64_value(byte)?;
        result |= (digit & 0x1f) << shift;
        if digit & 0x20 == 0 {
            break;
        }
        shift += 5;
        if shift > 60 {
            return None;
        }
    }
    #[allow(clippy::cast_possible_wrap)]
    let magnitude = (result >> 1) as i64;
    Some(if result & 1 == 1 { -magnitude } else { magnitude })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceMapError {
    #[error("invalid source map JSON: {0}")]
    Json(String),
    #[error("unsupported source map version {0}")]
    Version(u32),
    #[error("malformed mappings at segment {0}")]
    Mappings(usize),
}

/// One mapped position. All fields are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mapping {
    pub gen_line: u32,
    pub gen_col: u32,
    pub source: u32,
    pub src_line: u32,
    pub src_col: u32,
}

/// A decoded source map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    /// Sorted by generated position.
    pub mappings: Vec<Mapping>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    sources_content: Vec<Option<String>>,
    #[serde(default)]
    names: Vec<String>,
    mappings: String,
}

impl SourceMap {
    /// A map sending every line of `content` to the same line of `source`.
    #[must_use]
    pub fn identity(source: &str, content: &str) -> Self {
        let mappings = (0..line_count(content))
            .map(|line| Mapping {
                gen_line: line,
                gen_col: 0,
                source: 0,
                src_line: line,
                src_col: 0,
            })
            .collect();
        Self {
            sources: vec![source.to_string()],
            sources_content: vec![Some(content.to_string())],
            mappings,
        }
    }

    /// Parse a V3 source map document.
    pub fn from_json(json: &str) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap =
            serde_json::from_str(json).map_err(|e| SourceMapError::Json(e.to_string()))?;
        if raw.version != 3 {
            return Err(SourceMapError::Version(raw.version));
        }
        let mappings = decode_mappings(&raw.mappings)?;
        let mut sources_content = raw.sources_content;
        sources_content.resize(raw.sources.len(), None);
        Ok(Self {
            sources: raw.sources,
            sources_content,
            mappings,
        })
    }

    /// Serialize as a V3 document.
    #[must_use]
    pub fn to_json(&self, file: &str) -> String {
        let raw = RawSourceMap {
            version: 3,
            file: Some(file.to_string()),
            sources: self.sources.clone(),
            sources_content: self.sources_content.clone(),
            names: Vec::new(),
            mappings: encode_mappings(&self.mappings),
        };
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_string(&raw).unwrap_or_default()
    }

    /// The mapping covering a generated position: the last segment on
    /// `line` starting at or before `col`.
    #[must_use]
    pub fn lookup(&self, line: u32, col: u32) -> Option<&Mapping> {
        let start = self.mappings.partition_point(|m| m.gen_line < line);
        self.mappings[start..]
            .iter()
            .take_while(|m| m.gen_line == line)
            .filter(|m| m.gen_col <= col)
            .last()
    }

    /// Trace `self` (output of a later stage) through `earlier` (the map of
    /// that stage's input), producing a map to the original sources.
    /// Segments that land outside `earlier` are dropped.
    #[must_use]
    pub fn compose(&self, earlier: &SourceMap) -> SourceMap {
        let mappings = self
            .mappings
            .iter()
            .filter_map(|m| {
                let hit = earlier.lookup(m.src_line, m.src_col)?;
                Some(Mapping {
                    gen_line: m.gen_line,
                    gen_col: m.gen_col,
                    source: hit.source,
                    src_line: hit.src_line,
                    src_col: hit.src_col + (m.src_col - hit.gen_col),
                })
            })
            .collect();
        SourceMap {
            sources: earlier.sources.clone(),
            sources_content: earlier.sources_content.clone(),
            mappings,
        }
    }
}

/// Number of lines in `content`; a trailing newline does not start a line.
#[must_use]
pub fn line_count(content: &str) -> u32 {
    if content.is_empty() {
        return 0;
    }
    let newlines = content.bytes().filter(|&b| b == b'\n').count();
    let lines = if content.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    };
    u32::try_from(lines).unwrap_or(u32::MAX)
}

fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut line = 0;
    let mut prev_col: i64 = 0;
    let mut prev_source: i64 = 0;
    let mut prev_src_line: i64 = 0;
    let mut prev_src_col: i64 = 0;
    let mut first_on_line = true;

    for m in mappings {
        while line < m.gen_line {
            out.push(';');
            line += 1;
            prev_col = 0;
            first_on_line = true;
        }
        if !first_on_line {
            out.push(',');
        }
        first_on_line = false;
        vlq_encode(i64::from(m.gen_col) - prev_col, &mut out);
        vlq_encode(i64::from(m.source) - prev_source, &mut out);
        vlq_encode(i64::from(m.src_line) - prev_src_line, &mut out);
        vlq_encode(i64::from(m.src_col) - prev_src_col, &mut out);
        prev_col = i64::from(m.gen_col);
        prev_source = i64::from(m.source);
        prev_src_line = i64::from(m.src_line);
        prev_src_col = i64::from(m.src_col);
    }
    out
}

fn decode_mappings(encoded: &str) -> Result<Vec<Mapping>, SourceMapError> {
    let mut mappings = Vec::new();
    let mut prev_source: i64 = 0;
    let mut prev_src_line: i64 = 0;
    let mut prev_src_col: i64 = 0;
    let mut segment_index = 0;

    for (line, group) in encoded.split(';').enumerate() {
        let gen_line = u32::try_from(line).map_err(|_| SourceMapError::Mappings(segment_index))?;
        let mut prev_col: i64 = 0;
        for segment in group.split(',').filter(|s| !s.is_empty()) {
            let mut bytes = segment.as_bytes();
            let mut fields = [0i64; 5];
            let mut count = 0;
            while !bytes.is_empty() && count < 5 {
                fields[count] =
                    vlq_decode(&mut bytes).ok_or(SourceMapError::Mappings(segment_index))?;
                count += 1;
            }
            segment_index += 1;
            prev_col += fields[0];
            // Single-field segments map to nothing.
            if count < 4 {
                continue;
            }
            prev_source += fields[1];
            prev_src_line += fields[2];
            prev_src_col += fields[3];
            let field = |v: i64| u32::try_from(v).map_err(|_| SourceMapError::Mappings(segment_index));
            mappings.push(Mapping {
                gen_line,
                gen_col: field(prev_col)?,
                source: field(prev_source)?,
                src_line: field(prev_src_line)?,
                src_col: field(prev_src_col)?,
            });
        }
    }
    Ok(mappings)
}

/// Stitches module maps into one bundle map.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    mappings: Vec<Mapping>,
}

impl SourceMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its index. Re-registering a name
    /// returns the existing index.
    pub fn add_source(&mut self, path: &str, content: Option<&str>) -> u32 {
        if let Some(idx) = self.sources.iter().position(|s| s == path) {
            return idx as u32;
        }
        let idx = self.sources.len() as u32;
        self.sources.push(path.to_string());
        self.sources_content.push(content.map(str::to_string));
        idx
    }

    /// Copy `map` into the bundle with its generated lines shifted by
    /// `line_offset` and columns by `col_offset`.
    pub fn append(&mut self, map: &SourceMap, line_offset: u32, col_offset: u32) {
        let remap: Vec<u32> = map
            .sources
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let content = map.sources_content.get(i).and_then(Option::as_deref);
                self.add_source(name, content)
            })
            .collect();
        for m in &map.mappings {
            let Some(&source) = remap.get(m.source as usize) else {
                continue;
            };
            self.mappings.push(Mapping {
                gen_line: m.gen_line + line_offset,
                gen_col: m.gen_col + col_offset,
                source,
                src_line: m.src_line,
                src_col: m.src_col,
            });
        }
    }

    #[must_use]
    pub fn finish(mut self) -> SourceMap {
        self.mappings.sort();
        SourceMap {
            sources: self.sources,
            sources_content: self.sources_content,
            mappings: self.mappings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(gen_line: u32, gen_col: u32, src_line: u32, src_col: u32) -> Mapping {
        Mapping {
            gen_line,
            gen_col,
            source: 0,
            src_line,
            src_col,
        }
    }

    #[test]
    fn test_vlq_known_values() {
        let mut out = String::new();
        vlq_encode(0, &mut out);
        vlq_encode(1, &mut out);
        vlq_encode(-1, &mut out);
        vlq_encode(16, &mut out);
        assert_eq!(out, "ACDgB");
    }

    #[test]
    fn test_vlq_decode_large_and_negative() {
        for value in [0, 15, 16, -17, 1234, -98765] {
            let mut out = String::new();
            vlq_encode(value, &mut out);
            let mut bytes = out.as_bytes();
            assert_eq!(vlq_decode(&mut bytes), Some(value));
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn test_vlq_decode_rejects_garbage() {
        let mut bytes: &[u8] = b"!";
        assert_eq!(vlq_decode(&mut bytes), None);
        let mut truncated: &[u8] = b"g";
        assert_eq!(vlq_decode(&mut truncated), None);
    }

    #[test]
    fn test_identity_map() {
        let map = SourceMap::identity("a.js", "one\ntwo\nthree\n");
        assert_eq!(map.mappings.len(), 3);
        assert_eq!(map.mappings[2], m(2, 0, 2, 0));
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("x"), 1);
    }

    #[test]
    fn test_json_encoding_matches_reference() {
        let map = SourceMap {
            sources: vec!["a.js".into()],
            sources_content: vec![None],
            mappings: vec![m(0, 0, 0, 0), m(0, 4, 0, 4), m(2, 0, 1, 0)],
        };
        let json = map.to_json("out.js");
        assert!(json.contains(r#""mappings":"AAAA,IAAI;;AACJ""#), "{json}");
        let parsed = SourceMap::from_json(&json).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn test_from_json_rejects_other_versions() {
        let err = SourceMap::from_json(r#"{"version":2,"sources":[],"mappings":""}"#).unwrap_err();
        assert_eq!(err, SourceMapError::Version(2));
    }

    #[test]
    fn test_lookup_picks_closest_preceding_segment() {
        let map = SourceMap {
            sources: vec!["a".into()],
            sources_content: vec![None],
            mappings: vec![m(0, 0, 5, 0), m(0, 10, 6, 0), m(1, 2, 7, 0)],
        };
        assert_eq!(map.lookup(0, 9).unwrap().src_line, 5);
        assert_eq!(map.lookup(0, 10).unwrap().src_line, 6);
        assert!(map.lookup(1, 1).is_none());
        assert!(map.lookup(3, 0).is_none());
    }

    #[test]
    fn test_compose_traces_through_earlier_map() {
        // earlier: intermediate line 0 <- original line 3
        let earlier = SourceMap {
            sources: vec!["orig.ts".into()],
            sources_content: vec![Some("...".into())],
            mappings: vec![m(0, 0, 3, 0), m(1, 0, 4, 0)],
        };
        // later: output line 2 <- intermediate line 1
        let later = SourceMap {
            sources: vec!["intermediate".into()],
            sources_content: vec![None],
            mappings: vec![m(2, 0, 1, 0), m(5, 0, 9, 0)],
        };
        let composed = later.compose(&earlier);
        assert_eq!(composed.sources, vec!["orig.ts".to_string()]);
        assert_eq!(composed.mappings, vec![m(2, 0, 4, 0)]);
    }

    #[test]
    fn test_builder_offsets_and_dedupes_sources() {
        let mut builder = SourceMapBuilder::new();
        builder.append(&SourceMap::identity("a.js", "x\ny\n"), 3, 0);
        builder.append(&SourceMap::identity("b.js", "z\n"), 10, 2);
        builder.append(&SourceMap::identity("a.js", "x\ny\n"), 20, 0);
        let map = builder.finish();
        assert_eq!(map.sources, vec!["a.js".to_string(), "b.js".to_string()]);
        assert_eq!(map.mappings[0], m(3, 0, 0, 0));
        assert_eq!(
            map.mappings[2],
            Mapping {
                gen_line: 10,
                gen_col: 2,
                source: 1,
                src_line: 0,
                src_col: 0
            }
        );
        assert_eq!(map.mappings.len(), 5);
    }
}
