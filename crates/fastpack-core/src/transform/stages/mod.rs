//! Built-in stages.

pub mod command;
pub mod css;
pub mod file;
pub mod json;
pub mod passthrough;
pub mod sass;
pub mod script;
pub mod style;

use crate::sourcemap::{line_count, Mapping, SourceMap};

/// A map sending every output line to input line 0, for stages that wrap
/// their input into something with a different line structure.
pub(crate) fn collapsed_map(source: &str, output: &str) -> SourceMap {
    SourceMap {
        sources: vec![source.to_string()],
        sources_content: vec![None],
        mappings: (0..line_count(output))
            .map(|line| Mapping {
                gen_line: line,
                gen_col: 0,
                source: 0,
                src_line: 0,
                src_col: 0,
            })
            .collect(),
    }
}

/// JSON string literal, usable as a JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    // A JSON-encoded string never fails to serialize.
    let mut out = serde_json::to_string(s).unwrap_or_default();
    // U+2028/2029 are legal in JSON strings but end lines in older JS engines.
    if out.contains(['\u{2028}', '\u{2029}']) {
        out = out.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029");
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b\n"), r#""a\"b\n""#);
        assert_eq!(js_string("x\u{2028}y"), r#""x\u2028y""#);
    }

    #[test]
    fn test_collapsed_map() {
        let map = collapsed_map("/p/a.css", "one\ntwo\n");
        assert_eq!(map.mappings.len(), 2);
        assert!(map.mappings.iter().all(|m| m.src_line == 0));
    }
}
