//! Import specifier scanner.

use crate::transform::DependencyKind;
use rustc_hash::FxHashSet as HashSet;

/// An import specifier found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImport {
    /// Specifier exactly as written.
    pub specifier: String,
    pub kind: DependencyKind,
    /// 1-indexed line of the specifier.
    pub line: u32,
}

/// Scan source code for import/require specifiers.
///
/// Returns imports in first-appearance order, deduplicated by specifier.
/// Comments, string literals and regex literals are skipped, so
/// `"require('x')"` inside a string is not reported.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ScannedImport> {
    let mut scanner = Scanner {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
    };
    let mut results = Vec::new();
    let mut seen = HashSet::default();

    while let Some(c) = scanner.peek() {
        match c {
            '\n' => {
                scanner.line += 1;
                scanner.pos += 1;
            }
            '/' if scanner.peek_at(1) == Some('/') => scanner.skip_line_comment(),
            '/' if scanner.peek_at(1) == Some('*') => scanner.skip_block_comment(),
            '/' if scanner.regex_allowed() => scanner.skip_regex(),
            '"' | '\'' | '`' => {
                scanner.read_quoted();
            }
            _ if scanner.at_keyword("import") => {
                scanner.pos += "import".len();
                if let Some(found) = scanner.after_import() {
                    push_unique(&mut results, &mut seen, found);
                }
            }
            _ if scanner.at_keyword("export") => {
                scanner.pos += "export".len();
                if let Some(found) = scanner.after_export() {
                    push_unique(&mut results, &mut seen, found);
                }
            }
            _ if scanner.at_keyword("require") => {
                scanner.pos += "require".len();
                let line = scanner.line;
                if let Some(specifier) = scanner.call_argument() {
                    push_unique(
                        &mut results,
                        &mut seen,
                        ScannedImport {
                            specifier,
                            kind: DependencyKind::Require,
                            line,
                        },
                    );
                }
            }
            _ => scanner.pos += 1,
        }
    }

    results
}

fn push_unique(results: &mut Vec<ScannedImport>, seen: &mut HashSet<String>, found: ScannedImport) {
    if !found.specifier.is_empty() && seen.insert(found.specifier.clone()) {
        results.push(found);
    }
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Scanner {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn is_ident(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '$'
    }

    /// Keyword at the cursor with identifier boundaries on both sides.
    /// Property accesses like `foo.require(` are not keywords.
    fn at_keyword(&self, keyword: &str) -> bool {
        if self.pos > 0 {
            let prev = self.chars[self.pos - 1];
            if Self::is_ident(prev) || prev == '.' {
                return false;
            }
        }
        let mut end = self.pos;
        for expected in keyword.chars() {
            if self.chars.get(end) != Some(&expected) {
                return false;
            }
            end += 1;
        }
        !self.chars.get(end).copied().is_some_and(Self::is_ident)
    }

    /// Whether a `/` at the cursor starts a regex literal rather than a
    /// division, judged by the token before it.
    fn regex_allowed(&self) -> bool {
        const KEYWORDS: &[&str] = &[
            "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw",
            "case", "do", "else", "yield", "await",
        ];
        let mut end = self.pos;
        while end > 0 && self.chars[end - 1].is_whitespace() {
            end -= 1;
        }
        let Some(&prev) = end.checked_sub(1).and_then(|i| self.chars.get(i)) else {
            return true;
        };
        if Self::is_ident(prev) {
            let mut start = end;
            while start > 0 && Self::is_ident(self.chars[start - 1]) {
                start -= 1;
            }
            let word: String = self.chars[start..end].iter().collect();
            return KEYWORDS.contains(&word.as_str());
        }
        !matches!(prev, ')' | ']' | '"' | '\'' | '`')
    }

    /// Skip a regex literal and its flags. An unterminated literal stops at
    /// the end of the line.
    fn skip_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '\n' => return,
                '[' => {
                    in_class = true;
                    self.pos += 1;
                }
                ']' => {
                    in_class = false;
                    self.pos += 1;
                }
                '/' if !in_class => {
                    self.pos += 1;
                    while self.peek().is_some_and(Self::is_ident) {
                        self.pos += 1;
                    }
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            if c == '\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                self.pos += 2;
                return;
            }
            if c == '\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    /// Read a string literal at the cursor, returning its raw contents.
    fn read_quoted(&mut self) -> Option<String> {
        let quote = self.peek()?;
        if !matches!(quote, '"' | '\'' | '`') {
            return None;
        }
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '\n' if quote != '`' => return None,
                c if c == quote => {
                    let value: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    return Some(value);
                }
                c => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    self.pos += 1;
                }
            }
        }
        None
    }

    /// `(` string `)` after a callee. Template literals with substitutions
    /// are not static specifiers.
    fn call_argument(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.peek() != Some('(') {
            return None;
        }
        self.pos += 1;
        self.skip_whitespace();
        let is_template = self.peek() == Some('`');
        let value = self.read_quoted()?;
        if is_template && value.contains("${") {
            return None;
        }
        Some(value)
    }

    /// Everything after the `import` keyword.
    fn after_import(&mut self) -> Option<ScannedImport> {
        let line = self.line;
        self.skip_whitespace();
        match self.peek()? {
            '(' => {
                let specifier = self.call_argument()?;
                Some(ScannedImport {
                    specifier,
                    kind: DependencyKind::DynamicImport,
                    line,
                })
            }
            '.' => None, // import.meta
            '"' | '\'' => {
                let line = self.line;
                let specifier = self.read_quoted()?;
                Some(ScannedImport {
                    specifier,
                    kind: DependencyKind::Import,
                    line,
                })
            }
            _ => self.from_clause(DependencyKind::Import),
        }
    }

    /// Everything after `export`; only re-exports carry a specifier.
    fn after_export(&mut self) -> Option<ScannedImport> {
        self.skip_whitespace();
        match self.peek()? {
            '*' | '{' => self.from_clause(DependencyKind::Export),
            _ => None,
        }
    }

    /// Scan forward to `from "<specifier>"`, giving up at a statement end.
    fn from_clause(&mut self, kind: DependencyKind) -> Option<ScannedImport> {
        while let Some(c) = self.peek() {
            match c {
                ';' => return None,
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                '"' | '\'' | '`' => {
                    self.read_quoted();
                }
                _ if self.at_keyword("from") => {
                    self.pos += "from".len();
                    self.skip_whitespace();
                    let line = self.line;
                    let specifier = self.read_quoted()?;
                    return Some(ScannedImport {
                        specifier,
                        kind,
                        line,
                    });
                }
                _ => self.pos += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(source: &str) -> Vec<(String, DependencyKind)> {
        scan_imports(source)
            .into_iter()
            .map(|i| (i.specifier, i.kind))
            .collect()
    }

    #[test]
    fn test_quotes_inside_regex_literals() {
        let source = r#"
            var quote = /['"]/g;
            var slash = /[/"]+/;
            function strip(s) { return /^"/.test(s) ? s.slice(1) : s; }
            var dep = require('./after-regex');
        "#;
        assert_eq!(
            specs(source),
            vec![("./after-regex".to_string(), DependencyKind::Require)]
        );
    }

    #[test]
    fn test_division_is_not_a_regex() {
        let source = "var half = total / 2; var a = require('./a'); var q = (x) / y / z;\nrequire('./b');";
        let found: Vec<String> = specs(source).into_iter().map(|(s, _)| s).collect();
        assert_eq!(found, vec!["./a", "./b"]);
    }

    #[test]
    fn test_esm_import_from() {
        assert_eq!(
            specs(r#"import { foo } from "./dep";"#),
            vec![("./dep".to_string(), DependencyKind::Import)]
        );
    }

    #[test]
    fn test_esm_import_side_effect() {
        assert_eq!(
            specs(r#"import "./polyfill";"#),
            vec![("./polyfill".to_string(), DependencyKind::Import)]
        );
    }

    #[test]
    fn test_multiline_import_from() {
        let source = "import {\n  a,\n  b,\n} from './ab';\n";
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].specifier, "./ab");
        assert_eq!(imports[0].line, 4);
    }

    #[test]
    fn test_dynamic_import() {
        assert_eq!(
            specs(r#"const mod = await import("./dynamic");"#),
            vec![("./dynamic".to_string(), DependencyKind::DynamicImport)]
        );
    }

    #[test]
    fn test_template_dynamic_import_is_skipped() {
        assert!(specs("import(`./locale/${lang}`);").is_empty());
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        assert!(specs("if (import.meta.hot) {}").is_empty());
    }

    #[test]
    fn test_cjs_require() {
        assert_eq!(
            specs(r#"const dep = require("./dep");"#),
            vec![("./dep".to_string(), DependencyKind::Require)]
        );
    }

    #[test]
    fn test_member_require_is_ignored() {
        assert!(specs(r#"loader.require("./nope");"#).is_empty());
    }

    #[test]
    fn test_export_from() {
        assert_eq!(
            specs(r#"export * from "./a"; export { b } from './b'; export const c = 1;"#),
            vec![
                ("./a".to_string(), DependencyKind::Export),
                ("./b".to_string(), DependencyKind::Export),
            ]
        );
    }

    #[test]
    fn test_ignores_comments_and_strings() {
        let source = r#"
// import foo from "commented"
/* require("also-commented") */
const text = "require('in-a-string')";
import bar from "./real";
"#;
        assert_eq!(
            specs(source),
            vec![("./real".to_string(), DependencyKind::Import)]
        );
    }

    #[test]
    fn test_order_and_dedup() {
        let source = r#"
import a from "./a";
const b = require("./b");
import again from "./a";
"#;
        let found: Vec<String> = scan_imports(source).into_iter().map(|i| i.specifier).collect();
        assert_eq!(found, vec!["./a", "./b"]);
    }

    #[test]
    fn test_line_numbers() {
        let source = "\nimport a from \"./a\";\n\nconst b = require('./b');\n";
        let imports = scan_imports(source);
        assert_eq!(imports[0].line, 2);
        assert_eq!(imports[1].line, 4);
    }

    #[test]
    fn test_no_imports() {
        assert!(scan_imports("console.log('hello');").is_empty());
        assert!(scan_imports("").is_empty());
    }
}
