//! Shell-style glob patterns
//!
//! Supported syntax: `*` (any sequence, including `/`), `?` (one character),
//! `[abc]`, `[a-z]`, `[!abc]` character classes, `{a,b}` alternatives and
//! `\` escapes. Patterns are compiled to anchored regular expressions.

use regex::Regex;
use thiserror::Error;

/// Glob compilation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GlobError {
    #[error("unclosed character class in glob pattern {0:?}")]
    UnclosedClass(String),

    #[error("unclosed alternative in glob pattern {0:?}")]
    UnclosedAlternative(String),

    #[error("dangling escape in glob pattern {0:?}")]
    DanglingEscape(String),

    #[error("invalid glob pattern {pattern:?}: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Compiled glob pattern
#[derive(Debug, Clone)]
pub struct Glob {
    regex: Regex,
}

impl Glob {
    /// Compile a glob pattern
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');

        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;
        let mut depth = 0usize;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '\\' => {
                    i += 1;
                    let escaped = chars
                        .get(i)
                        .ok_or_else(|| GlobError::DanglingEscape(pattern.to_string()))?;
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
                '[' => {
                    let end = chars[i + 1..]
                        .iter()
                        .skip(1)
                        .position(|&ch| ch == ']')
                        .map(|p| i + 2 + p)
                        .ok_or_else(|| GlobError::UnclosedClass(pattern.to_string()))?;
                    out.push('[');
                    let mut body = &chars[i + 1..end];
                    if let Some(('!' | '^', rest)) = body.split_first() {
                        out.push('^');
                        body = rest;
                    }
                    for &ch in body {
                        if matches!(ch, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(ch);
                    }
                    out.push(']');
                    i = end;
                }
                '{' => {
                    depth += 1;
                    out.push_str("(?:");
                }
                ',' if depth > 0 => out.push('|'),
                '}' if depth > 0 => {
                    depth -= 1;
                    out.push(')');
                }
                other => out.push_str(&regex::escape(&other.to_string())),
            }
            i += 1;
        }

        if depth > 0 {
            return Err(GlobError::UnclosedAlternative(pattern.to_string()));
        }
        out.push('$');

        let regex = Regex::new(&out).map_err(|e| GlobError::Invalid {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { regex })
    }

    /// Test a value against the pattern
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_crosses_separators() {
        let glob = Glob::new("/docs/*").unwrap();
        assert!(glob.is_match("/docs/"));
        assert!(glob.is_match("/docs/a/b/c.txt"));
        assert!(!glob.is_match("/other/a"));
    }

    #[test]
    fn test_host_wildcard() {
        let glob = Glob::new("*.example.com").unwrap();
        assert!(glob.is_match("files.example.com"));
        assert!(!glob.is_match("example.com"));
        assert!(!glob.is_match("files.example.org"));
    }

    #[test]
    fn test_literal_dots_are_escaped() {
        let glob = Glob::new("a.b").unwrap();
        assert!(glob.is_match("a.b"));
        assert!(!glob.is_match("axb"));
    }

    #[test]
    fn test_classes_and_alternatives() {
        let glob = Glob::new("/v[0-9]/{get,put}/?").unwrap();
        assert!(glob.is_match("/v1/get/x"));
        assert!(glob.is_match("/v9/put/y"));
        assert!(!glob.is_match("/vx/get/x"));
        assert!(!glob.is_match("/v1/delete/x"));

        let negated = Glob::new("[!a]b").unwrap();
        assert!(negated.is_match("cb"));
        assert!(!negated.is_match("ab"));
    }

    #[test]
    fn test_compile_errors() {
        assert_eq!(
            Glob::new("/docs/[abc").unwrap_err(),
            GlobError::UnclosedClass("/docs/[abc".to_string())
        );
        assert!(matches!(
            Glob::new("{a,b").unwrap_err(),
            GlobError::UnclosedAlternative(_)
        ));
        assert!(matches!(
            Glob::new("abc\\").unwrap_err(),
            GlobError::DanglingEscape(_)
        ));
    }
}
