//! Branch, tag and path patterns
//!
//! `*` matches within one path segment, `**` across segments and `?` one
//! character other than `/`. An empty pattern, `*` and `**` match anything.

use regex::Regex;

use crate::errors::EngineError;

#[derive(Debug, Clone)]
enum Matcher {
    Any,
    Exact(String),
    Glob(Regex),
}

/// Compiled ref pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    matcher: Matcher,
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Translate a glob to an anchored regex
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    // `**/` also matches zero directories
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

impl Pattern {
    pub fn compile(pattern: Option<&str>) -> Result<Self, EngineError> {
        let raw = pattern.map(str::trim).unwrap_or_default().to_string();
        let matcher = match raw.as_str() {
            "" | "*" | "**" => Matcher::Any,
            p if is_glob(p) => Matcher::Glob(Regex::new(&glob_to_regex(p)).map_err(|e| {
                EngineError::ValidationError(format!("Invalid pattern {}: {}", p, e))
            })?),
            p => Matcher::Exact(p.to_string()),
        };
        Ok(Self { raw, matcher })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_any(&self) -> bool {
        matches!(self.matcher, Matcher::Any)
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(exact) => exact == value,
            Matcher::Glob(regex) => regex.is_match(value),
        }
    }
}

/// Whether a changed file falls under a watched path (glob or directory prefix)
pub fn path_matches(filter: &str, path: &str) -> bool {
    let filter = filter.trim().trim_start_matches("./");
    let path = path.trim_start_matches("./");

    if filter.is_empty() {
        return false;
    }
    if is_glob(filter) {
        return Regex::new(&glob_to_regex(filter))
            .map(|re| re.is_match(path))
            .unwrap_or(false);
    }

    let prefix = filter.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Whether any changed path intersects the watched paths
pub fn any_path_matches(filters: &[String], paths: &[String]) -> bool {
    paths
        .iter()
        .any(|path| filters.iter().any(|filter| path_matches(filter, path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_patterns() {
        for raw in [None, Some(""), Some("*"), Some("**")] {
            let pattern = Pattern::compile(raw).unwrap();
            assert!(pattern.is_any());
            assert!(pattern.matches("feature/x"));
        }
    }

    #[test]
    fn test_exact_and_glob() {
        let exact = Pattern::compile(Some("main")).unwrap();
        assert!(exact.matches("main"));
        assert!(!exact.matches("main2"));

        let single = Pattern::compile(Some("feature/*")).unwrap();
        assert!(single.matches("feature/login"));
        assert!(!single.matches("feature/login/v2"));

        let deep = Pattern::compile(Some("release/**")).unwrap();
        assert!(deep.matches("release/1.0/hotfix"));

        let tag = Pattern::compile(Some("v?.*")).unwrap();
        assert!(tag.matches("v1.2"));
        assert!(!tag.matches("v10.2"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = Pattern::compile(Some("v1.0+*")).unwrap();
        assert!(pattern.matches("v1.0+build"));
        assert!(!pattern.matches("v1x0+build"));
    }

    #[test]
    fn test_path_matches() {
        assert!(path_matches("api/", "api/src/main.rs"));
        assert!(path_matches("api", "api/src/main.rs"));
        assert!(!path_matches("api", "apiary/index.ts"));
        assert!(path_matches("**/*.rs", "main.rs"));
        assert!(path_matches("**/*.rs", "api/src/main.rs"));
        assert!(path_matches("docs/*.md", "docs/intro.md"));
        assert!(!path_matches("docs/*.md", "docs/guide/intro.md"));
    }
}
