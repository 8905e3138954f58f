//! Shell-glob matching used for forwarded-header filtering (§4.C6) and
//! project file suffix filtering (§4.C1). Thin wrapper over `globset` giving
//! `fnmatch`-style semantics (`*` matches across path separators, case
//! sensitivity controlled by the caller).

use globset::{Glob, GlobSetBuilder};

/// A compiled set of glob patterns, matched case-insensitively against
/// lower-cased candidates (header names are always compared lower-case per
/// the forwarding contract).
pub struct GlobMatcher {
    set: globset::GlobSet,
}

impl GlobMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(&pattern.as_ref().to_lowercase()) {
                builder.add(glob);
            }
        }
        let set = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());
        Self { set }
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.set.is_match(candidate.to_lowercase())
    }
}

/// Returns the subset of `(name, value)` headers whose lower-cased name
/// matches at least one pattern in `patterns` (§4.C6 `get_metadata`,
/// §8 header-forwarding invariant).
pub fn filter_headers<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    patterns: &[String],
) -> Vec<(String, String)> {
    let matcher = GlobMatcher::new(patterns);
    headers
        .into_iter()
        .filter(|(name, _)| matcher.is_match(&name.to_lowercase()))
        .map(|(name, value)| (name.to_lowercase(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_prefix_glob() {
        let m = GlobMatcher::new(["x-qgis-*", "x-lizmap-*"]);
        assert!(m.is_match("x-qgis-project"));
        assert!(m.is_match("X-Lizmap-User"));
        assert!(!m.is_match("authorization"));
    }

    #[test]
    fn filter_headers_matches_any_pattern() {
        let headers = vec![
            ("X-Qgis-Project", "france"),
            ("Authorization", "Bearer x"),
            ("X-Lizmap-User", "bob"),
        ];
        let patterns = vec!["x-qgis-*".to_string(), "x-lizmap-*".to_string()];
        let forwarded = filter_headers(headers, &patterns);
        assert_eq!(forwarded.len(), 2);
        assert!(forwarded.iter().any(|(k, _)| k == "x-qgis-project"));
        assert!(forwarded.iter().any(|(k, _)| k == "x-lizmap-user"));
    }
}
