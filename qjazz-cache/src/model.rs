//! Core value types of the checkout engine (§3).

use std::fmt;

/// A resolved resource locator: `scheme://…path?query`. Modeled as its own
/// small struct rather than reusing the `url` crate's `Url`, because search
/// paths resolve to storage schemes (`postgres`, custom handler schemes)
/// that don't carry a meaningful host, and query templating (`{path}`
/// substitution) is easier against raw components than against a validated
/// URL. Mirrors Python's `urllib.parse.SplitResult` usage in this role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    pub scheme: String,
    pub path: String,
    pub query: String,
}

impl ResourceUri {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            path: path.into(),
            query: String::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Parses `scheme://path?query`, defaulting to the `file` scheme when
    /// none is given, matching `config.py::validate_url`.
    pub fn parse(raw: &str) -> Self {
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("file".to_string(), raw),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self {
            scheme,
            path,
            query,
        }
    }

    pub fn to_uri_string(&self) -> String {
        if self.query.is_empty() {
            format!("{}://{}", self.scheme, self.path)
        } else {
            format!("{}://{}?{}", self.scheme, self.path, self.query)
        }
    }

    /// Substitutes `{path}` in the query string with `suffix`, returning
    /// `None` when no such placeholder is present (caller then appends
    /// `suffix` to `path` instead — see `SearchPaths::resolve`).
    pub fn with_path_template(&self, suffix: &str) -> Option<Self> {
        if self.query.contains("{path}") {
            Some(Self {
                scheme: self.scheme.clone(),
                path: self.path.clone(),
                query: self.query.replace("{path}", suffix),
            })
        } else {
            None
        }
    }

    pub fn join_path(&self, suffix: &str) -> Self {
        let joined = if self.path.ends_with('/') {
            format!("{}{}", self.path, suffix)
        } else {
            format!("{}/{}", self.path, suffix)
        };
        Self {
            scheme: self.scheme.clone(),
            path: joined,
            query: self.query.clone(),
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

/// Immutable descriptor of a project resource (§3). `uri` is the resolved,
/// idempotent cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMetadata {
    pub uri: String,
    pub name: String,
    pub scheme: String,
    pub storage: Option<String>,
    /// Seconds since epoch.
    pub last_modified: i64,
    /// Storage-reported QGIS file format version, when the backend exposes
    /// one (`qjazz_rpc/_op_cache.py::cache_info_from_entry`).
    pub saved_version: Option<String>,
}

/// Checkout state machine outcomes (§3). `UPDATED` is only ever produced by
/// [`crate::manager::CacheManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStatus {
    Unchanged,
    NeedUpdate,
    Removed,
    NotFound,
    New,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_file_scheme() {
        let uri = ResourceUri::parse("/data/project.qgs");
        assert_eq!(uri.scheme, "file");
        assert_eq!(uri.path, "/data/project.qgs");
    }

    #[test]
    fn parse_keeps_explicit_scheme_and_query() {
        let uri = ResourceUri::parse("postgres1://?dbname=mydatabase1");
        assert_eq!(uri.scheme, "postgres1");
        assert_eq!(uri.query, "dbname=mydatabase1");
    }

    #[test]
    fn with_path_template_substitutes_placeholder() {
        let uri = ResourceUri::parse("postgres1://?project={path}");
        let resolved = uri.with_path_template("myproject").unwrap();
        assert_eq!(resolved.query, "project=myproject");
    }

    #[test]
    fn join_path_appends_when_no_template() {
        let uri = ResourceUri::parse("file:///data");
        assert!(uri.with_path_template("sub/project").is_none());
        assert_eq!(uri.join_path("sub/project").path, "/data/sub/project");
    }
}
