//! Search-path routing (§4.C2 `resolve_path`): static prefix routes and
//! templated (`{var}` / `{var:regex}`) dynamic routes, mirroring
//! `py_qgis_cache/routes.py`'s `StaticRoute`/`DynamicRoute`.

use regex::Regex;

use crate::model::ResourceUri;

fn is_relative_to(path: &str, base: &str) -> bool {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    path == base || path.starts_with(&format!("{base}/"))
}

fn strip_prefix<'a>(path: &'a str, base: &str) -> &'a str {
    let base = base.trim_end_matches('/');
    path.strip_prefix(base)
        .unwrap_or(path)
        .trim_start_matches('/')
}

/// One configured entry in `[projects.search_paths]`: a location prefix
/// paired with a root URL, static or `{var}`-templated.
#[derive(Debug, Clone)]
pub struct Route {
    location: String,
    root: ResourceUri,
    dynamic: Option<Regex>,
}

impl Route {
    /// Builds a route, detecting whether `location` contains a `{...}`
    /// template (dynamic) or is a plain prefix (static) — matches
    /// `Routes.build_routes`'s classification.
    pub fn new(location: &str, root: ResourceUri) -> Result<Self, String> {
        if !location.starts_with('/') {
            return Err("search path route must start with '/'".to_string());
        }
        if !location.contains('{') {
            return Ok(Self {
                location: location.to_string(),
                root,
                dynamic: None,
            });
        }

        let pattern = compile_dynamic_pattern(location)?;
        Ok(Self {
            location: location.to_string(),
            root,
            dynamic: Some(pattern),
        })
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn root(&self) -> &ResourceUri {
        &self.root
    }

    /// Attempts to resolve `path` against this route, returning the
    /// matched location and the resulting URL (query-templated or
    /// path-appended). `None` means this route doesn't cover `path`.
    pub fn resolve_path(&self, path: &str) -> Option<(String, ResourceUri)> {
        match &self.dynamic {
            None => {
                if is_relative_to(path, &self.location) {
                    Some((self.location.clone(), self.root.clone()))
                } else {
                    None
                }
            }
            Some(re) => {
                let caps = re.captures(path)?;
                let location = substitute_captures(&self.location, &caps, re);
                if !is_relative_to(path, &location) {
                    return None;
                }
                Some((location, self.root.clone()))
            }
        }
    }
}

fn compile_dynamic_pattern(location: &str) -> Result<Regex, String> {
    // Translate `{var}` / `{var:re}` segments into named capture groups,
    // escaping literal segments, matching `DynamicRoute.__init__`.
    let mut pattern = String::from("^");
    let mut rest = location;
    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| format!("unbalanced '{{' in route '{location}'"))?
            + open;
        let inner = &rest[open + 1..close];
        let (var, sub_re) = match inner.split_once(':') {
            Some((var, re)) => (var, re),
            None => (inner, "[^{}/]+"),
        };
        pattern.push_str(&format!("(?P<{var}>{sub_re})"));
        rest = &rest[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    Regex::new(&pattern).map_err(|e| format!("bad pattern for route '{location}': {e}"))
}

fn substitute_captures(template: &str, caps: &regex::Captures, re: &Regex) -> String {
    let mut out = template.to_string();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            out = out.replace(&format!("{{{name}}}"), m.as_str());
        }
    }
    out
}

/// The full set of configured search paths (`config.search_paths`),
/// resolved in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    routes: Vec<Route>,
}

impl SearchPaths {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolves `path` against every configured route in order, returning
    /// the first match's fully-joined URL.
    pub fn resolve(&self, path: &str) -> Option<ResourceUri> {
        for route in &self.routes {
            let (location, root) = route.resolve_path(path)?;
            let suffix = strip_prefix(path, &location);
            let resolved = root
                .with_path_template(suffix)
                .unwrap_or_else(|| root.join_path(suffix));
            return Some(resolved);
        }
        None
    }

    /// Only static routes are listed as "locations" when no prefix filter
    /// is given (`Routes.locations(None)`), matching the Python behaviour
    /// that dynamic templates are not valid enumerable search roots.
    pub fn locations(&self, prefix: Option<&str>) -> Vec<(String, ResourceUri)> {
        match prefix {
            None => self
                .routes
                .iter()
                .filter(|r| !r.is_dynamic())
                .map(|r| (r.location.clone(), r.root.clone()))
                .collect(),
            Some(loc) => self
                .routes
                .iter()
                .filter(|r| is_relative_to(&r.location, loc) || r.location == loc)
                .map(|r| (r.location.clone(), r.root.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_route_resolves_relative_path() {
        let route = Route::new("/public", ResourceUri::parse("file:///srv/projects")).unwrap();
        let (location, root) = route.resolve_path("/public/sub/proj").unwrap();
        assert_eq!(location, "/public");
        assert_eq!(root.path, "/srv/projects");
    }

    #[test]
    fn static_route_rejects_unrelated_path() {
        let route = Route::new("/public", ResourceUri::parse("file:///srv/projects")).unwrap();
        assert!(route.resolve_path("/private/proj").is_none());
    }

    #[test]
    fn dynamic_route_substitutes_named_group() {
        let route = Route::new(
            "/tenants/{tenant}",
            ResourceUri::parse("postgres1://?dbname={path}"),
        )
        .unwrap();
        let (location, _) = route.resolve_path("/tenants/acme/proj").unwrap();
        assert_eq!(location, "/tenants/acme");
    }

    #[test]
    fn search_paths_resolve_appends_suffix_without_template() {
        let paths = SearchPaths::new(vec![Route::new(
            "/public",
            ResourceUri::parse("file:///srv/projects"),
        )
        .unwrap()]);
        let resolved = paths.resolve("/public/a/b").unwrap();
        assert_eq!(resolved.path, "/srv/projects/a/b");
    }

    #[test]
    fn search_paths_resolve_substitutes_query_template() {
        let paths = SearchPaths::new(vec![Route::new(
            "/db",
            ResourceUri::parse("postgres1://?project={path}"),
        )
        .unwrap()]);
        let resolved = paths.resolve("/db/myproject").unwrap();
        assert_eq!(resolved.query, "project=myproject");
    }

    #[test]
    fn locations_without_prefix_only_lists_static_routes() {
        let paths = SearchPaths::new(vec![
            Route::new("/public", ResourceUri::parse("file:///srv/projects")).unwrap(),
            Route::new("/tenants/{tenant}", ResourceUri::parse("file:///srv/t")).unwrap(),
        ]);
        let locs = paths.locations(None);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].0, "/public");
    }
}
