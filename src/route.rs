//! Route compilation and the route table.
//!
//! A [`RouteSpec`] from the configuration is resolved into one
//! [`CompiledRoute`] per method, with defaults applied and the body template
//! loaded. Compiled routes are immutable and stored in a [`RouteTable`]
//! keyed by method and path pattern.

use crate::config::{DuplicateRoutePolicy, GlobalVars, RouteSpec, Settings};
use crate::error::RouteError;
use crate::template::load_template;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Method used when a route does not name one.
pub const DEFAULT_METHOD: Method = Method::GET;

/// Status code used when a route does not set one.
pub const DEFAULT_STATUS_CODE: StatusCode = StatusCode::OK;

/// Defaults and policies applied while compiling routes.
#[derive(Debug, Clone)]
pub struct RouteDefaults {
    pub method: Method,
    pub status_code: StatusCode,
    /// Register the route with an empty body when its body file cannot be
    /// loaded; otherwise the route is skipped.
    pub degrade_on_template_error: bool,
    pub duplicate_routes: DuplicateRoutePolicy,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD,
            status_code: DEFAULT_STATUS_CODE,
            degrade_on_template_error: true,
            duplicate_routes: DuplicateRoutePolicy::Warn,
        }
    }
}

impl From<&Settings> for RouteDefaults {
    fn from(settings: &Settings) -> Self {
        Self {
            degrade_on_template_error: settings.degrade_on_template_error,
            duplicate_routes: settings.duplicate_routes,
            ..Self::default()
        }
    }
}

/// A route ready to be served.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub path: String,
    pub method: Method,
    pub status_code: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Body template source
    pub body: String,
    pub globals: Arc<GlobalVars>,
}

/// Compiles route specs against a fixed set of defaults and global variables.
pub struct RouteCompiler {
    defaults: RouteDefaults,
    globals: Arc<GlobalVars>,
}

impl RouteCompiler {
    pub fn new(defaults: RouteDefaults, globals: Arc<GlobalVars>) -> Self {
        Self { defaults, globals }
    }

    /// Compile a route spec into one route per method.
    ///
    /// When `spec.methods` is non-empty the outer `method` is ignored and
    /// each entry is compiled with its key as the method.
    pub fn compile(&self, path: &str, spec: &RouteSpec) -> Result<Vec<CompiledRoute>, RouteError> {
        if spec.methods.is_empty() {
            return Ok(vec![self.compile_single(path, &spec.method, spec)?]);
        }

        let mut methods: Vec<_> = spec.methods.iter().collect();
        methods.sort_by(|a, b| a.0.cmp(b.0));
        methods
            .into_iter()
            .map(|(method, nested)| self.compile_single(path, method, nested))
            .collect()
    }

    fn compile_single(
        &self,
        path: &str,
        method: &str,
        spec: &RouteSpec,
    ) -> Result<CompiledRoute, RouteError> {
        let method = if method.is_empty() {
            debug!(method = %self.defaults.method, path, "HTTP method not provided, using default");
            self.defaults.method.clone()
        } else {
            Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| RouteError::InvalidMethod(method.to_string()))?
        };

        let status_code = if spec.code == 0 {
            debug!(code = %self.defaults.status_code, path, "Status code not provided, using default");
            self.defaults.status_code
        } else {
            StatusCode::from_u16(spec.code).map_err(|_| RouteError::InvalidStatus(spec.code))?
        };

        let body = if spec.body.is_empty() && !spec.body_file.is_empty() {
            debug!(file = %spec.body_file, path, "Using body template file");
            match load_template(&spec.body_file) {
                Ok(source) => source,
                Err(e) if self.defaults.degrade_on_template_error => {
                    warn!(
                        file = %spec.body_file,
                        path,
                        error = %e,
                        "Body template unavailable, serving empty body"
                    );
                    String::new()
                }
                Err(source) => {
                    return Err(RouteError::Template {
                        path: path.to_string(),
                        source,
                    })
                }
            }
        } else {
            spec.body.clone()
        };

        let mut headers: Vec<_> = spec.headers.iter().collect();
        headers.sort();
        let headers = headers
            .into_iter()
            .filter_map(|(name, value)| {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        warn!(header = %name, path, "Dropping invalid response header");
                        None
                    }
                }
            })
            .collect();

        Ok(CompiledRoute {
            path: path.to_string(),
            method,
            status_code,
            headers,
            body,
            globals: Arc::clone(&self.globals),
        })
    }

    /// Compile a route spec and insert the result into `table`.
    ///
    /// Failures are logged and skipped. Returns the number of routes
    /// registered.
    pub fn register(&self, path: &str, spec: &RouteSpec, table: &mut RouteTable) -> usize {
        let routes = match self.compile(path, spec) {
            Ok(routes) => routes,
            Err(e) => {
                warn!(path, error = %e, "Skipping route");
                return 0;
            }
        };

        let mut registered = 0;
        for route in routes {
            let method = route.method.clone();
            match table.insert(route, self.defaults.duplicate_routes) {
                Ok(()) => {
                    info!(method = %method, path, "Adding new route");
                    registered += 1;
                }
                Err(e) => warn!(error = %e, "Skipping route"),
            }
        }
        registered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A parsed route path such as `/users/:id`, `/users/{id}` or `/files/*rest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        let segments = split_path(path)
            .map(|seg| {
                if let Some(name) = seg.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = seg.strip_prefix('*') {
                    Segment::CatchAll(name.to_string())
                } else if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    match inner.strip_prefix('*') {
                        Some(name) => Segment::CatchAll(name.to_string()),
                        None => Segment::Param(inner.to_string()),
                    }
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();

        Self { segments }
    }

    /// True when the pattern has no parameters.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Match a request path, returning the extracted parameters.
    ///
    /// Each path segment is percent-decoded before comparison, so captured
    /// values are decoded and an encoded `/` never splits a segment.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_path(path).map(percent_decode);

        for segment in &self.segments {
            match segment {
                Segment::CatchAll(name) => {
                    // May be empty: `/files/*rest` matches `/files`
                    let rest: Vec<String> = parts.by_ref().collect();
                    params.insert(name.clone(), rest.join("/"));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if parts.next()? != *lit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.next()?;
                    params.insert(name.clone(), value);
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Percent-decode a path segment. Malformed escapes are kept as-is and
/// invalid UTF-8 is replaced.
pub(crate) fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

struct TableEntry {
    pattern: PathPattern,
    route: Arc<CompiledRoute>,
}

/// Result of a route table lookup.
#[derive(Debug)]
pub struct RouteMatch {
    pub route: Arc<CompiledRoute>,
    pub params: HashMap<String, String>,
}

/// Compiled routes keyed by method and path pattern.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<TableEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a compiled route, applying `policy` when the method and path
    /// are already registered.
    pub fn insert(
        &mut self,
        route: CompiledRoute,
        policy: DuplicateRoutePolicy,
    ) -> Result<(), RouteError> {
        let pattern = PathPattern::parse(&route.path);
        let entries = self.routes.entry(route.method.clone()).or_default();

        if let Some(existing) = entries.iter_mut().find(|e| e.pattern == pattern) {
            return match policy {
                DuplicateRoutePolicy::Warn => {
                    warn!(
                        method = %route.method,
                        path = %route.path,
                        "Route registered twice, replacing earlier definition"
                    );
                    existing.route = Arc::new(route);
                    Ok(())
                }
                DuplicateRoutePolicy::Reject => Err(RouteError::Duplicate {
                    method: route.method.to_string(),
                    path: route.path,
                }),
            };
        }

        entries.push(TableEntry {
            pattern,
            route: Arc::new(route),
        });
        Ok(())
    }

    /// Find the route for a request. Static paths win over patterns; among
    /// patterns the earliest registered wins.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let entries = self.routes.get(method)?;

        let static_match = entries
            .iter()
            .filter(|e| e.pattern.is_static())
            .find_map(|e| e.pattern.matches(path).map(|params| (e, params)));

        let (entry, params) = static_match.or_else(|| {
            entries
                .iter()
                .filter(|e| !e.pattern.is_static())
                .find_map(|e| e.pattern.matches(path).map(|params| (e, params)))
        })?;

        Some(RouteMatch {
            route: Arc::clone(&entry.route),
            params,
        })
    }

    /// Get a route by its exact registered method and path.
    pub fn get(&self, method: &Method, path: &str) -> Option<&CompiledRoute> {
        let pattern = PathPattern::parse(path);
        self.routes
            .get(method)?
            .iter()
            .find(|e| e.pattern == pattern)
            .map(|e| e.route.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
