//! Static route tables: upstream targets and public exemptions

use axum::http::Method;
use orderly_common::config::UpstreamConfig;
use regex_lite::Regex;

/// A backend reachable under a path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Short name used in logs and metrics
    pub name: &'static str,

    /// Human name used in client-facing messages
    pub display_name: &'static str,

    /// Path prefix routed to this upstream, e.g. `/v1/users`
    pub prefix: String,

    /// Base URL without trailing slash
    pub base_url: String,
}

/// Prefix → upstream mapping, immutable after startup
#[derive(Debug, Clone)]
pub struct RouteTable {
    upstreams: Vec<Upstream>,
}

impl RouteTable {
    pub fn new(mut upstreams: Vec<Upstream>) -> Self {
        // Longest prefix first so the first match is the most specific
        upstreams.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { upstreams }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(vec![
            Upstream {
                name: "users",
                display_name: "Users",
                prefix: "/v1/users".to_string(),
                base_url: config.users_url.clone(),
            },
            Upstream {
                name: "orders",
                display_name: "Orders",
                prefix: "/v1/orders".to_string(),
                base_url: config.orders_url.clone(),
            },
        ])
    }

    /// Select the upstream whose prefix matches `path` most specifically
    pub fn resolve(&self, path: &str) -> Option<&Upstream> {
        self.upstreams
            .iter()
            .find(|upstream| path_has_prefix(path, &upstream.prefix))
    }
}

/// Segment-aware prefix test: `/v1/users` matches `/v1/users` and
/// `/v1/users/42` but not `/v1/usersx`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// (method, pattern) pairs that bypass authorization
const PUBLIC_ROUTES: &[(&str, &str)] = &[
    ("POST", r"^/v1/users/register$"),
    ("POST", r"^/v1/users/login$"),
    ("GET", r"^/health$"),
    ("GET", r"^/status$"),
];

/// Compiled public route exemptions
#[derive(Debug, Clone)]
pub struct PublicRoutes {
    routes: Vec<(Method, Regex)>,
}

impl PublicRoutes {
    pub fn new(routes: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let routes = routes
            .iter()
            .map(|(method, pattern)| {
                let method = Method::from_bytes(method.as_bytes())?;
                let pattern = Regex::new(pattern)?;
                Ok((method, pattern))
            })
            .collect::<Result<Vec<_>, anyhow::Error>>()?;
        Ok(Self { routes })
    }

    /// The exemptions the gateway ships with
    pub fn standard() -> Result<Self, anyhow::Error> {
        Self::new(PUBLIC_ROUTES)
    }

    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        self.routes
            .iter()
            .any(|(m, pattern)| m == method && pattern.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            Upstream {
                name: "users",
                display_name: "Users",
                prefix: "/v1/users".to_string(),
                base_url: "http://users".to_string(),
            },
            Upstream {
                name: "admin",
                display_name: "Admin",
                prefix: "/v1/users/admin".to_string(),
                base_url: "http://admin".to_string(),
            },
            Upstream {
                name: "orders",
                display_name: "Orders",
                prefix: "/v1/orders".to_string(),
                base_url: "http://orders".to_string(),
            },
        ])
    }

    #[test]
    fn test_resolve_prefers_longest_prefix() {
        let table = table();
        assert_eq!(table.resolve("/v1/users/profile").unwrap().name, "users");
        assert_eq!(table.resolve("/v1/users/admin/stats").unwrap().name, "admin");
        assert_eq!(table.resolve("/v1/orders").unwrap().name, "orders");
        assert_eq!(table.resolve("/v1/orders/7/status").unwrap().name, "orders");
    }

    #[test]
    fn test_resolve_respects_segment_boundary() {
        let table = table();
        assert!(table.resolve("/v1/usersx").is_none());
        assert!(table.resolve("/v2/users").is_none());
        assert!(table.resolve("/").is_none());
    }

    #[test]
    fn test_public_routes() {
        let public = PublicRoutes::standard().unwrap();
        assert!(public.is_public(&Method::POST, "/v1/users/login"));
        assert!(public.is_public(&Method::POST, "/v1/users/register"));
        assert!(public.is_public(&Method::GET, "/health"));
        assert!(public.is_public(&Method::GET, "/status"));

        assert!(!public.is_public(&Method::GET, "/v1/users/login"));
        assert!(!public.is_public(&Method::POST, "/v1/users/login/extra"));
        assert!(!public.is_public(&Method::GET, "/v1/users/profile"));
        assert!(!public.is_public(&Method::POST, "/health"));
    }
}
