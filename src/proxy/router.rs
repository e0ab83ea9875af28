//! Path-based backend selection.
//!
//! The request path, minus surrounding slashes, names a backend node. Anything
//! that does not match a configured key goes to the default node, so
//! resolution never fails.

use url::Url;

use crate::config::ConfigError;

/// A route key and the backend base URL it forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub key: String,
    pub url: Url,
}

/// Immutable route table built once at startup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    default_index: usize,
}

impl RouteTable {
    /// Builds a table from `(key, url)` pairs kept in the given order.
    ///
    /// Keys must be unique, URLs must be `http` with a host, and
    /// `default_key` must name one of the routes.
    pub fn new<I, K, U>(entries: I, default_key: &str) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, U)>,
        K: Into<String>,
        U: AsRef<str>,
    {
        let mut routes: Vec<Route> = Vec::new();

        for (key, url) in entries {
            let key: String = key.into();
            let key = Self::normalize(&key).to_string();
            let raw = url.as_ref();

            if routes.iter().any(|r| r.key == key) {
                return Err(ConfigError::DuplicateRoute(key));
            }

            let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBackendUrl {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            if url.scheme() != "http" {
                return Err(ConfigError::InvalidBackendUrl {
                    key,
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
            if url.host_str().is_none_or(str::is_empty) {
                return Err(ConfigError::InvalidBackendUrl {
                    key,
                    reason: "missing host".to_string(),
                });
            }

            routes.push(Route { key, url });
        }

        if routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }

        let wanted = Self::normalize(default_key);
        let default_index = routes
            .iter()
            .position(|r| r.key == wanted)
            .ok_or_else(|| ConfigError::UnknownDefaultRoute(default_key.to_string()))?;

        Ok(Self {
            routes,
            default_index,
        })
    }

    /// Drops the query string and strips leading/trailing `/`.
    ///
    /// ```
    /// # use rpc_relay::proxy::router::RouteTable;
    /// assert_eq!(RouteTable::normalize("/node2/"), "node2");
    /// assert_eq!(RouteTable::normalize("/node2?x=1"), "node2");
    /// assert_eq!(RouteTable::normalize("/"), "");
    /// ```
    pub fn normalize(path: &str) -> &str {
        let path = match path.split_once('?') {
            Some((path, _)) => path,
            None => path,
        };
        path.trim_matches('/')
    }

    /// Resolves `path` to a route, falling back to the default.
    pub fn resolve(&self, path: &str) -> &Route {
        let key = Self::normalize(path);
        self.routes
            .iter()
            .find(|r| r.key == key)
            .unwrap_or_else(|| self.default_route())
    }

    pub fn default_route(&self) -> &Route {
        &self.routes[self.default_index]
    }

    /// Route keys in configuration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.key.as_str())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
