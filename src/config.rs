//! Relay configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file named by
//! `RELAY_CONFIG`, then individual environment variables. Everything is
//! validated once at startup and never changes afterwards.
//!
//! ```yaml
//! listen: 0.0.0.0:8541
//! service_name: JSON-RPC CORS Relay
//! health_path: /health
//! default_route: node1
//! request_timeout_secs: 10
//! routes:
//!   - key: node1
//!     url: http://localhost:8545
//!   - key: node2
//!     url: http://localhost:8547
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::proxy::router::RouteTable;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8541";
pub const DEFAULT_SERVICE_NAME: &str = "JSON-RPC CORS Relay";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_ROUTES: [(&str, &str); 3] = [
    ("node1", "http://localhost:8545"),
    ("node2", "http://localhost:8547"),
    ("node3", "http://localhost:8549"),
];
const DEFAULT_ROUTE: &str = "node1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("route table is empty")]
    NoRoutes,

    #[error("route '{0}' is defined more than once")]
    DuplicateRoute(String),

    #[error("backend URL for route '{key}' is invalid: {reason}")]
    InvalidBackendUrl { key: String, reason: String },

    #[error("default route '{0}' is not in the route table")]
    UnknownDefaultRoute(String),

    #[error("invalid route entry '{0}', expected key=url")]
    InvalidRouteEntry(String),

    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("health path '{0}' must start with '/'")]
    InvalidHealthPath(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub service_name: String,
    pub health_path: String,
    pub routes: RouteTable,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_body_bytes: usize,
    pub max_response_bytes: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen: Option<String>,
    service_name: Option<String>,
    health_path: Option<String>,
    default_route: Option<String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    max_body_bytes: Option<usize>,
    max_response_bytes: Option<usize>,
    routes: Option<Vec<RouteEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteEntry {
    key: String,
    url: String,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match lookup("RELAY_CONFIG") {
            Some(path) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path))?,
            ),
            None => None,
        };

        Self::from_sources(file.as_deref(), lookup)
    }

    /// Builds configuration from YAML text (if any) overlaid by `lookup`.
    pub fn from_sources<F>(yaml: Option<&str>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match yaml {
            Some(text) => serde_yaml::from_str(text).context("failed to parse config file")?,
            None => FileConfig::default(),
        };

        let listen = lookup("LISTEN")
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen_addr = listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "listen address",
                value: listen.clone(),
            })?;

        let service_name = lookup("RELAY_SERVICE_NAME")
            .or(file.service_name)
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let health_path = lookup("RELAY_HEALTH_PATH")
            .or(file.health_path)
            .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string());
        if !health_path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(health_path).into());
        }

        let entries: Vec<(String, String)> = match lookup("RELAY_ROUTES") {
            Some(list) => parse_route_list(&list)?,
            None => match file.routes {
                Some(routes) => routes.into_iter().map(|r| (r.key, r.url)).collect(),
                None => DEFAULT_ROUTES
                    .iter()
                    .map(|(k, u)| (k.to_string(), u.to_string()))
                    .collect(),
            },
        };
        let default_route = lookup("RELAY_DEFAULT_ROUTE")
            .or(file.default_route)
            .or_else(|| entries.first().map(|(k, _)| k.clone()))
            .unwrap_or_else(|| DEFAULT_ROUTE.to_string());
        let routes = RouteTable::new(entries, &default_route)?;

        let request_timeout = secs(
            "RELAY_TIMEOUT_SECS",
            lookup("RELAY_TIMEOUT_SECS"),
            file.request_timeout_secs,
        )?;
        let connect_timeout = secs(
            "RELAY_CONNECT_TIMEOUT_SECS",
            lookup("RELAY_CONNECT_TIMEOUT_SECS"),
            file.connect_timeout_secs,
        )?;

        let max_body_bytes = number(
            "RELAY_MAX_BODY_BYTES",
            lookup("RELAY_MAX_BODY_BYTES"),
            file.max_body_bytes,
        )?
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let max_response_bytes = number(
            "RELAY_MAX_RESPONSE_BYTES",
            lookup("RELAY_MAX_RESPONSE_BYTES"),
            file.max_response_bytes,
        )?
        .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES);

        Ok(Self {
            listen_addr,
            service_name,
            health_path,
            routes,
            request_timeout,
            connect_timeout,
            max_body_bytes,
            max_response_bytes,
        })
    }
}

/// Parses `key=url,key=url`.
fn parse_route_list(list: &str) -> Result<Vec<(String, String)>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, url) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidRouteEntry(entry.to_string()))?;
            Ok((key.trim().to_string(), url.trim().to_string()))
        })
        .collect()
}

fn number(
    name: &'static str,
    env: Option<String>,
    file: Option<usize>,
) -> Result<Option<usize>, ConfigError> {
    match env {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(file),
    }
}

fn secs(name: &'static str, env: Option<String>, file: Option<u64>) -> Result<Duration, ConfigError> {
    let secs = match env {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { name, value })?,
        None => match file {
            Some(secs) => secs,
            None => return Ok(DEFAULT_TIMEOUT),
        },
    };
    if secs == 0 {
        return Err(ConfigError::Zero(name));
    }
    Ok(Duration::from_secs(secs))
}
