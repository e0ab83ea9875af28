//! Per-request dispatch.
//!
//! `OPTIONS` is answered locally, `GET` serves the health document, `POST` is
//! routed and forwarded. Cross-origin headers are attached to whatever comes
//! out, on every path.

use serde::Serialize;

use crate::config::Config;
use crate::http::cors;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::proxy::error::ForwardError;
use crate::proxy::router::RouteTable;
use crate::proxy::upstream::Forwarder;

/// Shared, read-only request handler.
#[derive(Debug, Clone)]
pub struct RelayHandler {
    routes: RouteTable,
    forwarder: Forwarder,
    service_name: String,
    health_path: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct Health<'a> {
    status: &'static str,
    service: &'a str,
    port: u16,
    nodes: Vec<&'a str>,
}

impl RelayHandler {
    pub fn new(
        routes: RouteTable,
        forwarder: Forwarder,
        service_name: impl Into<String>,
        health_path: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            routes,
            forwarder,
            service_name: service_name.into(),
            health_path: health_path.into(),
            port,
        }
    }

    /// Builds a handler from startup configuration.
    ///
    /// `port` is the port actually bound, reported in the health document.
    pub fn from_config(cfg: &Config, port: u16) -> Self {
        let forwarder = Forwarder::new(
            cfg.connect_timeout,
            cfg.request_timeout,
            cfg.max_response_bytes,
        );
        Self::new(
            cfg.routes.clone(),
            forwarder,
            cfg.service_name.clone(),
            cfg.health_path.clone(),
            port,
        )
    }

    /// Produces exactly one response for `req`.
    pub async fn handle(&self, req: &Request) -> Response {
        let mut response = match req.method {
            Method::OPTIONS => cors::preflight(),
            Method::GET => self.health(req),
            Method::POST => self.relay(req).await,
            Method::HEAD => Response::method_not_allowed().without_body(),
            _ => Response::method_not_allowed(),
        };
        cors::attach(&mut response);
        response
    }

    fn health(&self, req: &Request) -> Response {
        let path = req.path_only();
        if path != "/" && path != self.health_path {
            return Response::not_found();
        }

        let doc = Health {
            status: "ok",
            service: &self.service_name,
            port: self.port,
            nodes: self.routes.keys().collect(),
        };
        match serde_json::to_vec(&doc) {
            Ok(body) => Response::json(body),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode health document");
                ForwardError::Internal(e.to_string()).to_response()
            }
        }
    }

    async fn relay(&self, req: &Request) -> Response {
        let route = self.routes.resolve(&req.path);

        tracing::debug!(
            route = %route.key,
            backend = %route.url,
            path = %req.path,
            bytes = req.body.len(),
            "Forwarding request to backend"
        );

        match self.forwarder.forward(&route.url, &req.body).await {
            Ok(reply) => {
                tracing::info!(
                    route = %route.key,
                    backend = %route.url,
                    status = reply.status,
                    bytes = reply.body.len(),
                    "Request forwarded"
                );
                Response::json(reply.body)
            }
            Err(e) => {
                if matches!(e, ForwardError::Internal(_)) {
                    tracing::error!(route = %route.key, backend = %route.url, error = %e, "Relay fault while forwarding");
                } else {
                    tracing::warn!(route = %route.key, backend = %route.url, error = %e, "Backend failed");
                }
                e.to_response()
            }
        }
    }
}
