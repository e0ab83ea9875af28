use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::handler::RelayHandler;

/// Binds the configured address and serves until the task is cancelled.
///
/// A bind failure is returned to the caller; it is the only fatal error.
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;
    let local = listener.local_addr()?;
    info!("Listening on {}", local);

    for route in cfg.routes.routes() {
        let marker = if route.key == cfg.routes.default_route().key { " (default)" } else { "" };
        info!("  /{} -> {}{}", route.key, route.url, marker);
    }

    let handler = Arc::new(RelayHandler::from_config(cfg, local.port()));
    serve(listener, handler, cfg.max_body_bytes).await
}

/// Accepts connections forever, one task per connection.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<RelayHandler>,
    max_body: usize,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Per-connection accept errors (e.g. EMFILE) must not stop the relay.
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }
        };
        debug!("Accepted connection from {}", peer);

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, handler, max_body);
            if let Err(e) = conn.run().await {
                tracing::debug!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
