//! Accept loop for one listening port.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::http::connection::{self, ReaderPool};
use crate::http::context::Handler;
use crate::stats;

/// Default cap on concurrently alive connections across the process.
pub const DEFAULT_MAX_CONNECTIONS: i64 = 10_000;

/// Bind `addr` and serve until shutdown. Every accepted socket gets its own
/// task; an overload guard drops new sockets once the process-wide alive
/// count reaches `max_connections`.
pub async fn run(
    addr: &str,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn Handler>,
    pool: Arc<ReaderPool>,
    max_connections: i64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    info!(
        "Listening on {addr}{}",
        if tls.is_some() { " (tls)" } else { "" }
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Listener on {addr} shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("Accept failed on {addr}: {err}");
                        continue;
                    }
                };
                if stats::alive_connections() >= max_connections {
                    debug!("Connection limit reached; dropping {peer}");
                    continue;
                }
                let tls = tls.clone();
                let handler = Arc::clone(&handler);
                let pool = Arc::clone(&pool);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    connection::serve(socket, tls, handler, pool, shutdown).await;
                });
            }
        }
    }
}
