//! The per-connection state machine.
//!
//! ```text
//! ACCEPT → START (peek + optional TLS) → WAIT_HEADER → SERVE_BODY
//!        → VALIDATE → { LOOP | CLOSE }
//! ```
//!
//! One task runs this machine per accepted socket; all I/O on the
//! connection is strictly serial. Readers come from a LIFO pool so the
//! 16 KiB header buffer survives across connections, and go back to the
//! pool on every exit path.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error};

use crate::error::HttpError;
use crate::http::context::{Context, Handler};
use crate::http::reader::RequestReader;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::stats;

/// LIFO free list of readers. Unbounded; grows to peak concurrency.
#[derive(Default)]
pub struct ReaderPool {
    readers: Mutex<Vec<RequestReader>>,
}

impl ReaderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> RequestReader {
        let pooled = self.readers.lock().ok().and_then(|mut pool| pool.pop());
        match pooled {
            Some(reader) => {
                stats::reader_unpooled();
                reader
            }
            None => RequestReader::new(),
        }
    }

    pub fn release(&self, mut reader: RequestReader) {
        reader.finish();
        if let Ok(mut pool) = self.readers.lock() {
            pool.push(reader);
            stats::reader_pooled();
        }
    }

    pub fn len(&self) -> usize {
        self.readers.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drive one accepted socket to completion. The reader goes back to the
/// pool on every exit path, including failures.
pub async fn serve(
    socket: TcpStream,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn Handler>,
    pool: Arc<ReaderPool>,
    mut shutdown: watch::Receiver<bool>,
) {
    stats::connection_opened();

    let remote_addr = socket.peer_addr().ok();
    let local_addr = socket.local_addr().ok();
    let mut reader = pool.acquire();

    if let (Some(remote_addr), Some(local_addr)) = (remote_addr, local_addr) {
        if let Some(write_half) = reader
            .start_connection(socket, tls.as_ref(), shutdown.clone())
            .await
        {
            let mut writer = ResponseWriter::new(write_half, shutdown.clone());
            run_loop(
                &mut reader,
                &mut writer,
                handler,
                remote_addr,
                local_addr,
                &mut shutdown,
            )
            .await;
        }
    }

    pool.release(reader);
    stats::connection_closed();
}

/// WAIT_HEADER → SERVE_BODY → VALIDATE, looping on keep-alive.
async fn run_loop(
    reader: &mut RequestReader,
    writer: &mut ResponseWriter,
    handler: Arc<dyn Handler>,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let request = {
            // The reader races its own reads against the shutdown signal,
            // so an idle keep-alive wait ends as an error here.
            let _waiting = stats::Gauge::waiting_for_header();
            match reader.read_header().await {
                Ok(Some(request)) => request,
                // Orderly EOF between requests.
                Ok(None) => return,
                // Invalid header: close without ever replying.
                Err(err) => {
                    debug!("Dropping connection from {remote_addr}: {err}");
                    return;
                }
            }
        };

        stats::request_served();
        debug!("{} /{} from {}", request.method, request.path, remote_addr);

        let is_websocket_request = request.is_websocket;
        let wants_keep_alive = request.wants_keep_alive();
        let expected_body = request.content_length.max(0);
        let secure = reader.is_secure();

        let mut ctx = Context::new(request, reader, writer, remote_addr, local_addr, secure);
        let outcome = {
            let _serving = if is_websocket_request {
                stats::Gauge::serving_websocket()
            } else {
                stats::Gauge::serving_http()
            };
            // Handler execution is opaque; it may suspend on work the
            // reader and writer cannot see, so it is raced here too.
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("Shutdown during request handling; closing {remote_addr}");
                    return;
                }
                outcome = handler.handle(&mut ctx) => outcome,
            }
        };

        let header_sent = ctx.response.header_sent();
        let websocket_accepted = ctx.websocket_accepted();
        let response_connection = ctx.response.connection().to_string();
        let response_length = ctx.response.content_length();
        let head_request = ctx.is_head();
        drop(ctx);

        // A handler that returns cleanly without ever sending a header
        // produced nothing for the client; treat it as an internal fault.
        let outcome = match outcome {
            Ok(()) if !header_sent => Err(HttpError::server(
                "Handler returned without sending a response header",
            )),
            other => other,
        };

        match outcome {
            Ok(()) => {
                if !websocket_accepted {
                    let body_written = writer.position() == response_length
                        || (head_request && writer.position() == 0);
                    if reader.position() != expected_body || !body_written {
                        error!(
                            "Framing mismatch from handler: read {}/{} request bytes, \
                             wrote {}/{} response bytes; closing {remote_addr}",
                            reader.position(),
                            expected_body,
                            writer.position(),
                            response_length,
                        );
                        let _ = writer.flush().await;
                        return;
                    }
                }
                if let Err(err) = writer.flush().await {
                    debug!("Flush failed for {remote_addr}: {err}");
                    return;
                }
                if websocket_accepted || is_websocket_request {
                    return;
                }
                if !response_connection.eq_ignore_ascii_case("keep-alive") {
                    return;
                }
            }
            Err(err) => {
                match &err {
                    HttpError::Protocol { .. } => debug!("Protocol failure: {err}"),
                    HttpError::Server { .. } => error!("Server failure: {err}"),
                }
                // Upgrade requests never receive error bodies.
                if header_sent || is_websocket_request {
                    let _ = writer.flush().await;
                    return;
                }
                let fatal = err.is_protocol();
                let directive = if !fatal && wants_keep_alive {
                    "keep-alive"
                } else {
                    "close"
                };
                // Double faults while reporting just abort the connection.
                if send_error_reply(writer, err.status(), err.client_message(), directive)
                    .await
                    .is_err()
                {
                    return;
                }
                if fatal || directive != "keep-alive" {
                    return;
                }
            }
        }
    }
}

async fn send_error_reply(
    writer: &mut ResponseWriter,
    status: u16,
    message: &str,
    connection: &str,
) -> Result<(), HttpError> {
    let mut response = Response::new();
    response.set_status(status)?;
    response.set_content_type("text/plain")?;
    response.set_content_length(message.len() as i64)?;
    response.set_connection(connection)?;
    writer.begin(message.len() as i64, response.serialize_header());
    writer.write(message.as_bytes()).await?;
    writer.flush().await
}
