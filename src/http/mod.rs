//! The HTTP/1.1 connection pipeline.
//!
//! Requests are framed by `Content-Length` exclusively and served one at a
//! time per connection. The flow for each accepted socket:
//!
//! ```text
//! accept → reader.start_connection (peek + optional TLS handshake)
//!        → loop {
//!            read_header → handler(context) → flush → validate framing
//!          }
//!        → recycle reader
//! ```
//!
//! - **`parser`** turns one header block into a [`request::Request`]
//! - **`reader`** owns the header buffer and bounds body reads
//! - **`writer`** enforces the declared response length and the pre-write
//!   of the frozen header
//! - **`context`** glues one request/response pair to its connection and
//!   hosts the [`context::Handler`] contract
//! - **`connection`** runs the state machine and the reader pool
//! - **`websocket`** computes the RFC 6455 upgrade handshake (frames are a
//!   collaborator's job)

pub mod connection;
pub mod context;
pub mod parser;
pub mod reader;
pub mod request;
pub mod response;
pub mod websocket;
pub mod writer;

/// Race one I/O future against the connection's shutdown signal, so every
/// suspension point on the connection observes cancellation. Without a
/// receiver (a reader idling in the pool) the future runs unraced.
pub(crate) async fn race_shutdown<F, T>(
    shutdown: Option<&mut tokio::sync::watch::Receiver<bool>>,
    io: F,
) -> std::io::Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match shutdown {
        Some(shutdown) => tokio::select! {
            // Once shutdown has fired, later I/O must fail, not race it.
            biased;
            _ = shutdown.changed() => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "cancelled by server shutdown",
            )),
            result = io => result,
        },
        None => io.await,
    }
}
