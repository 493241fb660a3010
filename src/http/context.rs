//! Glue for a single request/response pair.
//!
//! A [`Context`] borrows the connection's reader and writer for the duration
//! of one handler invocation. It owns the header-freeze step: the one point
//! where the response header is serialized and queued on the writer as its
//! pre-write task.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::HttpError;
use crate::http::reader::RequestReader;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::websocket;
use crate::http::writer::ResponseWriter;

/// The functional contract the connection pipeline drives. The launcher
/// composes several of these by explicit branching, not a middleware chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError>;
}

pub struct Context<'a> {
    pub request: Request,
    pub response: Response,
    reader: &'a mut RequestReader,
    writer: &'a mut ResponseWriter,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub secure: bool,
    websocket_accepted: bool,
}

impl<'a> Context<'a> {
    pub fn new(
        request: Request,
        reader: &'a mut RequestReader,
        writer: &'a mut ResponseWriter,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        secure: bool,
    ) -> Self {
        Context {
            request,
            response: Response::new(),
            reader,
            writer,
            remote_addr,
            local_addr,
            secure,
            websocket_accepted: false,
        }
    }

    /// Freeze the response header: the content length must be final, the
    /// connection directive is chosen if the handler left it open, and the
    /// serialized header becomes the writer's pre-write task. Idempotent.
    pub fn freeze_headers(&mut self) -> Result<(), HttpError> {
        if self.response.header_sent() {
            return Ok(());
        }
        if self.response.content_length() < 0 {
            return Err(HttpError::server(
                "Content length must be set before the response header is sent",
            ));
        }
        if self.response.connection().is_empty() {
            let directive = if self.request.wants_keep_alive() {
                "keep-alive"
            } else {
                "close"
            };
            self.response.set_connection(directive)?;
        }
        let header = self.response.serialize_header();
        self.response.mark_header_sent();
        self.writer.begin(self.response.content_length(), header);
        Ok(())
    }

    /// Access the request body reader. Freezes the response header first
    /// (defaulting the content length to 0 when unset), so a handler that
    /// streams must declare its response before it starts reading.
    pub fn reader(&mut self) -> Result<&mut RequestReader, HttpError> {
        if !self.response.header_sent() {
            if self.response.content_length() < 0 {
                self.response.set_content_length(0)?;
            }
            self.freeze_headers()?;
        }
        Ok(&mut *self.reader)
    }

    /// Access the response body writer for a body of `content_length`
    /// bytes. Freezes the header.
    pub fn writer(&mut self, content_length: i64) -> Result<&mut ResponseWriter, HttpError> {
        if content_length < 0 {
            return Err(HttpError::server("Content length must be non-negative"));
        }
        let declared = self.response.content_length();
        if declared >= 0 && declared != content_length {
            return Err(HttpError::server(format!(
                "Content length mismatch: header declares {declared}, writer asked for {content_length}"
            )));
        }
        if !self.response.header_sent() {
            self.response.set_content_length(content_length)?;
            self.freeze_headers()?;
        }
        Ok(&mut *self.writer)
    }

    /// Send a complete body in one call: length, freeze, write.
    pub async fn send_bytes(&mut self, body: &[u8]) -> Result<(), HttpError> {
        self.response.set_content_length(body.len() as i64)?;
        self.freeze_headers()?;
        self.writer.write(body).await
    }

    pub async fn send_text(&mut self, body: &str) -> Result<(), HttpError> {
        self.send_bytes(body.as_bytes()).await
    }

    pub async fn send_text_with_status(
        &mut self,
        status: u16,
        body: &str,
    ) -> Result<(), HttpError> {
        self.response.set_status(status)?;
        self.send_bytes(body.as_bytes()).await
    }

    /// Serve a file straight from disk, streaming through the writer.
    pub async fn send_file(&mut self, path: &std::path::Path) -> Result<(), HttpError> {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.send_text_with_status(404, "File not found").await;
            }
            Err(e) => {
                return Err(HttpError::server(format!(
                    "Cannot open {}: {e}",
                    path.display()
                )));
            }
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| HttpError::server(format!("Cannot stat {}: {e}", path.display())))?
            .len() as i64;
        let writer = self.writer(len)?;
        writer.write_stream(&mut file).await
    }

    /// Read the entire declared request body, bounded by `max_length`.
    /// A missing declaration is a 411, an oversized one a 413.
    pub async fn read_content(&mut self, max_length: usize) -> Result<Vec<u8>, HttpError> {
        let declared = self.request.content_length;
        if declared < 0 {
            return Err(HttpError::protocol_with_status(
                411,
                "Content length required",
            ));
        }
        if declared as u64 > max_length as u64 {
            return Err(HttpError::protocol_with_status(
                413,
                format!("Content length exceeds the {max_length} byte limit"),
            ));
        }
        let mut body = vec![0u8; declared as usize];
        self.reader.read_all(&mut body).await?;
        Ok(body)
    }

    /// Complete the WebSocket upgrade handshake. Valid only on a WebSocket
    /// request whose response header has not been sent. The frame codec is
    /// layered on by the collaborator that receives the upgraded context.
    pub async fn accept_websocket(&mut self, protocol: Option<&str>) -> Result<(), HttpError> {
        if !self.request.is_websocket {
            return Err(HttpError::server(
                "accept_websocket on a request that is not a WebSocket upgrade",
            ));
        }
        if self.response.header_sent() {
            return Err(HttpError::server(
                "accept_websocket after the response header was sent",
            ));
        }
        if self.websocket_accepted {
            return Err(HttpError::server("WebSocket upgrade already accepted"));
        }
        websocket::prepare_upgrade(&self.request, &mut self.response, protocol)?;
        self.freeze_headers()?;
        self.writer.flush().await?;
        self.websocket_accepted = true;
        Ok(())
    }

    pub fn websocket_accepted(&self) -> bool {
        self.websocket_accepted
    }

    /// Whether the framing validator should accept a short write: HEAD
    /// responses declare their length but carry no body.
    pub(crate) fn is_head(&self) -> bool {
        self.request.method == Method::Head
    }
}
