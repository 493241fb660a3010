//! Per-connection framed reader.
//!
//! The reader owns the 16 KiB header buffer for its connection. It is the
//! component that first touches an accepted socket: it peeks without
//! consuming, decides the TLS posture from the first byte, performs the
//! handshake when the port carries a certificate, and then scans for header
//! blocks. Body reads are bounded by the content length declared at header
//! parse time. Readers are pooled; the buffer survives across connections.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::HttpError;
use crate::http::parser;
use crate::http::race_shutdown;
use crate::http::request::{Method, Request};
use crate::util;

/// Fixed header scan buffer size. A header that does not terminate within
/// this many bytes is a protocol failure.
pub const HEADER_BUFFER_SIZE: usize = 16 * 1024;

/// One accepted connection, plaintext or TLS, behind a single stream type.
pub enum ServerStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Framed request reader. Single-threaded with respect to its connection.
pub struct RequestReader {
    buffer: Box<[u8; HEADER_BUFFER_SIZE]>,
    /// Start of unconsumed bytes in `buffer`.
    head: usize,
    /// End of valid bytes in `buffer`.
    tail: usize,
    /// Declared content length of the request body being read.
    length: i64,
    /// Body bytes delivered so far.
    position: i64,
    secure: bool,
    stream: Option<ReadHalf<ServerStream>>,
    /// Per-connection cancellation signal; every await on this connection
    /// races against it. Absent while the reader sits in the pool.
    shutdown: Option<watch::Receiver<bool>>,
}

impl Default for RequestReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestReader {
    pub fn new() -> Self {
        RequestReader {
            buffer: Box::new([0u8; HEADER_BUFFER_SIZE]),
            head: 0,
            tail: 0,
            length: 0,
            position: 0,
            secure: false,
            stream: None,
            shutdown: None,
        }
    }

    fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.length = 0;
        self.position = 0;
        self.secure = false;
        self.stream = None;
        self.shutdown = None;
    }

    /// Take ownership of an accepted socket: peek the first bytes without
    /// consuming them, gate the TLS posture, and perform the handshake when
    /// `tls` is present. Returns the write half for the response writer, or
    /// `None` when the connection is abandoned (always silently).
    pub async fn start_connection(
        &mut self,
        socket: TcpStream,
        tls: Option<&TlsAcceptor>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<WriteHalf<ServerStream>> {
        self.reset();

        let peeked = match race_shutdown(Some(&mut shutdown), socket.peek(&mut self.buffer[..]))
            .await
        {
            Ok(n) => n,
            Err(err) => {
                debug!("Peek failed: {err}");
                return None;
            }
        };
        if peeked < 3 {
            return None;
        }

        let stream = if self.buffer[0] == 0x16 {
            // TLS ClientHello. Without a certificate this port cannot speak
            // TLS; with one, reject record versions below TLS 1.0.
            let acceptor = match tls {
                Some(a) => a,
                None => {
                    debug!("TLS handshake bytes on a plaintext port");
                    return None;
                }
            };
            if self.buffer[1] != 0x03 || self.buffer[2] < 0x01 {
                debug!(
                    "Rejected TLS record version {}.{}",
                    self.buffer[1], self.buffer[2]
                );
                return None;
            }
            match race_shutdown(Some(&mut shutdown), acceptor.accept(socket)).await {
                Ok(tls_stream) => {
                    self.secure = true;
                    ServerStream::Tls(Box::new(tls_stream))
                }
                Err(err) => {
                    debug!("TLS handshake failed: {err}");
                    return None;
                }
            }
        } else {
            if tls.is_some() {
                debug!("Plaintext bytes on a TLS port");
                return None;
            }
            ServerStream::Plain(socket)
        };

        let (read_half, write_half) = tokio::io::split(stream);
        self.stream = Some(read_half);
        self.shutdown = Some(shutdown);
        Some(write_half)
    }

    /// Scan for the next header block and parse it.
    ///
    /// `Ok(None)` means the peer closed the connection between requests.
    /// Errors are protocol failures; the caller closes without replying.
    pub async fn read_header(&mut self) -> Result<Option<Request>, HttpError> {
        // Compact whatever a previous body read left behind.
        if self.head > 0 {
            self.buffer.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }

        let mut method_checked = false;
        loop {
            if let Some(end) = util::find_subsequence(&self.buffer[..self.tail], b"\r\n\r\n") {
                let header_len = end + 4;
                let request = parser::parse_request(&self.buffer[..header_len])?;
                self.head = header_len;
                self.length = request.content_length.max(0);
                self.position = 0;
                return Ok(Some(request));
            }

            // Fail fast on garbage: once 8 bytes are in, the method token
            // must already be a known one.
            if !method_checked && self.tail >= 8 {
                method_checked = true;
                let token_ok = match self.buffer[..8].iter().position(|&b| b == b' ') {
                    Some(space) => Method::is_known_token(&self.buffer[..space]),
                    None => false,
                };
                if !token_ok {
                    return Err(HttpError::protocol(format!(
                        "Not an HTTP request: {}",
                        util::ascii_str(&self.buffer[..8])
                    )));
                }
            }

            if self.tail == self.buffer.len() {
                return Err(HttpError::protocol(format!(
                    "Request header exceeds {HEADER_BUFFER_SIZE} bytes"
                )));
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| HttpError::protocol("Connection not started"))?;
            let n = race_shutdown(
                self.shutdown.as_mut(),
                stream.read(&mut self.buffer[self.tail..]),
            )
            .await?;
            if n == 0 {
                if self.tail == 0 {
                    return Ok(None);
                }
                return Err(HttpError::protocol("Connection closed mid-header"));
            }
            self.tail += n;
        }
    }

    /// Read body bytes, bounded by the declared content length. Bytes left
    /// over from the header scan are served before the stream is touched.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let remaining = self.length - self.position;
        if remaining <= 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(remaining as usize);

        let buffered = self.tail - self.head;
        if buffered > 0 {
            let n = want.min(buffered);
            buf[..n].copy_from_slice(&self.buffer[self.head..self.head + n]);
            self.head += n;
            self.position += n as i64;
            return Ok(n);
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HttpError::protocol("Connection not started"))?;
        let n = race_shutdown(self.shutdown.as_mut(), stream.read(&mut buf[..want])).await?;
        self.position += n as i64;
        Ok(n)
    }

    /// Fill `buf` completely; EOF mid-fill is a protocol failure.
    pub async fn read_all(&mut self, buf: &mut [u8]) -> Result<(), HttpError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(HttpError::protocol(
                    "Connection closed before the declared content length was read",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Body bytes delivered for the current request.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Declared body length of the current request (0 when none declared).
    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Drop the stream half and the shutdown receiver so the reader can go
    /// back to the pool. The header buffer is retained.
    pub fn finish(&mut self) {
        self.stream = None;
        self.shutdown = None;
    }
}
