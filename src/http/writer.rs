//! Per-connection framed writer.
//!
//! The writer enforces the declared response length and carries the
//! pre-write task: the serialized response header queued at freeze time,
//! flushed exactly once before the first body byte (or the flush) touches
//! the wire. Every write and flush races the connection's shutdown signal.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::watch;

use crate::error::HttpError;
use crate::http::race_shutdown;
use crate::http::reader::ServerStream;

const COPY_BUFFER_SIZE: usize = 8 * 1024;

pub struct ResponseWriter {
    stream: WriteHalf<ServerStream>,
    /// Declared length of the current response body.
    length: i64,
    /// Body bytes written so far.
    position: i64,
    /// Serialized header waiting to go out before any body byte.
    pre_write: Option<Bytes>,
    /// Per-connection cancellation signal.
    shutdown: watch::Receiver<bool>,
}

impl ResponseWriter {
    pub fn new(stream: WriteHalf<ServerStream>, shutdown: watch::Receiver<bool>) -> Self {
        ResponseWriter {
            stream,
            length: 0,
            position: 0,
            pre_write: None,
            shutdown,
        }
    }

    /// Arm the writer for one response: the declared body length and the
    /// header bytes to send ahead of the body.
    pub fn begin(&mut self, length: i64, header: Bytes) {
        self.length = length;
        self.position = 0;
        self.pre_write = Some(header);
    }

    async fn flush_pre_write(&mut self) -> Result<(), HttpError> {
        if let Some(header) = self.pre_write.take() {
            race_shutdown(Some(&mut self.shutdown), self.stream.write_all(&header))
                .await
                .map_err(|e| HttpError::protocol(format!("Stream error writing header: {e}")))?;
        }
        Ok(())
    }

    /// Write body bytes. Writing past the declared length is a failure; the
    /// framing of every later request on this connection would be wrong.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        self.flush_pre_write().await?;
        if buf.is_empty() {
            return Ok(());
        }
        if self.position + buf.len() as i64 > self.length {
            return Err(HttpError::protocol(
                "Handler wrote more bytes than the declared content length",
            ));
        }
        race_shutdown(Some(&mut self.shutdown), self.stream.write_all(buf))
            .await
            .map_err(|e| HttpError::protocol(format!("Stream error writing body: {e}")))?;
        self.position += buf.len() as i64;
        Ok(())
    }

    /// Chunked copy from a reader, e.g. a file too large to buffer.
    pub async fn write_stream<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<(), HttpError> {
        let mut chunk = [0u8; COPY_BUFFER_SIZE];
        loop {
            let n = race_shutdown(Some(&mut self.shutdown), reader.read(&mut chunk))
                .await
                .map_err(|e| HttpError::protocol(format!("Stream error reading source: {e}")))?;
            if n == 0 {
                return Ok(());
            }
            self.write(&chunk[..n]).await?;
        }
    }

    pub async fn flush(&mut self) -> Result<(), HttpError> {
        self.flush_pre_write().await?;
        race_shutdown(Some(&mut self.shutdown), self.stream.flush())
            .await
            .map_err(|e| HttpError::protocol(format!("Stream error on flush: {e}")))
    }

    /// Body bytes written for the current response.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Declared body length of the current response.
    pub fn length(&self) -> i64 {
        self.length
    }
}
