//! The response value: mutable until its header is frozen, then fixed.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::HttpError;
use crate::http::request::HttpDict;

/// Standard reason phrase for the status codes this server emits.
pub fn default_status_message(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Content Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// A single HTTP response.
///
/// All setters fail once `header_sent` is set; freezing happens exactly once
/// per response, inside [`Context`](crate::http::context::Context).
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_message: String,
    content_type: String,
    content_length: i64,
    content_encoding: String,
    connection: String,
    headers: HttpDict,
    header_sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Response {
            status: 200,
            status_message: String::new(),
            content_type: String::new(),
            content_length: -1,
            content_encoding: String::new(),
            connection: String::new(),
            headers: HttpDict::new(),
            header_sent: false,
        }
    }

    fn check_open(&self) -> Result<(), HttpError> {
        if self.header_sent {
            return Err(HttpError::server(
                "Response header already sent; headers can no longer change",
            ));
        }
        Ok(())
    }

    pub fn set_status(&mut self, status: u16) -> Result<(), HttpError> {
        self.check_open()?;
        self.status = status;
        Ok(())
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) -> Result<(), HttpError> {
        self.check_open()?;
        self.status_message = message.into();
        Ok(())
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) -> Result<(), HttpError> {
        self.check_open()?;
        self.content_type = content_type.into();
        Ok(())
    }

    /// Declare the body length. Must be non-negative and final before the
    /// header freezes.
    pub fn set_content_length(&mut self, length: i64) -> Result<(), HttpError> {
        self.check_open()?;
        if length < 0 {
            return Err(HttpError::server("Content length must be non-negative"));
        }
        self.content_length = length;
        Ok(())
    }

    pub fn set_content_encoding(&mut self, encoding: impl Into<String>) -> Result<(), HttpError> {
        self.check_open()?;
        self.content_encoding = encoding.into();
        Ok(())
    }

    /// Connection directive. Empty means the server decides at freeze time.
    pub fn set_connection(&mut self, connection: impl Into<String>) -> Result<(), HttpError> {
        self.check_open()?;
        self.connection = connection.into();
        Ok(())
    }

    pub fn set_header(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        self.check_open()?;
        self.headers.insert(key, value);
        Ok(())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &str {
        &self.content_encoding
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn header(&self, key: &str) -> &str {
        self.headers.get(key)
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    /// Freeze the header. Called by the context once the serialized header
    /// has been queued on the writer.
    pub fn mark_header_sent(&mut self) {
        self.header_sent = true;
    }

    /// Serialize the status line and header fields, terminated by the blank
    /// line. Called once, at freeze time.
    pub fn serialize_header(&self) -> Bytes {
        let message = if self.status_message.is_empty() {
            default_status_message(self.status)
        } else {
            &self.status_message
        };

        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(format!("HTTP/1.1 {} {}\r\n", self.status, message).as_bytes());
        if !self.content_type.is_empty() {
            buf.put_slice(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        }
        if self.content_length >= 0 {
            buf.put_slice(format!("Content-Length: {}\r\n", self.content_length).as_bytes());
        }
        if !self.content_encoding.is_empty() {
            buf.put_slice(format!("Content-Encoding: {}\r\n", self.content_encoding).as_bytes());
        }
        if !self.connection.is_empty() {
            buf.put_slice(format!("Connection: {}\r\n", self.connection).as_bytes());
        }
        for (key, value) in self.headers.iter() {
            buf.put_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}
