//! The two failure kinds every component reports through.
//!
//! A [`Protocol`](HttpError::Protocol) failure means the peer violated or
//! confused the wire protocol; it carries an HTTP status, is reported to the
//! client verbatim when headers have not yet been sent, and is always fatal
//! to the connection. A [`Server`](HttpError::Server) failure is an internal
//! fault; the client only ever sees a generic message, the connection may
//! keep serving, and the raise site is captured for the log.

use std::panic::Location;

use thiserror::Error;

/// Body sent to the client for any internal fault. Details stay in the log.
pub const SERVER_ERROR_BODY: &str =
    "There was a server error. It has been logged and we are looking into it.";

#[derive(Debug, Error)]
pub enum HttpError {
    /// The peer broke the wire protocol or the connection itself failed.
    #[error("{message}")]
    Protocol { status: u16, message: String },

    /// An internal fault in a handler or the core.
    #[error("{message} [{file}:{line}]")]
    Server {
        message: String,
        file: &'static str,
        line: u32,
    },
}

impl HttpError {
    /// Protocol failure with the default 400 status.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::protocol_with_status(400, message)
    }

    pub fn protocol_with_status(status: u16, message: impl Into<String>) -> Self {
        HttpError::Protocol {
            status,
            message: message.into(),
        }
    }

    /// Server failure capturing the caller's source location.
    #[track_caller]
    pub fn server(message: impl Into<String>) -> Self {
        let loc = Location::caller();
        HttpError::Server {
            message: message.into(),
            file: loc.file(),
            line: loc.line(),
        }
    }

    /// Status code reported to the client when headers are still open.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Protocol { status, .. } => *status,
            HttpError::Server { .. } => 500,
        }
    }

    /// Body text for the client-visible reply.
    pub fn client_message(&self) -> &str {
        match self {
            HttpError::Protocol { message, .. } => message,
            HttpError::Server { .. } => SERVER_ERROR_BODY,
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, HttpError::Protocol { .. })
    }
}

impl From<std::io::Error> for HttpError {
    /// Stream-level failures surface as protocol failures; the low-level
    /// message is preserved for the log.
    fn from(err: std::io::Error) -> Self {
        HttpError::protocol(format!("Stream error: {err}"))
    }
}
