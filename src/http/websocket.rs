//! RFC 6455 upgrade handshake.
//!
//! Only the handoff point lives here: computing the accept key and shaping
//! the 101 response. Frame encoding and decoding belong to the collaborator
//! that takes over the upgraded connection.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::error::HttpError;
use crate::http::request::Request;
use crate::http::response::Response;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` for a client key, per RFC 6455 §4.2.2.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Shape the 101 response for an upgrade request.
pub(crate) fn prepare_upgrade(
    request: &Request,
    response: &mut Response,
    protocol: Option<&str>,
) -> Result<(), HttpError> {
    let client_key = request.headers.get("sec-websocket-key");
    if client_key.is_empty() {
        return Err(HttpError::protocol("WebSocket request without Sec-WebSocket-Key"));
    }

    response.set_status(101)?;
    response.set_content_length(0)?;
    response.set_connection("Upgrade")?;
    response.set_header("Upgrade", "websocket")?;
    response.set_header("Sec-WebSocket-Accept", accept_key(client_key))?;
    if let Some(protocol) = protocol {
        response.set_header("Sec-WebSocket-Protocol", protocol)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_example_key() {
        // The handshake example from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
