//! Turns one header block (request line through the terminating blank line)
//! into a [`Request`] value.
//!
//! Every check failure is a protocol failure with a readable reason; no
//! partially-filled request ever escapes.

use crate::error::HttpError;
use crate::http::request::{HttpDict, Method, Request};
use crate::util;

/// Parse a request from the byte slice the reader accumulated, up to and
/// including the `CRLF CRLF` terminator.
pub fn parse_request(buf: &[u8]) -> Result<Request, HttpError> {
    // Headers are ASCII only; anything else is rejected before the buffer
    // is ever treated as text.
    for &b in buf {
        if (b < 0x20 && b != b'\r' && b != b'\n') || b > 0x7E {
            return Err(HttpError::protocol(format!(
                "Invalid byte 0x{b:02x} in request header"
            )));
        }
    }
    let text = std::str::from_utf8(buf)
        .map_err(|_| HttpError::protocol("Request header is not valid text"))?;

    let mut lines = text.split("\r\n").filter(|l| !l.is_empty());

    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::protocol("Empty request"))?;
    let tokens: Vec<&str> = request_line.split(' ').collect();
    if tokens.len() != 3 || tokens.iter().any(|t| t.is_empty()) {
        return Err(HttpError::protocol(format!(
            "Malformed request line: {}",
            util::ascii_str(request_line.as_bytes())
        )));
    }

    let method = Method::from_token(tokens[0])
        .ok_or_else(|| HttpError::protocol(format!("Unknown HTTP method: {}", tokens[0])))?;
    let (path, path_lower, extension, fragment, query) = parse_target(tokens[1]);
    let (version_major, version_minor) = parse_version(tokens[2])?;

    let mut headers = HttpDict::new();
    let mut cookies = HttpDict::new();
    let mut host = String::new();
    let mut accept_encoding = String::new();
    let mut content_length: i64 = -1;
    let mut connection = String::new();
    let mut referer = String::new();

    for line in lines {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            HttpError::protocol(format!("Malformed header field: {}", util::ascii_str(line.as_bytes())))
        })?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "cookie" => parse_cookies(value, &mut cookies),
            "host" => host = value.to_string(),
            "accept-encoding" => accept_encoding = value.to_ascii_lowercase(),
            "content-length" => content_length = value.parse().unwrap_or(0),
            "connection" => connection = value.to_ascii_lowercase(),
            "referer" => referer = value.to_string(),
            _ => headers.insert(key, value),
        }
    }

    let host_no_port = match host.split_once(':') {
        Some((name, _port)) => name.to_string(),
        None => host.clone(),
    };

    let is_websocket = connection.contains("upgrade")
        && headers.get("upgrade").eq_ignore_ascii_case("websocket")
        && headers.get_parsed("sec-websocket-version", 0i64) >= 13;

    Ok(Request {
        method,
        version_major,
        version_minor,
        path,
        path_lower,
        extension,
        fragment,
        query,
        cookies,
        host,
        host_no_port,
        connection,
        referer,
        accept_encoding,
        content_length,
        headers,
        is_websocket,
    })
}

/// Split the request target into path, fragment and query; strip the
/// surrounding slashes and pull out the lowercased extension.
fn parse_target(target: &str) -> (String, String, String, String, HttpDict) {
    let (rest, fragment) = match target.split_once('#') {
        Some((r, f)) => (r, f.to_string()),
        None => (target, String::new()),
    };
    let (raw_path, query_str) = match rest.split_once('?') {
        Some((p, q)) => (p, q),
        None => (rest, ""),
    };

    let mut query = HttpDict::new();
    for pair in query_str.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) => query.insert(k, v),
            None => query.insert(pair, ""),
        }
    }

    let path = raw_path.trim_matches('/').to_string();
    let path_lower = path.to_ascii_lowercase();

    let last_segment = path.rsplit('/').next().unwrap_or("");
    let extension = match last_segment.rfind('.') {
        Some(dot) => last_segment[dot + 1..].to_ascii_lowercase(),
        None => String::new(),
    };

    (path, path_lower, extension, fragment, query)
}

fn parse_version(token: &str) -> Result<(u32, u32), HttpError> {
    let rest = token
        .strip_prefix("HTTP/")
        .ok_or_else(|| HttpError::protocol(format!("Malformed HTTP version: {token}")))?;
    let (major, minor) = rest
        .split_once('.')
        .ok_or_else(|| HttpError::protocol(format!("Malformed HTTP version: {token}")))?;
    let major: u32 = major
        .parse()
        .map_err(|_| HttpError::protocol(format!("Malformed HTTP version: {token}")))?;
    let minor: u32 = minor
        .parse()
        .map_err(|_| HttpError::protocol(format!("Malformed HTTP version: {token}")))?;
    if major != 1 {
        return Err(HttpError::protocol(format!(
            "Unsupported HTTP version: {major}.{minor}"
        )));
    }
    Ok((major, minor))
}

fn parse_cookies(value: &str, cookies: &mut HttpDict) {
    for pair in value.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => cookies.insert(k.trim(), v.trim()),
            None => cookies.insert(pair, ""),
        }
    }
}
