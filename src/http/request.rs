//! The parsed request value and its header dictionaries.

use std::collections::HashMap;
use std::str::FromStr;

/// The eight request methods the parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Connect,
    Trace,
}

impl Method {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            "CONNECT" => Some(Method::Connect),
            "TRACE" => Some(Method::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }

    /// True when `token` is a known request-line method. Used by the
    /// reader's fast-fail check before the full header has arrived.
    pub fn is_known_token(token: &[u8]) -> bool {
        matches!(
            token,
            b"GET" | b"HEAD" | b"POST" | b"PUT" | b"DELETE" | b"OPTIONS" | b"CONNECT" | b"TRACE"
        )
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String-to-string mapping where reading a missing key never fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpDict(HashMap<String, String>);

impl HttpDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, or the empty string when absent.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    /// Typed read: `default` when the key is missing or unparseable.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.0.get(key) {
            Some(value) => value.parse().unwrap_or(default),
            None => default,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// A parsed request. Immutable after the parser returns it.
///
/// `path` keeps the client's casing with surrounding slashes stripped;
/// `path_lower` is its lowercase mirror used for routing lookups.
/// `content_length` is `-1` when the request declared none.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub version_major: u32,
    pub version_minor: u32,
    pub path: String,
    pub path_lower: String,
    pub extension: String,
    pub fragment: String,
    pub query: HttpDict,
    pub cookies: HttpDict,
    pub host: String,
    pub host_no_port: String,
    pub connection: String,
    pub referer: String,
    pub accept_encoding: String,
    pub content_length: i64,
    pub headers: HttpDict,
    pub is_websocket: bool,
}

impl Request {
    /// Whether the connection may stay open once the server is left to
    /// decide: an explicit `keep-alive`, or HTTP/1.1 without an explicit
    /// `close`.
    pub fn wants_keep_alive(&self) -> bool {
        if self.connection.contains("keep-alive") {
            return true;
        }
        self.version_minor >= 1 && !self.connection.contains("close")
    }
}
