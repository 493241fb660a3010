//! Rampart - a small self-contained HTTP/1.1 server.
//!
//! Plaintext and TLS connections on the same accept path, persistent
//! connections, WebSocket upgrade handoff, and a cached static-file
//! subsystem with compression variants and include templating.

pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod log;
pub mod redirect;
pub mod server;
pub mod stats;
pub mod util;

pub use crate::config::Config;
pub use crate::error::HttpError;
pub use crate::files::StaticFiles;
pub use crate::http::connection::ReaderPool;
pub use crate::http::context::{Context, Handler};
pub use crate::http::request::{HttpDict, Method, Request};
pub use crate::http::response::Response;
pub use crate::redirect::Redirector;
