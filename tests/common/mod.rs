//! Shared plumbing for the integration suites: an in-process server bound
//! to an ephemeral port, and a minimal client-side response parser.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rampart::http::connection::{serve, ReaderPool};
use rampart::Handler;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Serve `handler` on an ephemeral plaintext port for the duration of the
/// test process.
pub async fn spawn_server(handler: Arc<dyn Handler>) -> SocketAddr {
    let (addr, shutdown_tx) = spawn_server_with_shutdown(handler).await;
    // Keep the sender alive so connections never see a spurious shutdown.
    std::mem::forget(shutdown_tx);
    addr
}

/// Like [`spawn_server`], but the caller controls the shutdown signal.
pub async fn spawn_server_with_shutdown(
    handler: Arc<dyn Handler>,
) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let pool = Arc::new(ReaderPool::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let handler = Arc::clone(&handler);
            let pool = Arc::clone(&pool);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(serve(socket, None, handler, pool, shutdown));
        }
    });

    (addr, shutdown_tx)
}

/// A client-parsed response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one Content-Length-framed response. `None` when the server closed
/// the connection before a complete header arrived.
pub async fn read_response(stream: &mut TcpStream) -> Option<TestResponse> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(at) = find(&buf, b"\r\n\r\n") {
            break at;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let status: u16 = lines.next()?.split(' ').nth(1)?.parse().ok()?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers.get("content-length")?.parse().ok()?;
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    Some(TestResponse {
        status,
        headers,
        body,
    })
}

/// True when the server has closed its side (next read yields EOF).
pub async fn assert_closed(stream: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 64];
    matches!(stream.read(&mut chunk).await, Ok(0) | Err(_))
}

/// A connected (client, server) socket pair over loopback.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}
