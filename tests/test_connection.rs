mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{assert_closed, read_response, spawn_server, spawn_server_with_shutdown};
use rampart::error::SERVER_ERROR_BODY;
use rampart::http::websocket;
use rampart::{Context, Handler, HttpError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Replies 200 with `echo:<path>`.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        if ctx.request.is_websocket {
            return ctx.accept_websocket(None).await;
        }
        let body = format!("echo:{}", ctx.request.path);
        ctx.send_text(&body).await
    }
}

/// Returns cleanly without producing a response.
struct SilentHandler;

#[async_trait]
impl Handler for SilentHandler {
    async fn handle(&self, _ctx: &mut Context<'_>) -> Result<(), HttpError> {
        Ok(())
    }
}

/// Declares a 1-byte body, then writes two bytes.
struct OverflowHandler;

#[async_trait]
impl Handler for OverflowHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        let writer = ctx.writer(1)?;
        writer.write(b"XX").await
    }
}

/// Reads the declared body (up to 64 bytes) and echoes its length.
struct SlurpHandler;

#[async_trait]
impl Handler for SlurpHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        let body = ctx.read_content(64).await?;
        let reply = format!("got {} bytes", body.len());
        ctx.send_text(&reply).await
    }
}

/// Responds, then verifies that late header mutation is refused.
struct LateMutationHandler;

#[async_trait]
impl Handler for LateMutationHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        ctx.send_text("done").await?;
        match ctx.response.set_header("X-Late", "nope") {
            Err(_) => Ok(()),
            Ok(()) => Err(HttpError::server("late header mutation was accepted")),
        }
    }
}

/// Fails internally on `/boom`, with a protocol failure on `/teapot`.
struct FlakyHandler;

#[async_trait]
impl Handler for FlakyHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        match ctx.request.path.as_str() {
            "boom" => Err(HttpError::server("synthetic fault")),
            "teapot" => Err(HttpError::protocol_with_status(400, "no tea here")),
            _ => ctx.send_text("fine").await,
        }
    }
}

/// Responds without consuming the declared request body.
struct IgnoresBodyHandler;

#[async_trait]
impl Handler for IgnoresBodyHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        ctx.send_text("ignored").await
    }
}

async fn send(stream: &mut TcpStream, raw: &str) {
    stream.write_all(raw.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn test_single_request_response() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "echo:hello");
    assert_eq!(response.header("connection"), Some("keep-alive"));
}

#[tokio::test]
async fn test_keep_alive_two_requests_in_order() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /one HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let first = read_response(&mut stream).await.unwrap();
    assert_eq!(first.body_text(), "echo:one");

    send(&mut stream, "GET /two HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let second = read_response(&mut stream).await.unwrap();
    assert_eq!(second.body_text(), "echo:two");
}

#[tokio::test]
async fn test_connection_close_ends_the_loop() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(
        &mut stream,
        "GET /bye HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.header("connection"), Some("close"));
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_http10_without_keep_alive_closes() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /old HTTP/1.0\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.header("connection"), Some("close"));
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_silent_handler_becomes_generic_500_and_keeps_alive() {
    let addr = spawn_server(Arc::new(SilentHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /a HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(response.body_text(), SERVER_ERROR_BODY);

    // Internal faults do not cost the client its connection.
    send(&mut stream, "GET /b HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(read_response(&mut stream).await.is_some());
}

#[tokio::test]
async fn test_server_failure_replies_generic_and_keeps_alive() {
    let addr = spawn_server(Arc::new(FlakyHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /boom HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(response.body_text(), SERVER_ERROR_BODY);

    send(&mut stream, "GET /ok HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let next = read_response(&mut stream).await.unwrap();
    assert_eq!(next.body_text(), "fine");
}

#[tokio::test]
async fn test_protocol_failure_replies_and_closes() {
    let addr = spawn_server(Arc::new(FlakyHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET /teapot HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(response.body_text(), "no tea here");
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_unknown_method_closes_without_reply() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "BREW /coffee HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(read_response(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_oversized_header_closes_without_reply() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut raw = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
    raw.resize(17 * 1024, b'x');
    stream.write_all(&raw).await.unwrap();
    assert!(read_response(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_overflowing_writer_closes_connection() {
    let addr = spawn_server(Arc::new(OverflowHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    // The header goes out before the overflow is detected; no body follows.
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_read_content_roundtrip() {
    let addr = spawn_server(Arc::new(SlurpHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(
        &mut stream,
        "POST /in HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world",
    )
    .await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.body_text(), "got 11 bytes");
}

#[tokio::test]
async fn test_read_content_missing_length_is_411() {
    let addr = spawn_server(Arc::new(SlurpHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "POST /in HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 411);
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_read_content_oversize_is_413() {
    let addr = spawn_server(Arc::new(SlurpHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(
        &mut stream,
        "POST /in HTTP/1.1\r\nHost: x\r\nContent-Length: 200\r\n\r\n",
    )
    .await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 413);
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_unread_body_fails_validation_and_closes() {
    let addr = spawn_server(Arc::new(IgnoresBodyHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(
        &mut stream,
        "POST /in HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
    )
    .await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.body_text(), "ignored");
    assert!(assert_closed(&mut stream).await);
}

#[tokio::test]
async fn test_late_header_mutation_is_refused() {
    let addr = spawn_server(Arc::new(LateMutationHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "done");
    assert!(response.header("x-late").is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_stalled_connection() {
    let (addr, shutdown_tx) = spawn_server_with_shutdown(Arc::new(SlurpHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Declare 20 bytes but deliver 7; the handler stalls reading the rest.
    send(
        &mut stream,
        "POST /in HTTP/1.1\r\nHost: x\r\nContent-Length: 20\r\n\r\npartial",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    // The drain must not wait for the missing bytes; the connection is
    // dropped without a reply.
    assert!(read_response(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_websocket_upgrade_handshake() {
    let addr = spawn_server(Arc::new(EchoHandler)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(
        &mut stream,
        "GET /chat HTTP/1.1\r\n\
         Host: x\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
    )
    .await;
    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.status, 101);
    assert_eq!(response.header("upgrade"), Some("websocket"));
    assert_eq!(
        response.header("sec-websocket-accept"),
        Some(websocket::accept_key("dGhlIHNhbXBsZSBub25jZQ==").as_str())
    );
}
