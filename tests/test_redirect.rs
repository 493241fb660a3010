mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{read_response, spawn_server};
use rampart::{Context, Handler, HttpError, Redirector, StaticFiles};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Redirects first, static files as the fall-through, the way the launcher
/// composes them.
struct SiteHandler {
    redirector: Arc<Redirector>,
    files: Arc<StaticFiles>,
}

#[async_trait]
impl Handler for SiteHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        if self.redirector.try_handle(ctx).await? {
            return Ok(());
        }
        self.files.handle(ctx).await
    }
}

async fn site() -> (std::net::SocketAddr, Arc<Redirector>, tempfile::TempDir) {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("here.txt"), b"present").unwrap();
    let redirector = Arc::new(Redirector::new());
    redirector.insert("old-page", "/new-page").unwrap();
    let handler = SiteHandler {
        redirector: Arc::clone(&redirector),
        files: Arc::new(StaticFiles::new(root.path())),
    };
    let addr = spawn_server(Arc::new(handler)).await;
    (addr, redirector, root)
}

async fn get(addr: std::net::SocketAddr, path: &str) -> common::TestResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: example.com:8080\r\n\r\n").as_bytes())
        .await
        .unwrap();
    read_response(&mut stream).await.unwrap()
}

#[tokio::test]
async fn test_mapped_path_redirects() {
    let (addr, _redirector, _root) = site().await;

    let response = get(addr, "/old-page").await;
    assert_eq!(response.status, 301);
    assert_eq!(response.header("location"), Some("/new-page"));
    assert_eq!(response.header("content-length"), Some("0"));
}

#[tokio::test]
async fn test_source_matching_is_case_insensitive() {
    let (addr, _redirector, _root) = site().await;

    let response = get(addr, "/Old-Page").await;
    assert_eq!(response.status, 301);
    assert_eq!(response.header("location"), Some("/new-page"));
}

#[tokio::test]
async fn test_unmapped_path_falls_through() {
    let (addr, _redirector, _root) = site().await;

    assert_eq!(get(addr, "/here.txt").await.body_text(), "present");
    assert_eq!(get(addr, "/nowhere").await.status, 404);
}

#[tokio::test]
async fn test_redirects_added_at_runtime_apply() {
    let (addr, redirector, _root) = site().await;

    assert_eq!(get(addr, "/late").await.status, 404);
    redirector.insert("late", "/landed").unwrap();
    let response = get(addr, "/late").await;
    assert_eq!(response.status, 301);
    assert_eq!(response.header("location"), Some("/landed"));
}

#[test]
fn test_insert_validation() {
    let redirector = Redirector::new();
    assert!(redirector.insert("ok", "/dest").is_ok());
    assert!(redirector.insert("/leading", "/dest").is_err());
    assert!(redirector.insert("trailing/", "/dest").is_err());
    assert!(redirector.insert("ok2", "relative").is_err());
}

#[test]
fn test_insecure_upgrade_gate() {
    let redirector = Redirector::new();
    assert!(!redirector.should_upgrade(80));

    redirector.set_upgrade_insecure(true);
    assert!(redirector.should_upgrade(80));
    // Only plaintext port 80 traffic is upgraded.
    assert!(!redirector.should_upgrade(8080));
    assert!(!redirector.should_upgrade(443));
}
