//! Launcher: binds the ports, loads TLS material, composes the handlers and
//! serves until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use rampart::http::connection::ReaderPool;
use rampart::http::context::{Context, Handler};
use rampart::server::{listener, tls};
use rampart::{Config, HttpError, Redirector, StaticFiles};

/// Explicit branching over the installed handlers: redirects first, then
/// the admin API on the admin ports, then static files.
struct RootHandler {
    redirector: Arc<Redirector>,
    files: Arc<StaticFiles>,
    admin_ports: Vec<u16>,
}

#[async_trait]
impl Handler for RootHandler {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        if self.redirector.try_handle(ctx).await? {
            return Ok(());
        }
        if self.admin_ports.contains(&ctx.local_addr.port()) && try_admin(ctx, &self.files).await? {
            return Ok(());
        }
        self.files.handle(ctx).await
    }
}

async fn try_admin(ctx: &mut Context<'_>, files: &StaticFiles) -> Result<bool, HttpError> {
    match ctx.request.path_lower.as_str() {
        "admin/api/log" => {
            let body = rampart::log::snapshot().join("\n");
            ctx.response.set_content_type("text/plain")?;
            ctx.send_text(&body).await?;
            Ok(true)
        }
        "admin/api/stats" => {
            let json = serde_json::to_string_pretty(&rampart::stats::snapshot())
                .map_err(|e| HttpError::server(format!("Cannot serialize stats: {e}")))?;
            ctx.response.set_content_type("application/json")?;
            ctx.send_text(&json).await?;
            Ok(true)
        }
        "admin/api/files" => {
            let json = serde_json::to_string_pretty(&files.entries())
                .map_err(|e| HttpError::server(format!("Cannot serialize file list: {e}")))?;
            ctx.response.set_content_type("application/json")?;
            ctx.send_text(&json).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Resolve paths relative to the executable's directory, falling back to
/// the working directory.
fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_redirects(redirector: &Redirector, path: &Path) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return,
    };
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 2 {
            warn!(
                "Skipping malformed redirect on line {} of {}: {line}",
                number + 1,
                path.display()
            );
            continue;
        }
        if let Err(err) = redirector.insert(tokens[0], tokens[1]) {
            warn!(
                "Skipping redirect on line {} of {}: {err}",
                number + 1,
                path.display()
            );
        }
    }
    info!("Loaded {} redirects from {}", redirector.len(), path.display());
}

fn start_browser(url: &str) {
    let launched = if cfg!(target_os = "windows") {
        std::process::Command::new("cmd").args(["/C", "start", url]).spawn()
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).spawn()
    } else {
        std::process::Command::new("xdg-open").arg(url).spawn()
    };
    if let Err(err) = launched {
        warn!("Cannot open browser at {url}: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut open_browser = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--start-browser" => open_browser = true,
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("usage: rampart [--start-browser]");
                std::process::exit(2);
            }
        }
    }

    let config = Config::load();
    rampart::log::init(config.stdout_level(), config.log.capacity);

    let base = base_dir();
    let files = Arc::new(StaticFiles::new(base.join(&config.static_files.root)));
    if let Some(spec) = &config.static_files.template_extensions {
        files.set_template_extensions(spec);
    }
    if let Some(spec) = &config.static_files.compressible_extensions {
        files.set_compressible_extensions(spec);
    }
    if let Some(name) = &config.static_files.default_file_name {
        files.set_default_file_name(name);
    }
    if let Some(ext) = &config.static_files.default_extension {
        files.set_default_extension(ext);
    }
    info!("Serving static files from {}", files.root().display());

    let redirector = Arc::new(Redirector::new());
    redirector.set_upgrade_insecure(config.redirects.upgrade_insecure);
    load_redirects(&redirector, &base.join(&config.redirects.file));

    let acceptor = match tls::load_acceptor(
        &base.join(&config.tls.certificate),
        &base.join(&config.tls.private_key),
    ) {
        Ok(acceptor) => Some(acceptor),
        Err(err) => {
            info!("TLS disabled: {err}");
            None
        }
    };

    let handler: Arc<dyn Handler> = Arc::new(RootHandler {
        redirector,
        files,
        admin_ports: vec![config.server.admin_port, config.server.admin_tls_port],
    });
    let pool = Arc::new(ReaderPool::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ports = vec![
        (config.server.http_port, None),
        (config.server.admin_port, None),
    ];
    if let Some(acceptor) = &acceptor {
        ports.push((config.server.https_port, Some(acceptor.clone())));
        ports.push((config.server.admin_tls_port, Some(acceptor.clone())));
    }

    let mut listeners = Vec::new();
    for (port, tls) in ports {
        let addr = config.addr(port);
        let handler = Arc::clone(&handler);
        let pool = Arc::clone(&pool);
        let shutdown = shutdown_rx.clone();
        let max_connections = config.server.max_connections;
        listeners.push(tokio::spawn(async move {
            if let Err(err) =
                listener::run(&addr, tls, handler, pool, max_connections, shutdown).await
            {
                warn!("Listener failed: {err:#}");
            }
        }));
    }

    if open_browser {
        start_browser(&format!("http://localhost:{}/", config.server.admin_port));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    for task in listeners {
        let _ = task.await;
    }
    Ok(())
}
