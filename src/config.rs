//! Launcher configuration.
//!
//! Loaded from `config.toml` next to the working directory when present;
//! every field has a default so the server runs with no file at all. The
//! bind address can be overridden with `RAMPART_BIND`.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::Level;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub static_files: StaticFilesSection,
    pub tls: TlsSection,
    pub log: LogSection,
    pub redirects: RedirectsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    pub http_port: u16,
    pub https_port: u16,
    pub admin_port: u16,
    pub admin_tls_port: u16,
    pub max_connections: i64,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            bind_addr: "0.0.0.0".to_string(),
            http_port: 80,
            https_port: 443,
            admin_port: 8059,
            admin_tls_port: 8058,
            max_connections: crate::server::listener::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesSection {
    /// Static root, relative to the executable's directory.
    pub root: PathBuf,
    pub template_extensions: Option<String>,
    pub compressible_extensions: Option<String>,
    pub default_file_name: Option<String>,
    pub default_extension: Option<String>,
}

impl Default for StaticFilesSection {
    fn default() -> Self {
        StaticFilesSection {
            root: PathBuf::from("www"),
            template_extensions: None,
            compressible_extensions: None,
            default_file_name: None,
            default_extension: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl Default for TlsSection {
    fn default() -> Self {
        TlsSection {
            certificate: PathBuf::from("fullchain.pem"),
            private_key: PathBuf::from("privatekey.pem"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub stdout_level: String,
    pub capacity: usize,
}

impl Default for LogSection {
    fn default() -> Self {
        LogSection {
            stdout_level: "debug".to_string(),
            capacity: crate::log::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedirectsSection {
    pub file: PathBuf,
    pub upgrade_insecure: bool,
}

impl Default for RedirectsSection {
    fn default() -> Self {
        RedirectsSection {
            file: PathBuf::from("redirects.txt"),
            upgrade_insecure: false,
        }
    }
}

impl Config {
    /// Read `config.toml` when present, falling back to defaults on any
    /// problem, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("config.toml") {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|err| {
                eprintln!("config.toml is invalid, using defaults: {err}");
                Config::default()
            }),
            Err(_) => Config::default(),
        };
        if let Ok(addr) = std::env::var("RAMPART_BIND") {
            config.server.bind_addr = addr;
        }
        config
    }

    pub fn addr(&self, port: u16) -> String {
        format!("{}:{port}", self.server.bind_addr)
    }

    pub fn stdout_level(&self) -> Level {
        match self.log.stdout_level.to_ascii_lowercase().as_str() {
            "trace" => Level::TRACE,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::DEBUG,
        }
    }
}
