//! Cached static-file handler.
//!
//! Maps HTTP paths onto a root directory, keeps loaded files in memory, and
//! keeps that memory coherent with the filesystem by comparing the source
//! file's mtime on every request. Compressible files gain an on-the-fly
//! gzip variant when it is strictly smaller; `FILE.gz` / `FILE.br` files on
//! disk next to a served `FILE` are loaded as ready-made variants.
//! Template-enabled files are expanded once, at load time.
//!
//! Locking: the settings mutex and the cache mutex are never held at the
//! same time. File reads and compression happen outside the cache lock, so
//! two racing first-time loads of one path may duplicate work; the last
//! insert wins.

pub mod cache;
pub mod mime;
pub mod template;

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::HttpError;
use crate::files::cache::{CacheEntry, CacheEntryInfo};
use crate::http::context::{Context, Handler};
use crate::http::request::Method;

const DEFAULT_TEMPLATE_EXTENSIONS: &str = "htm;html";
const DEFAULT_COMPRESSIBLE_EXTENSIONS: &str = "htm;html;css;js;json;svg;txt;xml";
const DEFAULT_START_DELIMITER: &str = "${{";
const DEFAULT_END_DELIMITER: &str = "}}";
const DEFAULT_FILE_NAME: &str = "index";
const DEFAULT_FILE_EXTENSION: &str = "html";

#[derive(Debug, Clone)]
struct Settings {
    template_extensions: HashSet<String>,
    compressible_extensions: HashSet<String>,
    start_delimiter: Vec<u8>,
    end_delimiter: Vec<u8>,
    default_file_name: String,
    default_extension: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            template_extensions: parse_extension_list(DEFAULT_TEMPLATE_EXTENSIONS),
            compressible_extensions: parse_extension_list(DEFAULT_COMPRESSIBLE_EXTENSIONS),
            start_delimiter: DEFAULT_START_DELIMITER.as_bytes().to_vec(),
            end_delimiter: DEFAULT_END_DELIMITER.as_bytes().to_vec(),
            default_file_name: DEFAULT_FILE_NAME.to_string(),
            default_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

fn parse_extension_list(spec: &str) -> HashSet<String> {
    spec.split(';')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// The static-file server. Install as the fall-through handler.
pub struct StaticFiles {
    root: PathBuf,
    settings: Mutex<Settings>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StaticFiles {
            root: root.into(),
            settings: Mutex::new(Settings::default()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the `;`-separated template extension list. Clears the cache.
    pub fn set_template_extensions(&self, spec: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.template_extensions = parse_extension_list(spec);
        }
        self.flush();
    }

    /// Replace the `;`-separated compressible extension list. Clears the cache.
    pub fn set_compressible_extensions(&self, spec: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.compressible_extensions = parse_extension_list(spec);
        }
        self.flush();
    }

    /// Replace the template delimiters. Clears the cache.
    pub fn set_delimiters(&self, start: &str, end: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.start_delimiter = start.as_bytes().to_vec();
            settings.end_delimiter = end.as_bytes().to_vec();
        }
        self.flush();
    }

    /// Replace the file name tried for directory-style paths. Clears the cache.
    pub fn set_default_file_name(&self, name: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.default_file_name = name.to_string();
        }
        self.flush();
    }

    /// Replace the extension tried for extension-less paths. Clears the cache.
    pub fn set_default_extension(&self, extension: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.default_extension = extension.trim_start_matches('.').to_string();
        }
        self.flush();
    }

    /// Drop every cache entry. Concurrent requests repopulate on demand.
    pub fn flush(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Admin view of the cache, sorted by path.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let mut list: Vec<_> = self
            .cache
            .lock()
            .map(|cache| cache.values().map(CacheEntry::info).collect())
            .unwrap_or_default();
        list.sort_by(|a: &CacheEntryInfo, b: &CacheEntryInfo| a.http_path.cmp(&b.http_path));
        list
    }

    fn settings_snapshot(&self) -> Result<Settings, HttpError> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| HttpError::server("Static file settings lock poisoned"))
    }

    /// Cache-coherence protocol for one HTTP path: under the lock, stat the
    /// canonical disk path of an existing entry and evict it (and its
    /// variant siblings) when stale; then, outside the lock, resolve and
    /// load the file and insert the fresh entries.
    async fn update_cache(&self, http_path: &str) -> Result<(), HttpError> {
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| HttpError::server("File cache lock poisoned"))?;
            if let Some(entry) = cache.get(http_path) {
                let fresh = std::fs::metadata(&entry.disk_path)
                    .and_then(|m| m.modified())
                    .map(|mtime| mtime == entry.modified)
                    .unwrap_or(false);
                if fresh {
                    return Ok(());
                }
                debug!("Evicting stale cache entry /{http_path}");
                cache.remove(http_path);
                cache.remove(&format!("{http_path}.gz"));
                cache.remove(&format!("{http_path}.br"));
            }
        }

        let settings = self.settings_snapshot()?;
        let Some(disk_path) = self.resolve(http_path, &settings).await else {
            return Ok(());
        };

        let raw = match tokio::fs::read(&disk_path).await {
            Ok(bytes) => bytes,
            // Vanished between resolution and read; the caller sees a 404.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(HttpError::server(format!(
                    "Cannot read {}: {e}",
                    disk_path.display()
                )));
            }
        };
        let modified = tokio::fs::metadata(&disk_path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| {
                HttpError::server(format!("Cannot stat {}: {e}", disk_path.display()))
            })?;

        let extension = disk_extension(&disk_path);

        let content = if settings.template_extensions.contains(&extension) {
            template::expand(
                &raw,
                &self.root,
                &settings.start_delimiter,
                &settings.end_delimiter,
            )
            .await?
        } else {
            raw
        };

        // Ready-made variants from disk take precedence over anything we
        // would compress ourselves.
        let mut siblings = Vec::new();
        for variant in ["gz", "br"] {
            let sibling_path = append_extension(&disk_path, variant);
            if let Ok(bytes) = tokio::fs::read(&sibling_path).await {
                let sibling_modified = tokio::fs::metadata(&sibling_path)
                    .await
                    .and_then(|m| m.modified())
                    .unwrap_or(modified);
                siblings.push(CacheEntry {
                    disk_path: sibling_path,
                    http_path: format!("{http_path}.{variant}"),
                    extension: variant.to_string(),
                    modified: sibling_modified,
                    content: Bytes::from(bytes),
                    gzip: None,
                    hits: 0,
                });
            }
        }

        let has_gz_sibling = siblings.iter().any(|s| s.extension == "gz");
        let gzip = if settings.compressible_extensions.contains(&extension) && !has_gz_sibling {
            compress_if_smaller(&content)?
        } else {
            None
        };

        let entry = CacheEntry {
            disk_path,
            http_path: http_path.to_string(),
            extension,
            modified,
            content: Bytes::from(content),
            gzip,
            hits: 0,
        };

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| HttpError::server("File cache lock poisoned"))?;
        for sibling in siblings {
            cache.insert(sibling.http_path.clone(), sibling);
        }
        cache.insert(entry.http_path.clone(), entry);
        Ok(())
    }

    /// Disk-file resolution: the path itself, then the default file inside
    /// a directory of that name, then the path with the default extension.
    async fn resolve(&self, http_path: &str, settings: &Settings) -> Option<PathBuf> {
        if !http_path.is_empty() {
            let direct = self.root.join(http_path);
            if is_file(&direct).await {
                return Some(direct);
            }
        }
        let index = self.root.join(http_path).join(format!(
            "{}.{}",
            settings.default_file_name, settings.default_extension
        ));
        if is_file(&index).await {
            return Some(index);
        }
        if !http_path.is_empty() {
            let with_ext = self
                .root
                .join(format!("{http_path}.{}", settings.default_extension));
            if is_file(&with_ext).await {
                return Some(with_ext);
            }
        }
        None
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, ctx: &mut Context<'_>) -> Result<(), HttpError> {
        if ctx.request.method != Method::Get {
            return Err(HttpError::protocol_with_status(
                405,
                "Invalid HTTP request: Only GET method is allowed for serving",
            ));
        }
        let path = ctx.request.path.clone();
        if !is_safe_path(&path) {
            return Err(HttpError::protocol("Invalid Request: File name is invalid"));
        }

        self.update_cache(&path).await?;

        let accepts_gzip = accepts_encoding(&ctx.request.accept_encoding, "gzip");
        let accepts_brotli = accepts_encoding(&ctx.request.accept_encoding, "br");

        let served = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| HttpError::server("File cache lock poisoned"))?;
            let canonical = match cache.get_mut(&path) {
                None => None,
                Some(entry) => {
                    entry.hits += 1;
                    Some((
                        entry.extension.clone(),
                        entry.content.clone(),
                        entry.gzip.clone(),
                    ))
                }
            };
            canonical.map(|(extension, uncompressed, inline_gzip)| {
                let mut body = uncompressed;
                let mut encoding = "";
                if accepts_brotli {
                    if let Some(variant) = cache.get(&format!("{path}.br")) {
                        body = variant.content.clone();
                        encoding = "br";
                    }
                }
                if encoding.is_empty() && accepts_gzip {
                    if let Some(variant) = cache.get(&format!("{path}.gz")) {
                        body = variant.content.clone();
                        encoding = "gzip";
                    } else if let Some(gzip) = inline_gzip {
                        body = gzip;
                        encoding = "gzip";
                    }
                }
                (body, encoding, extension)
            })
        };

        let Some((body, encoding, extension)) = served else {
            return ctx.send_text_with_status(404, "File not found").await;
        };

        if let Some(mime) = mime::content_type(&extension) {
            ctx.response.set_content_type(mime)?;
        }
        if !encoding.is_empty() {
            ctx.response.set_content_encoding(encoding)?;
        }
        // Cross-origin isolation so browser clients can use SharedArrayBuffer.
        ctx.response
            .set_header("Cross-Origin-Opener-Policy", "same-origin")?;
        ctx.response
            .set_header("Cross-Origin-Embedder-Policy", "require-corp")?;
        ctx.send_bytes(&body).await
    }
}

/// Reject traversal and hidden-file shapes outright.
fn is_safe_path(path: &str) -> bool {
    !(path.contains("..")
        || path.contains("//")
        || path.contains('\\')
        || path.starts_with('.')
        || path.contains("/."))
}

fn accepts_encoding(accept_encoding: &str, coding: &str) -> bool {
    accept_encoding
        .split(',')
        .any(|part| part.split(';').next().unwrap_or("").trim() == coding)
}

fn disk_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(extension);
    PathBuf::from(os)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn compress_if_smaller(content: &[u8]) -> Result<Option<Bytes>, HttpError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|e| HttpError::server(format!("Gzip failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| HttpError::server(format!("Gzip failed: {e}")))?;
    if compressed.len() < content.len() {
        Ok(Some(Bytes::from(compressed)))
    } else {
        Ok(None)
    }
}
