//! Extension → MIME lookup. Unknown extensions get no content type.

pub fn content_type(extension: &str) -> Option<&'static str> {
    match extension {
        "htm" | "html" => Some("text/html"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "css" => Some("text/css"),
        "js" => Some("application/javascript"),
        "json" => Some("application/json"),
        "svg" => Some("image/svg+xml"),
        "woff" => Some("font/woff"),
        "woff2" => Some("font/woff2"),
        "mp3" => Some("audio/mpeg"),
        "ogg" => Some("audio/ogg"),
        "txt" => Some("text/plain"),
        "xml" => Some("application/xml"),
        "wasm" => Some("application/wasm"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}
