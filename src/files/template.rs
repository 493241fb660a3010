//! Single-pass `#include` expansion for template-enabled files.
//!
//! The only directive is `#include PATH`; the included file's raw bytes are
//! spliced in with no recursive expansion. An unterminated start delimiter
//! is logged and the remainder emitted verbatim; an unrecognized directive
//! or missing include target is a server failure.

use std::path::Path;

use tracing::error;

use crate::error::HttpError;
use crate::util;

pub async fn expand(
    input: &[u8],
    root: &Path,
    start_delimiter: &[u8],
    end_delimiter: &[u8],
) -> Result<Vec<u8>, HttpError> {
    let mut output = Vec::with_capacity(input.len());
    let mut rest = input;

    while let Some(at) = util::find_subsequence(rest, start_delimiter) {
        output.extend_from_slice(&rest[..at]);
        let after_start = &rest[at + start_delimiter.len()..];

        let Some(end) = util::find_subsequence(after_start, end_delimiter) else {
            error!(
                "Unterminated template directive near byte {at}; emitting remainder verbatim"
            );
            output.extend_from_slice(&rest[at..]);
            return Ok(output);
        };

        output.extend_from_slice(&apply_directive(&after_start[..end], root).await?);
        rest = &after_start[end + end_delimiter.len()..];
    }

    output.extend_from_slice(rest);
    Ok(output)
}

async fn apply_directive(directive: &[u8], root: &Path) -> Result<Vec<u8>, HttpError> {
    let text = std::str::from_utf8(directive)
        .map_err(|_| HttpError::server("Template directive is not valid text"))?;
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 2 || tokens[0] != "#include" {
        return Err(HttpError::server(format!(
            "Unknown template directive: {}",
            text.trim()
        )));
    }
    let path = root.join(tokens[1]);
    tokio::fs::read(&path)
        .await
        .map_err(|e| HttpError::server(format!("Cannot include {}: {e}", path.display())))
}
