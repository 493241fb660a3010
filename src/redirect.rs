//! Path redirects and the HTTP→HTTPS upgrade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use tracing::debug;

use crate::error::HttpError;
use crate::http::context::Context;

/// Maps lowercased source paths to destinations, with an optional blanket
/// upgrade of plaintext port-80 traffic to HTTPS. Read-mostly; insertions
/// are rare and validated.
#[derive(Default)]
pub struct Redirector {
    map: Mutex<HashMap<String, String>>,
    upgrade_insecure: AtomicBool,
}

impl Redirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_upgrade_insecure(&self, enabled: bool) {
        self.upgrade_insecure.store(enabled, Ordering::Relaxed);
    }

    pub fn upgrade_insecure(&self) -> bool {
        self.upgrade_insecure.load(Ordering::Relaxed)
    }

    /// Register a redirect. Source paths carry no surrounding slashes (they
    /// are matched against the request's stripped path); destinations are
    /// absolute.
    pub fn insert(&self, source: &str, destination: &str) -> Result<()> {
        if source.starts_with('/') || source.ends_with('/') {
            bail!("Redirect source must not begin or end with '/': {source}");
        }
        if !destination.starts_with('/') {
            bail!("Redirect destination must begin with '/': {destination}");
        }
        if let Ok(mut map) = self.map.lock() {
            map.insert(source.to_ascii_lowercase(), destination.to_string());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The blanket upgrade applies only to plaintext traffic on port 80.
    pub fn should_upgrade(&self, local_port: u16) -> bool {
        self.upgrade_insecure() && local_port == 80
    }

    /// Emit a 301 when this request matches; `Ok(false)` hands the request
    /// on to the next handler. The insecure upgrade outranks the map.
    pub async fn try_handle(&self, ctx: &mut Context<'_>) -> Result<bool, HttpError> {
        if self.should_upgrade(ctx.local_addr.port()) {
            let location = format!(
                "https://{}/{}",
                ctx.request.host_no_port, ctx.request.path
            );
            debug!("Upgrading insecure request to {location}");
            return self.send_redirect(ctx, &location).await.map(|_| true);
        }

        let destination = self
            .map
            .lock()
            .ok()
            .and_then(|map| map.get(&ctx.request.path_lower).cloned());
        match destination {
            Some(location) => self.send_redirect(ctx, &location).await.map(|_| true),
            None => Ok(false),
        }
    }

    async fn send_redirect(&self, ctx: &mut Context<'_>, location: &str) -> Result<(), HttpError> {
        ctx.response.set_status(301)?;
        ctx.response.set_header("Location", location)?;
        ctx.send_bytes(b"").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_validates_shapes() {
        let redirector = Redirector::new();
        assert!(redirector.insert("old-page", "/new-page").is_ok());
        assert!(redirector.insert("/old", "/new").is_err());
        assert!(redirector.insert("old/", "/new").is_err());
        assert!(redirector.insert("old", "new").is_err());
        assert_eq!(redirector.len(), 1);
    }

    #[test]
    fn sources_are_lowercased() {
        let redirector = Redirector::new();
        redirector.insert("OldPage", "/new").unwrap();
        let map = redirector.map.lock().unwrap();
        assert!(map.contains_key("oldpage"));
    }
}
