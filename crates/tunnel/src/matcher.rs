//! Public URL extraction from relay output
//!
//! The relay's banner format is not a stable API, so matching is kept here
//! behind [`UrlMatcher`] and the domain is passed in as configuration.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::watch;

/// Finds the first `https://<subdomain>.<domain>` URL in a line
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    pattern: Regex,
}

impl UrlMatcher {
    /// Build a matcher for URLs under `domain` (e.g. `lhr.life`)
    pub fn for_domain(domain: &str) -> Result<Self, regex::Error> {
        let domain = domain.trim().trim_start_matches('.');
        let pattern = Regex::new(&format!(
            r"https://[a-zA-Z0-9.-]+\.{}",
            regex::escape(domain)
        ))?;
        Ok(Self { pattern })
    }

    pub fn find(&self, line: &str) -> Option<String> {
        self.pattern.find(line).map(|m| m.as_str().to_string())
    }
}

/// Single-assignment slot holding the resolved public URL
///
/// The first [`fill`](UrlSlot::fill) wins; later values are discarded.
#[derive(Debug, Clone)]
pub struct UrlSlot {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for UrlSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Store `url` if the slot is still empty; returns whether it was stored
    pub fn fill(&self, url: String) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(url);
            true
        })
    }

    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Wait until the slot is filled
    pub async fn resolved(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(url) = rx.borrow_and_update().clone() {
                return url;
            }
            // the sender lives as long as `self`
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
