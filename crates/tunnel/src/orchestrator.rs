//! Fallback chain over the tunnel strategies
//!
//! The relay is tried first when preferred, then the managed provider.
//! Whichever succeeds becomes the single live tunnel for the session.

use crate::error::{StrategyFailure, TunnelError};
use crate::strategy::Tunnel;

/// Printed after every strategy has failed
pub const REMEDIATION: &str = "Troubleshooting:\n  \
    1. Retry with --noauth to use the SSH relay (no account needed)\n  \
    2. Run 'qrtunnel --setup' to configure an ngrok authtoken\n  \
    3. Check your internet connection and firewall settings";

/// The strategy currently forwarding traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSession {
    pub strategy: &'static str,
    pub public_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Live {
    Relay,
    Managed,
}

pub struct TunnelOrchestrator {
    relay: Box<dyn Tunnel>,
    managed: Box<dyn Tunnel>,
    live: Option<Live>,
    session: Option<TunnelSession>,
}

impl TunnelOrchestrator {
    pub fn new(relay: Box<dyn Tunnel>, managed: Box<dyn Tunnel>) -> Self {
        Self {
            relay,
            managed,
            live: None,
            session: None,
        }
    }

    /// Bring up a tunnel and return its public URL
    ///
    /// With `prefer_unauthenticated` the relay is tried first; the managed
    /// provider is always the last resort. Never tries a strategy twice.
    pub async fn start(&mut self, prefer_unauthenticated: bool) -> Result<String, TunnelError> {
        if let Some(session) = &self.session {
            return Ok(session.public_url.clone());
        }

        let mut failures = Vec::new();

        if prefer_unauthenticated {
            match self.relay.start().await {
                Ok(url) => return Ok(self.adopt(Live::Relay, url)),
                Err(e) => {
                    self.relay.stop().await;
                    tracing::warn!(
                        "{} failed: {}; falling back to {}",
                        self.relay.name(),
                        e,
                        self.managed.name()
                    );
                    failures.push(StrategyFailure {
                        strategy: self.relay.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match self.managed.start().await {
            Ok(url) => Ok(self.adopt(Live::Managed, url)),
            Err(e) => {
                tracing::warn!("{} failed: {}", self.managed.name(), e);
                failures.push(StrategyFailure {
                    strategy: self.managed.name(),
                    reason: e.to_string(),
                });
                Err(TunnelError::Exhausted(failures))
            }
        }
    }

    fn adopt(&mut self, live: Live, url: String) -> String {
        let strategy = match live {
            Live::Relay => self.relay.name(),
            Live::Managed => self.managed.name(),
        };
        self.live = Some(live);
        self.session = Some(TunnelSession {
            strategy,
            public_url: url.clone(),
        });
        url
    }

    pub fn session(&self) -> Option<&TunnelSession> {
        self.session.as_ref()
    }

    /// Stop the live strategy, if any
    pub async fn stop(&mut self) {
        self.session = None;
        match self.live.take() {
            Some(Live::Relay) => self.relay.stop().await,
            Some(Live::Managed) => self.managed.stop().await,
            None => {}
        }
    }
}
