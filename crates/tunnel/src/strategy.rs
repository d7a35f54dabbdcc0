use async_trait::async_trait;

use crate::error::TunnelError;

/// A way of exposing the local port at a public URL
#[async_trait]
pub trait Tunnel: Send {
    /// Provider name used in logs and error reports
    fn name(&self) -> &'static str;

    /// Establish the tunnel and return its public URL
    ///
    /// On failure nothing is left running.
    async fn start(&mut self) -> Result<String, TunnelError>;

    /// Tear the tunnel down; a no-op when nothing is running
    async fn stop(&mut self);

    /// URL of the running tunnel
    fn public_url(&self) -> Option<&str>;
}
