//! Lifecycle of one sharing session
//!
//! Server first, then the tunnel; teardown runs in the opposite order and
//! is safe from any state.

use std::future::Future;

use fileserver::{BindError, FileServerApi, RunningServer, SharedFileSet};
use tunnel::{TunnelError, TunnelOrchestrator};

/// Builds the tunnel chain once the server's port is known
pub type TunnelFactory = Box<dyn FnOnce(u16) -> Result<TunnelOrchestrator, TunnelError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ServerStarted,
    TunnelEstablished,
    Running,
    ShuttingDown,
    Stopped,
}

/// What ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    QuitKey,
    Interrupt,
    Terminate,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error("file server is not running")]
    ServerNotStarted,
}

pub struct SessionController {
    state: SessionState,
    files: SharedFileSet,
    host: String,
    port: u16,
    server: Option<RunningServer>,
    factory: Option<TunnelFactory>,
    tunnel: Option<TunnelOrchestrator>,
}

impl SessionController {
    pub fn new(
        files: SharedFileSet,
        host: impl Into<String>,
        port: u16,
        factory: TunnelFactory,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            files,
            host: host.into(),
            port,
            server: None,
            factory: Some(factory),
            tunnel: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Port the file server actually bound
    pub fn local_port(&self) -> Option<u16> {
        self.server.as_ref().map(RunningServer::port)
    }

    pub fn public_url(&self) -> Option<&str> {
        self.tunnel
            .as_ref()
            .and_then(TunnelOrchestrator::session)
            .map(|s| s.public_url.as_str())
    }

    /// Bind the port and start serving the files
    pub async fn start_server(&mut self) -> Result<u16, SessionError> {
        if let Some(port) = self.local_port() {
            return Ok(port);
        }

        let server = FileServerApi::new(self.files.clone())
            .bind(&self.host, self.port)
            .await?;
        let port = server.port();
        println!("\nHTTP server started on {}", server.local_addr());

        self.server = Some(server);
        self.state = SessionState::ServerStarted;
        Ok(port)
    }

    /// Bring up a public tunnel to the running server
    ///
    /// On failure the server is stopped as well.
    pub async fn establish_tunnel(
        &mut self,
        prefer_unauthenticated: bool,
    ) -> Result<String, SessionError> {
        let port = self.local_port().ok_or(SessionError::ServerNotStarted)?;

        let outcome = match self.factory.take() {
            Some(factory) => match factory(port) {
                Ok(mut orchestrator) => {
                    let result = orchestrator.start(prefer_unauthenticated).await;
                    self.tunnel = Some(orchestrator);
                    result
                }
                Err(e) => Err(e),
            },
            None => match self.tunnel.as_mut() {
                Some(orchestrator) => orchestrator.start(prefer_unauthenticated).await,
                None => Err(TunnelError::Provider("tunnel chain already consumed".into())),
            },
        };

        match outcome {
            Ok(url) => {
                self.state = SessionState::TunnelEstablished;
                Ok(url)
            }
            Err(e) => {
                self.shutdown().await;
                Err(e.into())
            }
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> ShutdownTrigger
    where
        F: Future<Output = ShutdownTrigger>,
    {
        self.state = SessionState::Running;
        let trigger = shutdown.await;
        tracing::info!(?trigger, "Shutdown requested");
        trigger
    }

    /// Stop the tunnel, then the server
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::ShuttingDown;

        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.stop().await;
        }
        if let Some(server) = self.server.as_mut() {
            server.stop().await;
        }

        self.state = SessionState::Stopped;
    }
}
