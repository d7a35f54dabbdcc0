//! ngrok agent provider
//!
//! Runs `ngrok http <port>` with JSON logging on stdout and reads the
//! assigned public URL from the `started tunnel` record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::managed::ManagedProvider;
use crate::matcher::UrlSlot;
use crate::process::{spawn_piped, terminate_process, wait_for_url, ProcessCommand};

const TOKEN_ENV: &str = "NGROK_AUTHTOKEN";

/// Agent settings
#[derive(Debug, Clone)]
pub struct NgrokConfig {
    pub program: String,
    pub wait_budget: Duration,
    pub stop_grace: Duration,
}

impl Default for NgrokConfig {
    fn default() -> Self {
        Self {
            program: "ngrok".to_string(),
            wait_budget: Duration::from_secs(20),
            stop_grace: Duration::from_secs(3),
        }
    }
}

impl NgrokConfig {
    /// Agent invocation for `local_port`; the token travels in the environment
    pub fn command(&self, token: &str, local_port: u16) -> ProcessCommand {
        ProcessCommand::new(
            self.program.clone(),
            [
                "http".to_string(),
                local_port.to_string(),
                "--log".to_string(),
                "stdout".to_string(),
                "--log-format".to_string(),
                "json".to_string(),
            ],
        )
        .env(TOKEN_ENV, token)
    }
}

/// One record of the agent's JSON log
#[derive(Debug, Default, Deserialize)]
struct AgentLogLine {
    #[serde(default)]
    lvl: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    err: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum AgentEvent {
    Url(String),
    Failure(String),
    Other,
}

fn interpret(line: &str) -> AgentEvent {
    match serde_json::from_str::<AgentLogLine>(line) {
        Ok(record) => {
            if let Some(url) = record.url.filter(|u| u.starts_with("http")) {
                return AgentEvent::Url(url);
            }
            if matches!(record.lvl.as_str(), "eror" | "crit") {
                let message = record
                    .err
                    .filter(|e| !e.is_empty() && e != "<nil>")
                    .unwrap_or(record.msg);
                return AgentEvent::Failure(message.trim().to_string());
            }
            AgentEvent::Other
        }
        Err(_) if line.contains("ERROR") || line.contains("ERR_NGROK") => {
            AgentEvent::Failure(line.to_string())
        }
        Err(_) => AgentEvent::Other,
    }
}

/// [`ManagedProvider`] backed by the ngrok agent binary
pub struct NgrokProvider {
    config: NgrokConfig,
    command_override: Option<ProcessCommand>,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl NgrokProvider {
    pub fn new(config: NgrokConfig) -> Self {
        Self {
            config,
            command_override: None,
            child: None,
            readers: Vec::new(),
        }
    }

    /// Run `command` instead of the agent; the token env var is still set
    pub fn with_command(mut self, command: ProcessCommand) -> Self {
        self.command_override = Some(command);
        self
    }

    fn command(&self, token: &str, local_port: u16) -> ProcessCommand {
        match &self.command_override {
            Some(command) => command.clone().env(TOKEN_ENV, token),
            None => self.config.command(token, local_port),
        }
    }

    async fn shutdown_agent(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate_process(&mut child, self.config.stop_grace).await;
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Default for NgrokProvider {
    fn default() -> Self {
        Self::new(NgrokConfig::default())
    }
}

#[async_trait]
impl ManagedProvider for NgrokProvider {
    fn name(&self) -> &'static str {
        "ngrok"
    }

    async fn connect(&mut self, token: &str, local_port: u16) -> Result<String, TunnelError> {
        self.shutdown_agent().await;

        let mut child = spawn_piped(&self.command(token, local_port))?;
        let slot = UrlSlot::new();
        let (last_error, _) = watch::channel(None);
        let last_error = Arc::new(last_error);

        if let Some(stdout) = child.stdout.take() {
            self.readers
                .push(tokio::spawn(read_agent_log(stdout, slot.clone(), last_error.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers
                .push(tokio::spawn(read_agent_log(stderr, slot.clone(), last_error.clone())));
        }

        let outcome = wait_for_url(&mut child, &slot, &mut self.readers, self.config.wait_budget).await;
        self.child = Some(child);

        match outcome {
            Ok(url) => Ok(url),
            Err(e) => {
                self.shutdown_agent().await;

                let detail = last_error.borrow().clone();
                Err(match detail {
                    Some(message) => TunnelError::Provider(message),
                    None => TunnelError::Provider(e.to_string()),
                })
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TunnelError> {
        if self.child.is_some() {
            self.shutdown_agent().await;
            tracing::debug!("ngrok agent stopped");
        }
        Ok(())
    }
}

async fn read_agent_log<R>(
    reader: R,
    slot: UrlSlot,
    last_error: Arc<watch::Sender<Option<String>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                tracing::debug!("ngrok: {}", line);

                match interpret(line) {
                    AgentEvent::Url(url) => {
                        slot.fill(url);
                    }
                    AgentEvent::Failure(message) => {
                        last_error.send_replace(Some(message));
                    }
                    AgentEvent::Other => {}
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("ngrok output read error: {}", e);
                break;
            }
        }
    }
}
