//! Reverse SSH tunnel through localhost.run
//!
//! Spawns the system `ssh` client with a remote forward and scrapes the
//! relay's banner for the assigned public URL. No account is needed.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::error::TunnelError;
use crate::matcher::{UrlMatcher, UrlSlot};
use crate::process::{spawn_piped, terminate_process, wait_for_url, ProcessCommand};
use crate::strategy::Tunnel;

pub const DEFAULT_RELAY_HOST: &str = "nokey@localhost.run";
pub const DEFAULT_RELAY_DOMAIN: &str = "lhr.life";
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(20);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Relay connection settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// SSH client binary
    pub ssh_program: String,
    /// `user@host` of the relay
    pub host: String,
    /// Port requested on the relay side
    pub remote_port: u16,
    /// Domain the relay hands out URLs under
    pub domain: String,
    pub keepalive_interval_secs: u32,
    pub connect_timeout_secs: u32,
    /// How long to wait for the URL to appear
    pub wait_budget: Duration,
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            host: DEFAULT_RELAY_HOST.to_string(),
            remote_port: 80,
            domain: DEFAULT_RELAY_DOMAIN.to_string(),
            keepalive_interval_secs: 60,
            connect_timeout_secs: 15,
            wait_budget: DEFAULT_WAIT_BUDGET,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl RelayConfig {
    /// The ssh invocation forwarding the relay to `localhost:local_port`
    pub fn command(&self, local_port: u16) -> ProcessCommand {
        let mut args = Vec::new();
        for option in [
            "StrictHostKeyChecking=no".to_string(),
            format!("UserKnownHostsFile={}", NULL_DEVICE),
            format!("ServerAliveInterval={}", self.keepalive_interval_secs),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "LogLevel=ERROR".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args.push("-T".to_string());
        args.push("-R".to_string());
        args.push(format!("{}:localhost:{}", self.remote_port, local_port));
        args.push(self.host.clone());

        ProcessCommand::new(self.ssh_program.clone(), args)
    }
}

/// Unauthenticated tunnel strategy backed by a child process
pub struct RelayTunnel {
    local_port: u16,
    command: ProcessCommand,
    matcher: UrlMatcher,
    wait_budget: Duration,
    stop_grace: Duration,
    child: Option<Child>,
    // held open so the relay session stays up
    stdin: Option<ChildStdin>,
    readers: Vec<JoinHandle<()>>,
    public_url: Option<String>,
}

impl RelayTunnel {
    pub fn new(config: &RelayConfig, local_port: u16) -> Result<Self, TunnelError> {
        Ok(Self {
            local_port,
            command: config.command(local_port),
            matcher: UrlMatcher::for_domain(&config.domain)?,
            wait_budget: config.wait_budget,
            stop_grace: config.stop_grace,
            child: None,
            stdin: None,
            readers: Vec::new(),
            public_url: None,
        })
    }

    /// Launch a different relay client with the same lifecycle
    pub fn with_command(mut self, command: ProcessCommand) -> Self {
        self.command = command;
        self
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }

    /// Whether a relay process is currently owned
    pub fn is_live(&self) -> bool {
        self.child.is_some()
    }
}

#[async_trait]
impl Tunnel for RelayTunnel {
    fn name(&self) -> &'static str {
        "localhost.run"
    }

    async fn start(&mut self) -> Result<String, TunnelError> {
        if let (Some(url), true) = (&self.public_url, self.is_live()) {
            return Ok(url.clone());
        }

        tracing::info!(
            "Starting {} tunnel for port {} via {}",
            self.name(),
            self.local_port,
            self.command.program
        );

        let mut child = spawn_piped(&self.command)?;
        let slot = UrlSlot::new();

        if let Some(stdout) = child.stdout.take() {
            self.readers
                .push(tokio::spawn(scan_lines(stdout, self.matcher.clone(), slot.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers
                .push(tokio::spawn(scan_lines(stderr, self.matcher.clone(), slot.clone())));
        }
        self.stdin = child.stdin.take();

        let outcome = wait_for_url(&mut child, &slot, &mut self.readers, self.wait_budget).await;
        self.child = Some(child);

        match outcome {
            Ok(url) => {
                tracing::info!("{} tunnel established: {}", self.name(), url);
                self.public_url = Some(url.clone());
                Ok(url)
            }
            Err(e) => {
                tracing::warn!("{} tunnel failed: {}", self.name(), e);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            terminate_process(&mut child, self.stop_grace).await;
            tracing::info!("{} tunnel closed", self.name());
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.public_url = None;
    }

    fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

/// Feed every line of `reader` to the matcher until EOF
///
/// Keeps draining after a match so the child never blocks on a full pipe.
pub(crate) async fn scan_lines<R>(reader: R, matcher: UrlMatcher, slot: UrlSlot)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                tracing::debug!("relay: {}", line);

                if let Some(url) = matcher.find(line) {
                    if slot.fill(url.clone()) {
                        tracing::debug!("Found tunnel URL: {}", url);
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Relay output read error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "relay.example";

    fn config() -> RelayConfig {
        RelayConfig {
            domain: DOMAIN.to_string(),
            wait_budget: Duration::from_secs(5),
            stop_grace: Duration::from_millis(300),
            ..Default::default()
        }
    }

    fn shell(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh", ["-c", script])
    }

    #[test]
    fn test_default_command_forwards_local_port() {
        let command = RelayConfig::default().command(8000);

        assert_eq!(command.program, "ssh");
        assert!(command.args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(command.args.contains(&"ServerAliveInterval=60".to_string()));
        assert!(command.args.contains(&"ConnectTimeout=15".to_string()));
        assert!(command.args.windows(2).any(|w| w == ["-R", "80:localhost:8000"]));
        assert_eq!(command.args.last().map(String::as_str), Some("nokey@localhost.run"));
    }

    #[tokio::test]
    async fn test_scan_lines_first_match_wins() {
        let output: &[u8] = b"===\nconnecting\nhttps://abc123.relay.example tunneled\n\
                              https://zzz999.relay.example\n";
        let slot = UrlSlot::new();

        scan_lines(output, UrlMatcher::for_domain(DOMAIN).unwrap(), slot.clone()).await;

        assert_eq!(slot.get().as_deref(), Some("https://abc123.relay.example"));
    }

    #[tokio::test]
    async fn test_scan_lines_survives_invalid_utf8() {
        let output: &[u8] = b"\xff\xfe garbage\nhttps://ok.relay.example\n";
        let slot = UrlSlot::new();

        scan_lines(output, UrlMatcher::for_domain(DOMAIN).unwrap(), slot.clone()).await;

        assert_eq!(slot.get().as_deref(), Some("https://ok.relay.example"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_immediately() {
        let config = RelayConfig {
            ssh_program: "qrtunnel-no-such-ssh-binary".to_string(),
            ..config()
        };
        let mut tunnel = RelayTunnel::new(&config, 8000).unwrap();

        let started = std::time::Instant::now();
        let err = tunnel.start().await.unwrap_err();

        assert!(matches!(err, TunnelError::DependencyMissing { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!tunnel.is_live());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_url_from_third_line() {
        let mut tunnel = RelayTunnel::new(&config(), 8000).unwrap().with_command(shell(
            "echo banner; echo 'waiting for tunnel' >&2; \
             echo 'https://abc123.relay.example tunneled with tls'; \
             echo 'https://second.relay.example'; sleep 30",
        ));

        let url = tunnel.start().await.unwrap();
        assert_eq!(url, "https://abc123.relay.example");
        assert_eq!(tunnel.public_url(), Some("https://abc123.relay.example"));
        assert!(tunnel.is_live());

        tunnel.stop().await;
        assert!(!tunnel.is_live());
        assert_eq!(tunnel.public_url(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_url_on_stderr_is_found() {
        let mut tunnel = RelayTunnel::new(&config(), 8000)
            .unwrap()
            .with_command(shell("echo 'https://err.relay.example' >&2; sleep 30"));

        assert_eq!(tunnel.start().await.unwrap(), "https://err.relay.example");
        tunnel.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_url_printed_right_before_exit_is_kept() {
        for _ in 0..25 {
            let mut tunnel = RelayTunnel::new(&config(), 8000)
                .unwrap()
                .with_command(shell("echo https://x.relay.example"));

            let url = tunnel.start().await.unwrap();
            assert_eq!(url, "https://x.relay.example");
            tunnel.stop().await;
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_before_url() {
        let mut tunnel = RelayTunnel::new(&config(), 8000)
            .unwrap()
            .with_command(shell("echo 'connection refused'; exit 255"));

        let err = tunnel.start().await.unwrap_err();

        assert!(matches!(err, TunnelError::ProcessExited(_)));
        assert!(!tunnel.is_live());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_that_ignores_sigterm() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!(
            "echo $$ > '{}'; trap '' TERM; echo 'no url here'; \
             while true; do sleep 0.1; done",
            pid_file.display()
        );
        let config = RelayConfig {
            wait_budget: Duration::from_millis(500),
            ..config()
        };
        let mut tunnel = RelayTunnel::new(&config, 8000)
            .unwrap()
            .with_command(shell(&script));

        let err = tunnel.start().await.unwrap_err();
        assert!(matches!(err, TunnelError::Timeout(_)));
        assert!(!tunnel.is_live());

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_err(), "relay process still alive");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut tunnel = RelayTunnel::new(&config(), 8000).unwrap();

        tunnel.stop().await;
        tunnel.stop().await;
        assert!(!tunnel.is_live());
    }
}
