//! Authenticated tunnel through a managed provider

use async_trait::async_trait;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::credentials::{CredentialStore, TokenPrompt};
use crate::error::TunnelError;
use crate::strategy::Tunnel;

/// Substrings that mark a provider failure as an authentication problem
const AUTH_MARKERS: &[&str] = &[
    "authtoken",
    "unauthorized",
    "invalid",
    "expired",
    "authentication",
    "err_ngrok_105",
    "err_ngrok_106",
    "err_ngrok_107",
];

/// Connection to a third-party tunneling service
#[async_trait]
pub trait ManagedProvider: Send {
    fn name(&self) -> &'static str;

    /// Open an HTTPS endpoint forwarding to `http://localhost:<local_port>`
    async fn connect(&mut self, token: &str, local_port: u16) -> Result<String, TunnelError>;

    async fn disconnect(&mut self) -> Result<(), TunnelError>;
}

/// Tunnel strategy that needs an authtoken
pub struct ManagedTunnel<P> {
    local_port: u16,
    provider: P,
    credentials: CredentialStore,
    prompt: Box<dyn TokenPrompt + Send>,
    public_url: Option<String>,
    connected: bool,
}

impl<P: ManagedProvider> ManagedTunnel<P> {
    pub fn new(
        provider: P,
        credentials: CredentialStore,
        prompt: Box<dyn TokenPrompt + Send>,
        local_port: u16,
    ) -> Self {
        Self {
            local_port,
            provider,
            credentials,
            prompt,
            public_url: None,
            connected: false,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Interactive setup without stalling the runtime's other tasks
    fn prompt_for_token(&mut self) -> Option<String> {
        let credentials = &self.credentials;
        let prompt = self.prompt.as_mut();
        let mut setup = move || credentials.interactive_setup(prompt);

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(setup)
            }
            _ => setup(),
        }
    }

    async fn connect(&mut self, token: &str) -> Result<String, TunnelError> {
        tracing::info!(
            "Starting {} tunnel for port {}",
            self.provider.name(),
            self.local_port
        );

        match self.provider.connect(token, self.local_port).await {
            Ok(url) => {
                let url = normalize_https(&url);
                tracing::info!("{} tunnel established: {}", self.provider.name(), url);
                self.connected = true;
                self.public_url = Some(url.clone());
                Ok(url)
            }
            Err(e) => Err(classify_failure(e)),
        }
    }
}

#[async_trait]
impl<P: ManagedProvider> Tunnel for ManagedTunnel<P> {
    fn name(&self) -> &'static str {
        self.provider.name()
    }

    async fn start(&mut self) -> Result<String, TunnelError> {
        if let Some(url) = &self.public_url {
            return Ok(url.clone());
        }

        let token = match self.credentials.get() {
            Some(token) => token,
            None => {
                self.prompt.notice("No ngrok authtoken found.");
                self.prompt_for_token().ok_or(TunnelError::MissingToken)?
            }
        };

        let err = match self.connect(&token).await {
            Ok(url) => return Ok(url),
            Err(e) => e,
        };
        if !matches!(err, TunnelError::Auth(_)) {
            tracing::warn!("{} tunnel failed: {}", self.name(), err);
            return Err(err);
        }

        // one re-setup and one more attempt, never more
        tracing::warn!("{} rejected the authtoken: {}", self.name(), err);
        self.prompt
            .notice("\nAuthentication failed. Your authtoken may be invalid or expired.");
        match self.prompt_for_token() {
            Some(token) => self.connect(&token).await,
            None => Err(err),
        }
    }

    async fn stop(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.public_url = None;

        match self.provider.disconnect().await {
            Ok(()) => tracing::info!("{} tunnel closed", self.provider.name()),
            Err(e) => tracing::debug!("{} disconnect failed: {}", self.provider.name(), e),
        }
    }

    fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

/// Whether a provider message describes a rejected credential
pub fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    AUTH_MARKERS.iter().any(|marker| message.contains(marker))
}

fn classify_failure(err: TunnelError) -> TunnelError {
    match err {
        TunnelError::Provider(message) if is_auth_failure(&message) => TunnelError::Auth(message),
        other => other,
    }
}

fn normalize_https(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::{ScriptedPrompt, VALID_TOKEN};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const OTHER_TOKEN: &str = "3zyxwvutsrqponmlkjihgfedcba_9876543210";

    /// Provider replaying canned results and recording every call
    #[derive(Default)]
    struct FakeProvider {
        results: VecDeque<Result<String, TunnelError>>,
        tokens: Vec<String>,
        disconnects: usize,
    }

    impl FakeProvider {
        fn replying(results: Vec<Result<String, TunnelError>>) -> Self {
            Self {
                results: results.into(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ManagedProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn connect(&mut self, token: &str, _local_port: u16) -> Result<String, TunnelError> {
            self.tokens.push(token.to_string());
            self.results
                .pop_front()
                .unwrap_or_else(|| Err(TunnelError::Provider("no scripted result".into())))
        }

        async fn disconnect(&mut self) -> Result<(), TunnelError> {
            self.disconnects += 1;
            Err(TunnelError::Provider("already gone".into()))
        }
    }

    fn auth_error() -> TunnelError {
        TunnelError::Provider("authentication failed: ERR_NGROK_107".into())
    }

    fn tunnel(
        dir: &TempDir,
        stored: Option<&str>,
        provider: FakeProvider,
        prompt: ScriptedPrompt,
    ) -> ManagedTunnel<FakeProvider> {
        let store = CredentialStore::new(dir.path().join("config.json"));
        if let Some(token) = stored {
            store.save(token).unwrap();
        }
        ManagedTunnel::new(provider, store, Box::new(prompt), 8000)
    }

    #[tokio::test]
    async fn test_stored_token_connects_once() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![Ok("http://abc.ngrok.example".into())]);
        let mut tunnel = tunnel(&dir, Some(VALID_TOKEN), provider, ScriptedPrompt::default());

        let url = tunnel.start().await.unwrap();

        assert_eq!(url, "https://abc.ngrok.example");
        assert_eq!(tunnel.public_url(), Some("https://abc.ngrok.example"));
        assert_eq!(tunnel.provider().tokens, vec![VALID_TOKEN.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_token_declined_never_calls_provider() {
        let dir = TempDir::new().unwrap();
        let mut tunnel = tunnel(&dir, None, FakeProvider::default(), ScriptedPrompt::declining());

        let err = tunnel.start().await.unwrap_err();

        assert!(matches!(err, TunnelError::MissingToken));
        assert!(tunnel.provider().tokens.is_empty());
        assert_eq!(tunnel.public_url(), None);
    }

    #[tokio::test]
    async fn test_missing_token_entered_during_setup() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![Ok("https://new.ngrok.example".into())]);
        let mut tunnel = tunnel(&dir, None, provider, ScriptedPrompt::accepting(&[VALID_TOKEN]));

        assert_eq!(tunnel.start().await.unwrap(), "https://new.ngrok.example");
        assert_eq!(tunnel.provider().tokens, vec![VALID_TOKEN.to_string()]);
        assert_eq!(
            CredentialStore::new(dir.path().join("config.json")).get().as_deref(),
            Some(VALID_TOKEN)
        );
    }

    #[tokio::test]
    async fn test_auth_failure_retries_with_new_token() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![
            Err(auth_error()),
            Ok("https://retry.ngrok.example".into()),
        ]);
        let mut tunnel = tunnel(
            &dir,
            Some(VALID_TOKEN),
            provider,
            ScriptedPrompt::accepting(&[OTHER_TOKEN]),
        );

        assert_eq!(tunnel.start().await.unwrap(), "https://retry.ngrok.example");
        assert_eq!(
            tunnel.provider().tokens,
            vec![VALID_TOKEN.to_string(), OTHER_TOKEN.to_string()]
        );
    }

    #[tokio::test]
    async fn test_auth_failure_retried_exactly_once() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![
            Err(auth_error()),
            Err(auth_error()),
            Ok("https://never.ngrok.example".into()),
        ]);
        let mut tunnel = tunnel(
            &dir,
            Some(VALID_TOKEN),
            provider,
            ScriptedPrompt::accepting(&[OTHER_TOKEN, OTHER_TOKEN]),
        );

        let err = tunnel.start().await.unwrap_err();

        assert!(matches!(err, TunnelError::Auth(_)));
        assert_eq!(tunnel.provider().tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_setup_declined() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![Err(auth_error())]);
        let mut tunnel = tunnel(&dir, Some(VALID_TOKEN), provider, ScriptedPrompt::declining());

        assert!(matches!(tunnel.start().await, Err(TunnelError::Auth(_))));
        assert_eq!(tunnel.provider().tokens.len(), 1);
    }

    /// Prompt that takes a while to answer and records how far a ticker got meanwhile
    struct SlowPrompt {
        inner: ScriptedPrompt,
        ticks: Arc<AtomicUsize>,
        ticks_while_prompting: Arc<AtomicUsize>,
    }

    impl TokenPrompt for SlowPrompt {
        fn notice(&mut self, message: &str) {
            self.inner.notice(message);
        }

        fn confirm(&mut self, question: &str) -> std::io::Result<bool> {
            self.inner.confirm(question)
        }

        fn read_token(&mut self, label: &str) -> std::io::Result<String> {
            let before = self.ticks.load(Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(300));
            let after = self.ticks.load(Ordering::SeqCst);
            self.ticks_while_prompting
                .store(after - before, Ordering::SeqCst);
            self.inner.read_token(label)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_setup_prompt_leaves_runtime_responsive() {
        let dir = TempDir::new().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_while_prompting = Arc::new(AtomicUsize::new(0));

        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let prompt = SlowPrompt {
            inner: ScriptedPrompt::accepting(&[VALID_TOKEN]),
            ticks: ticks.clone(),
            ticks_while_prompting: ticks_while_prompting.clone(),
        };
        let provider = FakeProvider::replying(vec![Ok("https://new.ngrok.example".into())]);
        let store = CredentialStore::new(dir.path().join("config.json"));
        let mut tunnel = ManagedTunnel::new(provider, store, Box::new(prompt), 8000);

        assert_eq!(tunnel.start().await.unwrap(), "https://new.ngrok.example");
        ticker.abort();

        assert!(ticks_while_prompting.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![
            Err(TunnelError::Provider("connection reset by peer".into())),
            Ok("https://never.ngrok.example".into()),
        ]);
        let mut tunnel = tunnel(
            &dir,
            Some(VALID_TOKEN),
            provider,
            ScriptedPrompt::accepting(&[OTHER_TOKEN]),
        );

        assert!(matches!(tunnel.start().await, Err(TunnelError::Provider(_))));
        assert_eq!(tunnel.provider().tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_disconnects_once_and_swallows_errors() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(vec![Ok("https://abc.ngrok.example".into())]);
        let mut tunnel = tunnel(&dir, Some(VALID_TOKEN), provider, ScriptedPrompt::default());

        tunnel.stop().await;
        assert_eq!(tunnel.provider().disconnects, 0);

        tunnel.start().await.unwrap();
        tunnel.stop().await;
        tunnel.stop().await;

        assert_eq!(tunnel.provider().disconnects, 1);
        assert_eq!(tunnel.public_url(), None);
    }

    #[test]
    fn test_auth_classification() {
        assert!(is_auth_failure("ERR_NGROK_105: bad token"));
        assert!(is_auth_failure("The authtoken you specified is Invalid"));
        assert!(is_auth_failure("401 Unauthorized"));
        assert!(!is_auth_failure("connection reset by peer"));

        assert!(matches!(
            classify_failure(TunnelError::Provider("token expired".into())),
            TunnelError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(TunnelError::Timeout(std::time::Duration::from_secs(1))),
            TunnelError::Timeout(_)
        ));
    }

    #[test]
    fn test_normalize_https() {
        assert_eq!(normalize_https("http://a.example"), "https://a.example");
        assert_eq!(normalize_https("https://a.example"), "https://a.example");
    }
}
