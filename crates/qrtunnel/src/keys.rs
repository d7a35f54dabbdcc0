//! Interactive quit key handling
//!
//! A [`KeyPoller`] is chosen once at startup: raw-mode terminal input when
//! stdin is a TTY, otherwise a poller that never reports a key.

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Keys the session reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    Quit,
    /// Ctrl+C while the terminal is in raw mode
    Interrupt,
}

/// Source of operator key presses
pub trait KeyPoller: Send {
    /// Wait up to `timeout` for a relevant key
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<SessionKey>>;
}

/// Raw-mode terminal input; the terminal is restored on drop
pub struct TerminalKeys {
    _raw: (),
}

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { _raw: () })
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

impl KeyPoller for TerminalKeys {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<SessionKey>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                Ok(classify(key.code, key.modifiers))
            }
            _ => Ok(None),
        }
    }
}

/// Used when stdin is not a terminal; only signals end the session
pub struct NoKeys;

impl KeyPoller for NoKeys {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<SessionKey>> {
        std::thread::sleep(timeout);
        Ok(None)
    }
}

fn classify(code: KeyCode, modifiers: KeyModifiers) -> Option<SessionKey> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(SessionKey::Interrupt)
        }
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(SessionKey::Quit),
        _ => None,
    }
}

/// Pick the poller for the current stdin
pub fn select_key_poller() -> Box<dyn KeyPoller> {
    if !io::stdin().is_terminal() {
        tracing::debug!("stdin is not a terminal; quit key disabled");
        return Box::new(NoKeys);
    }
    match TerminalKeys::new() {
        Ok(keys) => Box::new(keys),
        Err(e) => {
            tracing::warn!("Could not enable raw terminal mode: {}", e);
            Box::new(NoKeys)
        }
    }
}

/// Background task polling a [`KeyPoller`] until a key arrives or it is closed
pub struct KeyWatch {
    rx: oneshot::Receiver<SessionKey>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl KeyWatch {
    pub fn spawn(mut poller: Box<dyn KeyPoller>) -> Self {
        let (tx, rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let task = tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Relaxed) {
                match poller.poll_key(POLL_INTERVAL) {
                    Ok(Some(key)) => {
                        let _ = tx.send(key);
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Key polling failed: {}", e);
                        break;
                    }
                }
            }
            // poller dropped here; restores the terminal
        });

        Self { rx, stop, task }
    }

    /// Resolves with the first key; never resolves if polling ended without one
    pub async fn key(&mut self) -> SessionKey {
        match (&mut self.rx).await {
            Ok(key) => key,
            Err(_) => std::future::pending().await,
        }
    }

    /// Stop polling and wait for the terminal to be restored
    pub async fn close(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Option<SessionKey>>);

    impl KeyPoller for Scripted {
        fn poll_key(&mut self, _timeout: Duration) -> io::Result<Option<SessionKey>> {
            Ok(self.0.pop_front().flatten())
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(KeyCode::Char('q'), KeyModifiers::NONE),
            Some(SessionKey::Quit)
        );
        assert_eq!(
            classify(KeyCode::Char('Q'), KeyModifiers::SHIFT),
            Some(SessionKey::Quit)
        );
        assert_eq!(
            classify(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(SessionKey::Interrupt)
        );
        assert_eq!(classify(KeyCode::Char('x'), KeyModifiers::NONE), None);
        assert_eq!(classify(KeyCode::Enter, KeyModifiers::NONE), None);
    }

    #[tokio::test]
    async fn test_watch_reports_first_key() {
        let poller = Scripted(VecDeque::from([None, None, Some(SessionKey::Quit)]));
        let mut watch = KeyWatch::spawn(Box::new(poller));

        let key = tokio::time::timeout(Duration::from_secs(2), watch.key())
            .await
            .unwrap();

        assert_eq!(key, SessionKey::Quit);
        watch.close().await;
    }

    #[tokio::test]
    async fn test_close_without_key() {
        let mut watch = KeyWatch::spawn(Box::new(NoKeys));

        let pending = tokio::time::timeout(Duration::from_millis(250), watch.key()).await;
        assert!(pending.is_err());

        tokio::time::timeout(Duration::from_secs(2), watch.close())
            .await
            .unwrap();
    }
}
