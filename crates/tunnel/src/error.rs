//! Error types for tunnel strategies

use std::fmt;
use std::time::Duration;

/// Why a tunnel strategy could not produce a public URL
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// A required external binary is not installed
    #[error("{binary} is not installed or not on PATH")]
    DependencyMissing { binary: String },
    /// No authtoken is stored and none was entered
    #[error("no authtoken configured")]
    MissingToken,
    /// The provider rejected the authtoken
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Any other provider failure
    #[error("tunnel provider error: {0}")]
    Provider(String),
    #[error("no public URL received within {0:?}")]
    Timeout(Duration),
    #[error("tunnel process exited before a public URL appeared ({0})")]
    ProcessExited(String),
    #[error("failed to start tunnel process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("invalid URL pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// Every strategy in the fallback chain failed
    #[error("all tunnel services failed: {}", FailureList(.0))]
    Exhausted(Vec<StrategyFailure>),
}

/// One failed attempt in the fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
}

struct FailureList<'a>(&'a [StrategyFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.strategy, failure.reason)?;
        }
        Ok(())
    }
}
