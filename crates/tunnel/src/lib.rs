//! Public tunnels for a local HTTP port
//!
//! Two strategies are provided: an unauthenticated SSH relay and a managed
//! provider that needs an authtoken. [`TunnelOrchestrator`] chains them.

pub mod credentials;
pub mod error;
pub mod managed;
pub mod matcher;
pub mod ngrok;
pub mod orchestrator;
mod process;
pub mod relay;
pub mod strategy;

pub use credentials::{mask_token, CredentialStore, TerminalPrompt, TokenPrompt};
pub use error::{StrategyFailure, TunnelError};
pub use managed::{ManagedProvider, ManagedTunnel};
pub use matcher::{UrlMatcher, UrlSlot};
pub use ngrok::{NgrokConfig, NgrokProvider};
pub use orchestrator::{TunnelOrchestrator, TunnelSession, REMEDIATION};
pub use process::ProcessCommand;
pub use relay::{RelayConfig, RelayTunnel, DEFAULT_RELAY_DOMAIN, DEFAULT_RELAY_HOST};
pub use strategy::Tunnel;
