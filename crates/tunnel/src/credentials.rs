//! Persisted ngrok authtoken and the interactive setup flow

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tokens must be longer than this to be accepted
const MIN_TOKEN_LEN: usize = 20;

const SIGNUP_URL: &str = "https://dashboard.ngrok.com/signup";
const TOKEN_URL: &str = "https://dashboard.ngrok.com/get-started/your-authtoken";

/// On-disk configuration record
///
/// Keys other than the token are kept as-is when the file is rewritten.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngrok_authtoken: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Operator interaction used by [`CredentialStore::interactive_setup`]
pub trait TokenPrompt {
    /// Show an informational message
    fn notice(&mut self, message: &str);
    /// Ask a yes/no question
    fn confirm(&mut self, question: &str) -> io::Result<bool>;
    /// Read a pasted token
    fn read_token(&mut self, label: &str) -> io::Result<String>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TokenPrompt for TerminalPrompt {
    fn notice(&mut self, message: &str) {
        println!("{}", message);
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(io::Error::other)
    }

    fn read_token(&mut self, label: &str) -> io::Result<String> {
        dialoguer::Password::new()
            .with_prompt(label)
            .allow_empty_password(true)
            .interact()
            .map_err(io::Error::other)
    }
}

/// Reads and writes the authtoken config file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.qrtunnel/config.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".qrtunnel")
            .join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AuthConfig {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!("Could not read {}: {}", self.path.display(), e);
                }
                return AuthConfig::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config {}: {}", self.path.display(), e);
            AuthConfig::default()
        })
    }

    /// Stored token, if any
    ///
    /// A missing, unreadable or corrupt config counts as "not configured".
    pub fn get(&self) -> Option<String> {
        self.load()
            .ngrok_authtoken
            .filter(|token| !token.trim().is_empty())
    }

    /// Persist `token`, replacing any previous one
    pub fn save(&self, token: &str) -> io::Result<()> {
        let mut config = self.load();
        config.ngrok_authtoken = Some(token.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        json.push('\n');
        std::fs::write(&self.path, json)
    }

    /// Walk the operator through obtaining and pasting a token
    ///
    /// Returns `None` when the operator declines or pastes something that
    /// cannot be a token. Nothing is written in that case.
    pub fn interactive_setup(&self, prompt: &mut dyn TokenPrompt) -> Option<String> {
        prompt.notice(&setup_instructions());

        let has_token = match prompt.confirm("Do you have an ngrok authtoken?") {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Setup prompt failed: {}", e);
                return None;
            }
        };

        if !has_token {
            prompt.notice(&decline_options());
            return None;
        }

        let token = match prompt.read_token("Authtoken") {
            Ok(token) => token.trim().to_string(),
            Err(e) => {
                tracing::warn!("Setup prompt failed: {}", e);
                return None;
            }
        };

        if !is_plausible_token(&token) {
            prompt.notice("Invalid authtoken. Please try again.");
            return None;
        }

        match self.save(&token) {
            Ok(()) => prompt.notice(&format!(
                "Authtoken saved successfully.\n   Config location: {}",
                self.path.display()
            )),
            Err(e) => {
                tracing::warn!("Failed to save authtoken to {}: {}", self.path.display(), e);
                prompt.notice("Could not save the authtoken; it will be used for this session only.");
            }
        }

        Some(token)
    }
}

/// Minimal sanity check on a pasted token
pub fn is_plausible_token(token: &str) -> bool {
    !token.is_empty() && token.len() > MIN_TOKEN_LEN
}

/// Token as shown by status output: first 8 and last 4 characters
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn setup_instructions() -> String {
    let mut text = format!(
        "\n{rule}\nNGROK ACCOUNT SETUP\n{rule}\n\
         \nTo get your ngrok authtoken:\
         \n   1. Visit: {signup}\
         \n   2. Sign up for a free account\
         \n   3. Copy your authtoken from: {token}\n",
        rule = "=".repeat(60),
        signup = SIGNUP_URL,
        token = TOKEN_URL,
    );
    if !cfg!(windows) {
        text.push_str(
            "\nNo sign-up wanted? Use the SSH relay instead:\
             \n   qrtunnel <files> --noauth\n",
        );
    }
    text
}

fn decline_options() -> String {
    let mut text = format!(
        "\nOptions:\
         \n  1. Sign up at: {}\
         \n  2. Run 'qrtunnel --setup' once you have your authtoken",
        SIGNUP_URL
    );
    if !cfg!(windows) {
        text.push_str("\n  3. Or use: qrtunnel <files> --noauth (no sign-up needed)");
    }
    text
}
