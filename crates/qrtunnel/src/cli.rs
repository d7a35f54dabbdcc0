use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use tunnel::{DEFAULT_RELAY_DOMAIN, DEFAULT_RELAY_HOST};

#[derive(Parser, Debug)]
#[command(name = "qrtunnel")]
#[command(
    version,
    about = "Share files through a public URL shown as a QR code",
    long_about = None
)]
pub struct Cli {
    /// Files to share
    #[arg(value_name = "FILES", required_unless_present_any = ["setup", "status"])]
    pub files: Vec<PathBuf>,

    /// Set up or reconfigure the ngrok authtoken
    #[arg(long, conflicts_with = "status")]
    pub setup: bool,

    /// Show whether an ngrok authtoken is configured
    #[arg(long)]
    pub status: bool,

    /// Use the SSH relay (localhost.run) first; no account needed
    #[arg(long, env = "QRTUNNEL_NOAUTH", value_parser = BoolishValueParser::new())]
    pub noauth: bool,

    /// Local port for the file server (0 picks a free one)
    #[arg(long, env = "QRTUNNEL_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Address the file server binds to
    #[arg(long, env = "QRTUNNEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// SSH relay login
    #[arg(long, env = "QRTUNNEL_RELAY_HOST", default_value = DEFAULT_RELAY_HOST)]
    pub relay_host: String,

    /// Domain the relay assigns public URLs under
    #[arg(long, env = "QRTUNNEL_RELAY_DOMAIN", default_value = DEFAULT_RELAY_DOMAIN)]
    pub relay_domain: String,

    /// Seconds to wait for the relay URL
    #[arg(long, env = "QRTUNNEL_RELAY_TIMEOUT", default_value_t = 20)]
    pub relay_timeout: u64,

    /// Credential file (defaults to ~/.qrtunnel/config.json)
    #[arg(long, env = "QRTUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_files_required_for_sharing() {
        assert!(Cli::try_parse_from(["qrtunnel"]).is_err());
        assert!(Cli::try_parse_from(["qrtunnel", "--status"]).is_ok());
        assert!(Cli::try_parse_from(["qrtunnel", "--setup"]).is_ok());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["qrtunnel", "a.txt", "b.txt", "-vv"]).unwrap();

        assert_eq!(cli.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(cli.port, 8000);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.relay_domain, "lhr.life");
        assert_eq!(cli.verbose, 2);
        assert!(!cli.noauth);
    }
}
