//! Operator-facing console text

use std::path::Path;

use fileserver::{format_size, SharedFileSet};
use tunnel::{mask_token, REMEDIATION};

const TOKEN_URL: &str = "https://dashboard.ngrok.com/get-started/your-authtoken";

fn rule() -> String {
    "=".repeat(60)
}

/// One `  - name (size)` line per file, in input order
pub fn file_listing(files: &SharedFileSet) -> String {
    files
        .iter()
        .map(|f| format!("  - {} ({})", f.name, format_size(f.size)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_banner(files: &SharedFileSet, noauth: bool) {
    println!("\n{}", rule());
    println!("qrtunnel - Simple File Sharing");
    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    if noauth {
        println!("Mode: No-auth (SSH tunnel via localhost.run)");
    } else {
        println!("Mode: ngrok (authenticated)");
    }
    println!("{}", rule());
    println!("Files to be shared:");
    println!("{}", file_listing(files));
    println!("{}", rule());
}

pub fn print_noauth_unsupported() {
    println!("\n{}", rule());
    println!("WARNING: --noauth is not supported on Windows");
    println!("{}", rule());
    println!("\nThe --noauth option uses SSH tunneling via localhost.run,");
    println!("which is not reliably supported on Windows.");
    println!("\nProceeding with ngrok instead...");
    println!("{}", rule());
}

pub fn print_share(url: &str, qr: Option<&str>) {
    println!("\n{}", rule());
    match qr {
        Some(qr) => {
            println!("SCAN THIS QR CODE TO ACCESS THE FILES:");
            println!("{}", rule());
            println!("{}", qr);
        }
        None => println!("QR code unavailable; open the URL below instead."),
    }
    println!("{}", rule());
    println!("\nURL: {}", url);
    println!("{}\n", rule());
}

pub fn print_tunnel_failure(error: &dyn std::fmt::Display) {
    eprintln!("\n{}", rule());
    eprintln!("Could not establish a public tunnel: {}", error);
    eprintln!("{}", rule());
    eprintln!("{}", REMEDIATION);
}

/// Status report; returns whether a token is configured
pub fn print_status(token: Option<&str>, config_path: &Path) -> bool {
    println!("\n{}", rule());
    println!("AUTHENTICATION STATUS");
    println!("{}", rule());
    let configured = match token {
        Some(token) => {
            println!("Ngrok authtoken found: {}", mask_token(token));
            println!("  Config location: {}", config_path.display());
            true
        }
        None => {
            println!("No ngrok authtoken configured");
            println!("\nTo set up ngrok:");
            println!("  1. Run: qrtunnel --setup");
            println!("  2. Or visit: {}", TOKEN_URL);
            false
        }
    };
    println!("{}\n", rule());
    configured
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_listing_keeps_order() {
        let dir = TempDir::new().unwrap();
        let b = dir.path().join("b.txt");
        let a = dir.path().join("a.txt");
        std::fs::write(&b, vec![0u8; 2048]).unwrap();
        std::fs::write(&a, b"hello").unwrap();

        let files = SharedFileSet::from_paths([&b, &a]).unwrap();

        assert_eq!(
            file_listing(&files),
            "  - b.txt (2.0 KB)\n  - a.txt (5.0 B)"
        );
    }

    #[test]
    fn test_status_result() {
        let path = Path::new("/tmp/config.json");
        assert!(print_status(Some("2abcdefghijklmnopqrstuvwxyz"), path));
        assert!(!print_status(None, path));
    }
}
