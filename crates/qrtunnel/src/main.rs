//! qrtunnel
//!
//! Shares local files through a temporary public URL: a local HTTP server
//! offers them as one ZIP, a tunnel exposes it, and the URL is printed as a
//! QR code. Press `q` or Ctrl+C to stop.

mod cli;
mod keys;
mod logging;
mod output;
mod qr;
mod session;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fileserver::SharedFileSet;
use tunnel::{
    CredentialStore, ManagedTunnel, NgrokProvider, RelayConfig, RelayTunnel, TerminalPrompt,
    TunnelOrchestrator,
};

use crate::cli::Cli;
use crate::keys::{select_key_poller, KeyWatch, SessionKey};
use crate::session::{SessionController, SessionError, ShutdownTrigger, TunnelFactory};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_json);

    let store = CredentialStore::new(
        cli.config
            .clone()
            .unwrap_or_else(CredentialStore::default_path),
    );

    if cli.setup {
        return run_setup(&store);
    }
    if cli.status {
        let token = store.get();
        return exit_code(output::print_status(token.as_deref(), store.path()));
    }

    match share(cli, store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Exiting after error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_setup(store: &CredentialStore) -> ExitCode {
    match store.interactive_setup(&mut TerminalPrompt) {
        Some(_) => {
            println!("\nSetup complete! You can now use qrtunnel to share files.");
            ExitCode::SUCCESS
        }
        None => {
            println!("\nSetup incomplete. Please try again.");
            ExitCode::FAILURE
        }
    }
}

async fn share(cli: Cli, store: CredentialStore) -> anyhow::Result<()> {
    let mut noauth = cli.noauth;
    if noauth && cfg!(windows) {
        output::print_noauth_unsupported();
        noauth = false;
    }

    let files = match SharedFileSet::from_paths(&cli.files) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(e.into());
        }
    };
    output::print_banner(&files, noauth);

    let relay = RelayConfig {
        host: cli.relay_host.clone(),
        domain: cli.relay_domain.clone(),
        wait_budget: Duration::from_secs(cli.relay_timeout),
        ..Default::default()
    };
    let mut session = SessionController::new(
        files,
        cli.host.clone(),
        cli.port,
        tunnel_chain(relay, store),
    );

    if let Err(e) = session.start_server().await {
        eprintln!("\nError: could not start the file server: {}", e);
        return Err(e.into());
    }

    let url = match session.establish_tunnel(noauth).await {
        Ok(url) => url,
        Err(e) => {
            match &e {
                SessionError::Tunnel(err) => output::print_tunnel_failure(err),
                other => eprintln!("\nError: {}", other),
            }
            return Err(e.into());
        }
    };

    let qr = match qr::render_qr(&url) {
        Ok(qr) => Some(qr),
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        }
    };
    output::print_share(&url, qr.as_deref());
    println!("Server is running. Press 'q' to quit, or Ctrl+C to stop.\n");

    let mut keys = KeyWatch::spawn(select_key_poller());
    let trigger = session.run(shutdown_signal(&mut keys)).await;
    keys.close().await;

    match trigger {
        ShutdownTrigger::QuitKey => println!("\n'q' pressed. Shutting down..."),
        ShutdownTrigger::Interrupt => println!("\nCtrl+C pressed. Shutting down..."),
        ShutdownTrigger::Terminate => println!("\nTerminated. Shutting down..."),
    }

    tracing::info!(
        url = session.public_url().unwrap_or_default(),
        "Closing session"
    );
    session.shutdown().await;
    tracing::debug!(state = ?session.state(), "Session finished");
    println!("Server stopped. Goodbye!");
    Ok(())
}

fn tunnel_chain(relay: RelayConfig, store: CredentialStore) -> TunnelFactory {
    Box::new(move |port| {
        let relay = RelayTunnel::new(&relay, port)?;
        let managed = ManagedTunnel::new(
            NgrokProvider::default(),
            store,
            Box::new(TerminalPrompt),
            port,
        );
        Ok(TunnelOrchestrator::new(Box::new(relay), Box::new(managed)))
    })
}

/// Resolves on the quit key, Ctrl+C or SIGTERM
async fn shutdown_signal(keys: &mut KeyWatch) -> ShutdownTrigger {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        key = keys.key() => match key {
            SessionKey::Quit => ShutdownTrigger::QuitKey,
            SessionKey::Interrupt => ShutdownTrigger::Interrupt,
        },
        _ = ctrl_c => ShutdownTrigger::Interrupt,
        _ = terminate => ShutdownTrigger::Terminate,
    }
}
