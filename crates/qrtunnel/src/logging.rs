//! Tracing subscriber setup

use std::io::{self, Write};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Stderr sink that ends lines with CRLF while the terminal is in raw mode
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleWriter;

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = ConsoleLines<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleLines {
            inner: io::stderr(),
            raw: crossterm::terminal::is_raw_mode_enabled().unwrap_or(false),
        }
    }
}

pub struct ConsoleLines<W> {
    inner: W,
    raw: bool,
}

impl<W: Write> Write for ConsoleLines<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw {
            return self.inner.write(buf);
        }
        self.inner.write_all(&to_crlf(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn to_crlf(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + 8);
    let mut prev = 0u8;
    for &b in buf {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// Initialise the global tracing subscriber on stderr
///
/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_tracing(verbosity: u8, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(verbosity).into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(ConsoleWriter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(ConsoleWriter))
            .init();
    }
}
