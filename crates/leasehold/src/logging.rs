//! Tracing subscriber setup shared by both binaries.

use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Verbosity requested on the command line, layered over the configured level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbosity {
    pub quiet: bool,
    pub verbose: u8,
    pub debug: bool,
    pub trace: bool,
}

impl Verbosity {
    /// Effective level name. Flags win over `configured`.
    pub fn level<'a>(&self, configured: &'a str) -> &'a str {
        if self.quiet {
            return "error";
        }
        if self.trace {
            return "trace";
        }
        if self.debug {
            return "debug";
        }
        match self.verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("leasehold={level},tower_http={level}")));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let ansi = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(io::stderr),
            )
            .try_init()
            .ok();
    }
}
