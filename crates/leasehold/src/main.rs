use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use leasehold::api::{AppState, create_router};
use leasehold::logging::{Verbosity, init_logging};
use leasehold::settings::{APP_NAME, Settings, resolve_config_path};
use leasehold::{LeaseManager, LeaseService, open_storage};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!(config_file = %ctx.config_file.display(), "resolved configuration");

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Leasehold - session lease server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON (logs and `config show`)
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Write the default config file
    Init(InitCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
}

#[derive(Debug)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    settings: Settings,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = resolve_config_path(common.config.as_deref())?;
        let settings = Settings::load(&config_file)?;
        Ok(Self {
            common,
            config_file,
            settings,
        })
    }

    fn init_logging(&self) {
        let verbosity = Verbosity {
            quiet: self.common.quiet,
            verbose: self.common.verbose,
            debug: self.common.debug,
            trace: self.common.trace,
        };
        let level = verbosity.level(&self.settings.logging.level);
        init_logging(level, self.common.json || self.settings.logging.json);
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let settings = &ctx.settings;
    let host = cmd.host.unwrap_or_else(|| settings.server.host.clone());
    let port = cmd.port.unwrap_or(settings.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let (store, transfer) = open_storage(settings)?;
    info!(
        state_file = %store.state_file().display(),
        sessions_dir = %transfer.sessions_dir().display(),
        ttl_secs = settings.lease.ttl_secs,
        "storage ready"
    );

    let manager = LeaseManager::new(store, transfer, settings.lease.ttl());
    let sweeper = settings
        .lease
        .sweep_interval()
        .map(|interval| tokio::spawn(sweep_loop(manager.clone(), interval)));

    let app = create_router(AppState::new(LeaseService::new(manager)));

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("{APP_NAME} listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

/// Periodically reclaim expired leases so they show as available before the
/// next acquire.
async fn sweep_loop(manager: LeaseManager, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let manager = manager.clone();
        match tokio::task::spawn_blocking(move || manager.sweep()).await {
            Ok(Ok(reclaimed)) if !reclaimed.is_empty() => {
                info!(count = reclaimed.len(), "background sweep reclaimed leases");
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("background sweep failed: {err}"),
            Err(err) => error!("background sweep task panicked: {err}"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    Settings::write_default(&ctx.config_file)?;
    info!("wrote default config to {}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.settings)
                        .context("serializing config to JSON")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&ctx.settings).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
