//! leaseholdctl - administrative CLI for a leasehold session pool
//!
//! Operates directly on the state file and session directories, so it can be
//! used while the server is running or stopped. The same file locks protect
//! both.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;

use leasehold::logging::init_logging;
use leasehold::settings::{Settings, resolve_config_path};
use leasehold::{ContentSource, LeaseManager, SessionAdmin, SessionId, open_storage};

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config_file = resolve_config_path(cli.config.as_deref())?;
    let settings = Settings::load(&config_file)?;
    let level = if cli.verbose { "debug" } else { "warn" };
    init_logging(level, settings.logging.json);

    let (store, transfer) = open_storage(&settings)?;

    match cli.command {
        Command::Create { source, session_id } => {
            let admin = SessionAdmin::new(store, transfer);
            handle_create(&admin, source, session_id, cli.json)
        }
        Command::Update { id, source } => {
            let admin = SessionAdmin::new(store, transfer);
            handle_update(&admin, &id, source, cli.json)
        }
        Command::List => handle_list(&SessionAdmin::new(store, transfer), cli.json),
        Command::Status { id } => handle_status(&SessionAdmin::new(store, transfer), &id, cli.json),
        Command::Reclaim => {
            let manager = LeaseManager::new(store, transfer, settings.lease.ttl());
            handle_reclaim(&manager, cli.json)
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "leaseholdctl",
    author,
    version,
    about = "Administrative CLI for leasehold - provision and inspect sessions."
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "LEASEHOLD_CONFIG")]
    config: Option<PathBuf>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new session from a directory or zip archive
    Create {
        /// Directory or .zip archive to seed the session with
        source: PathBuf,
        /// Explicit session id (defaults to the next numeric id)
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Replace the content of an existing session
    Update {
        /// Session ID
        id: String,
        /// Directory or .zip archive with the new content
        source: PathBuf,
    },
    /// List all sessions
    List,
    /// Show details for one session
    Status {
        /// Session ID
        id: String,
    },
    /// Reset expired leases to available now
    Reclaim,
}

fn parse_id(raw: &str) -> Result<SessionId> {
    SessionId::parse(raw).with_context(|| format!("invalid session id {raw:?}"))
}

fn resolve_source(path: PathBuf) -> Result<ContentSource> {
    ContentSource::resolve(&path).with_context(|| format!("resolving source {}", path.display()))
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn handle_create(
    admin: &SessionAdmin,
    source: PathBuf,
    session_id: Option<String>,
    json: bool,
) -> Result<()> {
    let id = session_id.as_deref().map(parse_id).transpose()?;
    let source = resolve_source(source)?;
    let id = admin.create(&source, id).context("creating session")?;

    if json {
        println!("{}", json!({ "status": "created", "id": id }));
    } else {
        println!("Session {id} created from {}", source.path().display());
    }
    Ok(())
}

fn handle_update(admin: &SessionAdmin, id: &str, source: PathBuf, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let source = resolve_source(source)?;
    admin.update(&id, &source).context("updating session")?;

    if json {
        println!("{}", json!({ "status": "updated", "id": id }));
    } else {
        println!("Session {id} updated from {}", source.path().display());
    }
    Ok(())
}

fn handle_list(admin: &SessionAdmin, json: bool) -> Result<()> {
    let sessions = admin.list().context("listing sessions")?;

    if json {
        let items: Vec<_> = sessions
            .iter()
            .map(|(id, record)| json!({ "id": id, "record": record }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:<20} {:<20}",
        "ID", "STATUS", "LEASED_AT", "UPDATED_AT"
    );
    println!("{}", "-".repeat(65));
    for (id, record) in &sessions {
        println!(
            "{:<12} {:<10} {:<20} {:<20}",
            id.as_str(),
            record.status.to_string(),
            format_time(record.lease_acquired_at),
            format_time(Some(record.updated_at)),
        );
    }
    Ok(())
}

fn handle_status(admin: &SessionAdmin, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let details = admin.status(&id).context("reading session status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    println!("Session: {}", details.id);
    println!("  Status: {}", details.record.status);
    println!("  Leased at: {}", format_time(details.record.lease_acquired_at));
    println!("  Created: {}", format_time(Some(details.record.created_at)));
    println!("  Updated: {}", format_time(Some(details.record.updated_at)));
    println!("  Directory: {}", details.directory.display());
    if details.directory_exists {
        println!(
            "  Contents: {} file(s), {} directory(ies)",
            details.file_count, details.directory_count
        );
    } else {
        println!("  Contents: directory missing");
    }
    Ok(())
}

fn handle_reclaim(manager: &LeaseManager, json: bool) -> Result<()> {
    let reclaimed = manager.sweep().context("reclaiming expired leases")?;

    if json {
        println!("{}", json!({ "reclaimed": reclaimed }));
    } else if reclaimed.is_empty() {
        println!("No expired leases");
    } else {
        for id in &reclaimed {
            println!("Reclaimed session {id}");
        }
        println!("Reclaimed {} lease(s)", reclaimed.len());
    }
    Ok(())
}
