//! # linkctl
//!
//! Diagnostic CLI for the backend connectivity layer.
//!
//! ## Usage
//! ```bash
//! # Connectivity state and queue counts
//! cargo run -p unitlink-sync --bin linkctl -- status
//!
//! # Probe the backend once
//! cargo run -p unitlink-sync --bin linkctl -- probe
//!
//! # Queued writes, oldest first
//! cargo run -p unitlink-sync --bin linkctl -- pending
//!
//! # Replay the queue now
//! cargo run -p unitlink-sync --bin linkctl -- drain
//!
//! # Re-arm a permanently failed write, or discard it
//! cargo run -p unitlink-sync --bin linkctl -- retry <KEY>
//! cargo run -p unitlink-sync --bin linkctl -- discard <KEY>
//!
//! # Call a procedure through the full policy
//! cargo run -p unitlink-sync --bin linkctl -- call getUnits '{"page":1}'
//! cargo run -p unitlink-sync --bin linkctl -- call updateUnit '{"id":"u-1"}' --write
//! ```
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG` to tune).

use serde_json::{json, Value};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use unitlink_core::{new_nonce, RequestDescriptor};
use unitlink_sync::{BackendLink, BackendLinkHandle, LinkConfig, LinkResult};

/// Parsed command line.
struct Args {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> Args {
    let raw: Vec<String> = env::args().skip(1).collect();

    let mut config = None;
    let mut db = None;
    let mut command = Vec::new();

    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "-c" | "--config" if i + 1 < raw.len() => {
                config = Some(PathBuf::from(&raw[i + 1]));
                i += 1;
            }
            "-d" | "--db" if i + 1 < raw.len() => {
                db = Some(PathBuf::from(&raw[i + 1]));
                i += 1;
            }
            other => command.push(other.to_string()),
        }
        i += 1;
    }

    Args {
        config,
        db,
        command,
    }
}

fn print_usage() {
    println!("unitlink connectivity diagnostics");
    println!();
    println!("Usage: linkctl [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  status                          Connectivity state and queue counts");
    println!("  probe                           Probe the backend once");
    println!("  pending                         List queued writes");
    println!("  drain                           Replay queued writes now");
    println!("  retry <KEY>                     Re-arm a permanently failed write");
    println!("  discard <KEY>                   Drop a queued write");
    println!("  call <PROC> [JSON] [--write]    Call a procedure");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>    Config file (.json or .toml)");
    println!("  -d, --db <PATH>        Offline queue database");
}

/// Initializes the tracing subscriber on stderr.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - Default: `info,unitlink=debug,sqlx=warn`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,unitlink=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    let Some(command) = args.command.first().cloned() else {
        print_usage();
        return Ok(());
    };
    if command == "-h" || command == "--help" || command == "help" {
        print_usage();
        return Ok(());
    }

    init_tracing();

    let mut config = LinkConfig::load(args.config)?;
    if let Some(db) = args.db {
        config.database_path = Some(db);
    }

    let link = BackendLink::from_config(config).await?.start();
    let result = run(&link, &command, &args.command[1..]).await;
    link.shutdown().await;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(link: &BackendLinkHandle, command: &str, rest: &[String]) -> LinkResult<Value> {
    match command {
        "status" => Ok(serde_json::to_value(link.status().await?)?),

        "probe" => {
            let state = link.probe_now().await?;
            Ok(json!({ "state": state }))
        }

        "pending" => Ok(serde_json::to_value(link.list_pending_writes().await?)?),

        "drain" => {
            let report = link.drain_now().await?;
            Ok(json!({
                "replayed": report.replayed,
                "rejected": report.rejected,
                "failedPermanent": report.failed_permanent,
                "stoppedEarly": report.stopped_early,
                "alreadyRunning": report.already_running,
                "remaining": report.remaining,
                "failures": report.failure_messages(),
            }))
        }

        "retry" => {
            let key = required(rest, "retry <KEY>")?;
            Ok(serde_json::to_value(link.retry_failed(key).await?)?)
        }

        "discard" => {
            let key = required(rest, "discard <KEY>")?;
            link.discard_pending(key).await?;
            Ok(json!({ "discarded": key }))
        }

        "call" => {
            let procedure = required(rest, "call <PROC> [JSON] [--write]")?;
            let is_write = rest.iter().any(|a| a == "--write");
            let payload = match rest.iter().skip(1).find(|a| *a != "--write") {
                Some(raw) => serde_json::from_str(raw)?,
                None => Value::Null,
            };

            let descriptor = if is_write {
                RequestDescriptor::write(procedure, payload, &new_nonce())
            } else {
                RequestDescriptor::read(procedure, payload)
            };

            Ok(serde_json::to_value(link.execute(&descriptor).await?)?)
        }

        other => Err(unitlink_sync::LinkError::InvalidRequest {
            procedure: other.to_string(),
            reason: "unknown command, try --help".into(),
        }),
    }
}

fn required<'a>(rest: &'a [String], usage: &str) -> LinkResult<&'a str> {
    rest.first()
        .map(String::as_str)
        .ok_or_else(|| unitlink_sync::LinkError::InvalidRequest {
            procedure: usage.to_string(),
            reason: "missing argument".into(),
        })
}
