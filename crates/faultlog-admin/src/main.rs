//! Operator CLI for a faultlog database
//!
//! Output is one JSON document on stdout so it can be piped into other tools;
//! diagnostics go through the configured logging layers.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use faultlog::{
    ErrorContext, EventType, Faultlog, FaultlogConfig, RecordFilter, SessionContext, Severity,
};
use faultlog_logging::FaultlogSubscriberBuilder;

#[derive(Parser)]
#[command(name = "faultlog-admin", about = "Inspect and maintain a faultlog database")]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List partitions, oldest first
    Inventory,
    /// Count records in an inclusive time range
    Count {
        /// Range start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,
        /// Range end (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,
        /// Only count this error code
        #[arg(long)]
        code: Option<i64>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        event_type: Option<EventType>,
    },
    /// Print records in an inclusive time range
    List {
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long)]
        code: Option<i64>,
        #[arg(long)]
        event_type: Option<EventType>,
    },
    /// Drop partitions that lie entirely before a cutoff
    Purge {
        /// Keep this many days (defaults to the configured horizon)
        #[arg(long, conflicts_with = "before")]
        older_than_days: Option<i64>,
        /// Explicit cutoff (RFC 3339)
        #[arg(long)]
        before: Option<DateTime<Utc>>,
    },
    /// Write a record by hand
    Record {
        message: String,
        #[arg(long, default_value_t = 0)]
        code: i64,
        #[arg(long, default_value = "ERROR")]
        severity: Severity,
        #[arg(long)]
        event_type: Option<EventType>,
        /// Program name stored on the record
        #[arg(long, default_value = "faultlog-admin")]
        program: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<FaultlogConfig> {
    let mut config = match &cli.config {
        Some(path) => FaultlogConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FaultlogConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.default_level = level.clone();
    }
    Ok(config)
}

fn filter_for(
    code: Option<i64>,
    username: Option<String>,
    event_type: Option<EventType>,
) -> RecordFilter {
    let mut filter = RecordFilter::all();
    if let Some(code) = code {
        filter = filter.with_code(code);
    }
    if let Some(username) = username {
        filter = filter.with_username(username);
    }
    if let Some(event_type) = event_type {
        filter = filter.with_event_type(event_type);
    }
    filter
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _logging = FaultlogSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .try_init()
        .context("Failed to initialize logging")?;

    let log = Faultlog::open(config).context("Failed to open faultlog")?;

    let output = match cli.command {
        Command::Inventory => {
            let partitions = log.query().inventory()?;
            json!({ "partitions": partitions })
        }

        Command::Count {
            start,
            end,
            code,
            username,
            event_type,
        } => {
            let filter = filter_for(code, username, event_type);
            let count = log.query().count_matching(start, end, &filter)?;
            json!({ "start": start, "end": end, "count": count })
        }

        Command::List {
            start,
            end,
            code,
            event_type,
        } => {
            let filter = filter_for(code, None, event_type);
            let records = log.query().list_in_range(start, end, &filter)?;
            json!({ "records": records })
        }

        Command::Purge {
            older_than_days,
            before,
        } => {
            let report = match (before, older_than_days) {
                (Some(cutoff), _) => log.retention().purge_before(cutoff).await,
                (None, Some(days)) => {
                    log.retention()
                        .purge_older_than(chrono::Duration::days(days))
                        .await
                }
                (None, None) => {
                    let horizon = log.config().retention.horizon();
                    log.retention().purge_older_than(horizon).await
                }
            };
            info!(complete = report.is_complete(), "Purge finished");
            json!({
                "cutoff": report.cutoff,
                "partitions_dropped": report.dropped,
                "records_deleted": report.records_deleted,
                "failure": report.failure.as_ref().map(|e| e.to_string()),
            })
        }

        Command::Record {
            message,
            code,
            severity,
            event_type,
            program,
        } => {
            let mut ctx = ErrorContext::error(code, message).with_severity(severity);
            if let Some(event_type) = event_type {
                ctx = ctx.with_event_type(event_type);
            }
            let session = SessionContext::anonymous().with_program(program);
            log.record_event(ctx, session).await;

            let stats = log.recorder().stats();
            json!({
                "committed": stats.committed(),
                "suppressed": stats.suppressed(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
