//! Ferret: due-item scheduler and publishing pipeline
//!
//! Main binary with subcommands:
//! - `daemon`: Poll loop (sweep, claim, dispatch) driven by a trigger
//! - `claim`: Claim due items once and print them
//! - `sweep`: Reset stale processing items
//! - `schedule`: Add an item
//! - `token`: Generate a caller token

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ferret_backend::{BackendConfig, generate_token, hash_token};
use ferret_pipeline::{DEFAULT_PUBLISH_LOG, claim_and_report};
use ferret_scheduler::{NewItem, ScheduledItem};
use miette::{IntoDiagnostic, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod setup;

/// Parse boolean from environment variable, accepting common truthy values.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "ferret")]
#[command(about = "Due-item scheduler and publishing pipeline", long_about = None)]
struct Cli {
    /// SQLite database holding scheduled items
    #[arg(long, global = true, env = "FERRET_DATABASE", default_value = "data/ferret.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop until interrupted
    Daemon {
        /// Append-only log of published posts
        #[arg(long, env = "FERRET_PUBLISH_LOG", default_value = DEFAULT_PUBLISH_LOG)]
        publish_log: PathBuf,

        /// Workflow definition (JSON); defaults to publish, announce, count
        #[arg(long, env = "FERRET_WORKFLOW")]
        workflow: Option<PathBuf>,

        /// Verify the caller token in each payload before publishing
        #[arg(long, env = "FERRET_REQUIRE_AUTH", value_parser = parse_bool_env, default_value = "false")]
        require_auth: bool,

        /// Accepted callers as subject:sha256hex, comma-separated
        #[arg(long, env = "FERRET_AUTH_HASHES", value_delimiter = ',')]
        auth_hash: Vec<String>,

        /// Poll interval in seconds
        #[arg(long, env = "FERRET_POLL_INTERVAL", default_value = "60")]
        poll_interval: u64,

        /// Claim items due within this many seconds
        #[arg(long, env = "FERRET_WINDOW", default_value = "60")]
        window: i64,

        /// Maximum items per claim (0 for the default batch size)
        #[arg(long, env = "FERRET_LIMIT", default_value = "50")]
        limit: usize,

        /// Seconds an item may stay processing before it is reclaimed
        #[arg(long, env = "FERRET_STALE_AFTER", default_value = "900")]
        stale_after: u64,

        /// Bound on each store call in seconds (0 disables)
        #[arg(long, env = "FERRET_STORE_TIMEOUT", default_value = "10")]
        store_timeout: u64,

        /// Bound on each workflow run in seconds (0 disables)
        #[arg(long, env = "FERRET_RUN_TIMEOUT", default_value = "300")]
        run_timeout: u64,
    },

    /// Claim due items once and print them as JSON lines
    Claim {
        /// Claim items due within this many seconds
        #[arg(long, default_value = "60")]
        window: i64,

        /// Maximum items to claim (0 for the default batch size)
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Print a single JSON array instead of JSON lines
        #[arg(long)]
        json_array: bool,
    },

    /// Reset items stuck in processing
    Sweep {
        /// Seconds an item may stay processing before it is reset
        #[arg(long, env = "FERRET_STALE_AFTER", default_value = "900")]
        stale_after: u64,
    },

    /// Add an item to the schedule
    Schedule {
        /// Item payload (JSON object)
        #[arg(long)]
        payload: String,

        /// Seconds from now until the item is due
        #[arg(long, default_value = "0")]
        in_secs: i64,

        /// Item id; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Generate a caller token and print it with its hash
    Token {
        /// Random bytes in the token; defaults to FERRET_TOKEN_BYTES
        #[arg(long)]
        bytes: Option<usize>,

        /// Print a subject:hash entry for FERRET_AUTH_HASHES
        #[arg(long)]
        subject: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ferret=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            publish_log,
            workflow,
            require_auth,
            auth_hash,
            poll_interval,
            window,
            limit,
            stale_after,
            store_timeout,
            run_timeout,
        } => {
            if poll_interval == 0 {
                return Err(miette::miette!("poll interval must be > 0"));
            }
            daemon::run(daemon::DaemonConfig {
                database: cli.database,
                publish_log,
                workflow,
                require_auth,
                auth_hashes: auth_hash,
                poll_interval: Duration::from_secs(poll_interval),
                window: window_secs(window)?,
                limit,
                stale_after_secs: stale_after,
                store_timeout_secs: store_timeout,
                run_timeout: (run_timeout > 0).then(|| Duration::from_secs(run_timeout)),
            })
            .await
        }

        Commands::Claim {
            window,
            limit,
            json_array,
        } => run_claim(cli.database, window_secs(window)?, limit, json_array).await,

        Commands::Sweep { stale_after } => run_sweep(cli.database, stale_after).await,

        Commands::Schedule {
            payload,
            in_secs,
            id,
        } => run_schedule(cli.database, &payload, in_secs, id).await,

        Commands::Token { bytes, subject } => run_token(bytes, subject.as_deref()),
    }
}

fn window_secs(secs: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_seconds(secs)
        .filter(|w| *w > chrono::Duration::zero())
        .ok_or_else(|| miette::miette!("window must be a positive number of seconds"))
}

async fn run_claim(
    database: PathBuf,
    window: chrono::Duration,
    limit: usize,
    json_array: bool,
) -> Result<()> {
    let engine = setup::open_engine(&database, setup::DEFAULT_STALE_AFTER_SECS, 0)?;
    let backend_config = BackendConfig::from_env();
    let capabilities = setup::capabilities(&backend_config, &[])?;
    let items = claim_and_report(
        &engine,
        &capabilities,
        Some(backend_config.schedule_events_topic.as_str()),
        window,
        limit,
    )
    .await
    .map_err(|e| miette::miette!("{}", e))?;

    let mut out = std::io::stdout().lock();
    write_items(&mut out, &items, json_array)?;
    eprintln!("claimed {} item(s)", items.len());
    Ok(())
}

fn write_items(out: &mut impl Write, items: &[ScheduledItem], json_array: bool) -> Result<()> {
    if json_array {
        serde_json::to_writer(&mut *out, items).into_diagnostic()?;
        writeln!(out).into_diagnostic()?;
    } else {
        for item in items {
            serde_json::to_writer(&mut *out, item).into_diagnostic()?;
            writeln!(out).into_diagnostic()?;
        }
    }
    Ok(())
}

async fn run_sweep(database: PathBuf, stale_after: u64) -> Result<()> {
    let engine = setup::open_engine(&database, stale_after, 0)?;
    let reset = engine
        .sweep_stale()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    for id in &reset {
        println!("{}", id);
    }
    eprintln!("reset {} stale item(s)", reset.len());
    Ok(())
}

async fn run_schedule(
    database: PathBuf,
    payload: &str,
    in_secs: i64,
    id: Option<String>,
) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload).into_diagnostic()?;
    let offset = chrono::Duration::try_seconds(in_secs)
        .ok_or_else(|| miette::miette!("due offset out of range: {}", in_secs))?;

    let engine = setup::open_engine(&database, setup::DEFAULT_STALE_AFTER_SECS, 0)?;
    let due_at = engine
        .now()
        .checked_add_signed(offset)
        .ok_or_else(|| miette::miette!("due offset out of range: {}", in_secs))?;
    let mut item = NewItem::new(due_at, payload);
    if let Some(id) = id {
        item = item.with_id(id);
    }
    let item = engine
        .schedule(item)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    info!(id = %item.id, due_at = %item.due_at, "scheduled item");
    println!("{}", serde_json::to_string(&item).into_diagnostic()?);
    Ok(())
}

fn run_token(bytes: Option<usize>, subject: Option<&str>) -> Result<()> {
    let bytes = bytes.unwrap_or_else(|| BackendConfig::from_env().token_bytes);
    let token = generate_token(bytes).map_err(|e| miette::miette!("{}", e))?;
    let hash = hash_token(&token);

    println!("token: {}", token);
    println!("hash:  {}", hash);
    if let Some(subject) = subject {
        println!("FERRET_AUTH_HASHES entry: {}:{}", subject, hash);
    }
    Ok(())
}
