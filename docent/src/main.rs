//! docent - offline-resilient telemetry client for the docent artwork guide
//!
//! Records anonymous visitor events into a durable local queue and delivers
//! them to the analytics backend whenever it is reachable.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/docent/docent.db (~/.local/share/docent/docent.db)
//! - Logs: $XDG_STATE_HOME/docent/docent.<date>.log (~/.local/state/docent/)
//! - Config: $XDG_CONFIG_HOME/docent/config.toml (~/.config/docent/config.toml)

mod process_lock;

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use docent_core::cache::{CacheRouter, HttpUpstream, Request, ResponseSource, Upstream};
use docent_core::clock::SystemClock;
use docent_core::format::{format_elapsed, format_relative_time};
use docent_core::sync::{FlushOutcome, RoutedTransport};
use docent_core::{Config, Database, DurableStore, EventDraft, EventType, Recorded, Telemetry};

use crate::process_lock::acquire_watch_guard;

/// Upper bound on the exit flush; whatever is left stays queued
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "docent")]
#[command(about = "Offline-resilient telemetry client for the docent artwork guide")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, consent and queue status
    Status,

    /// Answer the analytics consent prompt
    Consent {
        #[arg(value_enum)]
        answer: ConsentAnswer,
    },

    /// Record a visitor event (e.g. scan, play_audio, add_to_tour)
    Record {
        /// Event type
        event_type: EventType,

        /// Artwork the event refers to
        #[arg(long)]
        artwork: Option<String>,

        /// Dwell time in seconds (result_view_duration only)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Deliver every queued event now
    Flush,

    /// List queued events
    Queue,

    /// Manage the asset cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Display a match result and time how long it stays open
    View {
        /// Artwork being viewed
        artwork: String,

        /// Close the view after this many seconds (default: until Ctrl+C)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Watch connectivity and deliver queued events on reconnect
    Watch {
        /// Probe interval in milliseconds
        #[arg(long, default_value = "5000")]
        poll: u64,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Fetch and store every core asset
    Warm,

    /// Request a path through the cache router
    Fetch {
        /// Path relative to the server, e.g. /images/a07.jpg
        path: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConsentAnswer {
    Grant,
    Deny,
}

/// Everything a command may need, wired from configuration
struct Client {
    config: Config,
    db: Arc<Database>,
    upstream: Arc<HttpUpstream>,
    router: Arc<CacheRouter>,
    telemetry: Telemetry,
}

impl Client {
    fn connect(config: Config, db: Arc<Database>) -> Result<Self> {
        let upstream =
            Arc::new(HttpUpstream::new(&config.sync).context("failed to create HTTP client")?);
        let router = Arc::new(
            CacheRouter::from_config(&config.cache, &config.sync, upstream.clone(), db.clone())
                .context("failed to activate asset cache")?,
        );
        let transport = Arc::new(RoutedTransport::new(router.clone(), &config.sync));
        let telemetry = Telemetry::new(
            db.clone(),
            transport,
            Arc::new(SystemClock),
            config.sync.flush_on_append,
        );

        Ok(Self {
            config,
            db,
            upstream,
            router,
            telemetry,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        docent_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("docent starting");

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let client = Client::connect(config, db)?;
        match args.command {
            Command::Status => cmd_status(&client.config, &client.db),
            Command::Consent { answer } => cmd_consent(&client, answer).await,
            Command::Record {
                event_type,
                artwork,
                duration,
            } => cmd_record(&client, event_type, artwork, duration).await,
            Command::Flush => cmd_flush(&client).await,
            Command::Queue => cmd_queue(&client),
            Command::Cache { command } => match command {
                CacheCommand::Warm => cmd_cache_warm(&client).await,
                CacheCommand::Fetch { path } => cmd_cache_fetch(&client, &path).await,
            },
            Command::View { artwork, seconds } => cmd_view(&client, &artwork, seconds).await,
            Command::Watch { poll } => cmd_watch(&client, poll).await,
        }
    })
}

fn cmd_status(config: &Config, db: &Database) -> Result<()> {
    println!("Docent Telemetry Status");
    println!("=======================");
    println!();

    println!("Server URL:      {}", config.sync.server_url);
    println!("Consent:         {}", db.consent()?.as_str());
    println!(
        "Session ID:      {}",
        db.session_id()?.as_deref().unwrap_or("<not issued>")
    );
    println!("Pending events:  {}", db.count_pending()?);
    for (event_type, count) in db.count_pending_by_type()? {
        println!("  {:<22} {}", event_type, count);
    }
    println!(
        "Asset cache:     {} ({} entries)",
        config.cache.name,
        db.count_cache_entries(&config.cache.name)?
    );
    println!();
    println!("Database:        {}", Config::database_path().display());
    println!("Logs:            {}", docent_core::logging::log_dir().display());
    Ok(())
}

async fn cmd_consent(client: &Client, answer: ConsentAnswer) -> Result<()> {
    let previous = client.telemetry.consent();
    let granted = matches!(answer, ConsentAnswer::Grant);
    let recorded = client
        .telemetry
        .answer_consent(granted)
        .await
        .context("failed to store consent")?;

    println!(
        "Consent: {} (was {})",
        client.telemetry.consent().as_str(),
        previous.as_str()
    );
    print_recorded(&recorded);
    Ok(())
}

async fn cmd_record(
    client: &Client,
    event_type: EventType,
    artwork: Option<String>,
    duration: Option<u64>,
) -> Result<()> {
    let recorded = match (event_type, duration) {
        (EventType::ResultViewDuration, Some(seconds)) => {
            let artwork = artwork.context("result_view_duration requires --artwork")?;
            client
                .telemetry
                .record(EventDraft::view_duration(artwork, seconds))
                .await
        }
        (EventType::ResultViewDuration, None) => {
            bail!("result_view_duration requires --duration")
        }
        (_, Some(_)) => bail!("--duration only applies to result_view_duration"),
        (EventType::AddToTour, None) => {
            let artwork = artwork.context("add_to_tour requires --artwork")?;
            client.telemetry.add_to_tour(&artwork).await
        }
        (event_type, None) => {
            client
                .telemetry
                .record(EventDraft::new(event_type, artwork))
                .await
        }
    };

    if recorded.queued.is_none() && !client.telemetry.consent().is_granted() {
        println!("Consent not granted; {} not recorded", event_type);
        return Ok(());
    }
    print_recorded(&recorded);
    Ok(())
}

async fn cmd_flush(client: &Client) -> Result<()> {
    let outcome = client.telemetry.flush().await;
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

fn cmd_queue(client: &Client) -> Result<()> {
    let snapshot = client.telemetry.pending().context("failed to read queue")?;
    if snapshot.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("{} pending event(s):", snapshot.len());
    for entry in snapshot.entries() {
        let event = &entry.event;
        let duration = event
            .duration_seconds
            .map(|s| format!("{}s", s))
            .unwrap_or_default();
        println!(
            "  {:>5}  {:<22} {:<10} {:>6}  {}",
            entry.seq,
            event.event_type,
            event.artwork_id.as_deref().unwrap_or("-"),
            duration,
            format_relative_time(event.timestamp, now)
        );
    }
    Ok(())
}

async fn cmd_cache_warm(client: &Client) -> Result<()> {
    let report = client.router.precache().await;
    println!(
        "Cache {}: stored {} asset(s)",
        client.router.generation(),
        report.stored.len()
    );
    for (path, reason) in &report.failed {
        println!("  failed {}: {}", path, reason);
    }
    if !report.failed.is_empty() {
        bail!("{} asset(s) could not be cached", report.failed.len());
    }
    Ok(())
}

async fn cmd_cache_fetch(client: &Client, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("path must start with '/': {}", path);
    }
    let response = client
        .router
        .handle(&Request::get(path))
        .await
        .with_context(|| format!("failed to fetch {}", path))?;

    let source = match response.source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::Synthetic => "offline fallback",
    };
    println!(
        "HTTP {} from {} ({} bytes, {})",
        response.status,
        source,
        response.body.len(),
        response.content_type.as_deref().unwrap_or("unknown type")
    );
    Ok(())
}

async fn cmd_view(client: &Client, artwork: &str, seconds: Option<u64>) -> Result<()> {
    let running = shutdown_flag()?;

    for recorded in client.telemetry.show_result(artwork).await {
        print_recorded(&recorded);
    }
    println!("Viewing {}. Press Ctrl+C to close.", artwork);

    let limit = seconds.map(Duration::from_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        let elapsed = client.telemetry.view_elapsed().unwrap_or_default();
        print!("\r  {}", format_elapsed(elapsed));
        let _ = io::stdout().flush();
        if limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }
    }
    println!();

    match client.telemetry.end_view().await {
        Some(recorded) => print_recorded(&recorded),
        None => println!("View too short to record"),
    }
    Ok(())
}

async fn cmd_watch(client: &Client, poll_ms: u64) -> Result<()> {
    let _watch_guard = acquire_watch_guard(&Config::database_path())
        .context("failed to acquire watch lock")?;
    let running = shutdown_flag()?;
    let poll_duration = Duration::from_millis(poll_ms);

    println!(
        "Watching {} (probe every {}ms). Press Ctrl+C to stop.",
        client.config.sync.server_url, poll_ms
    );
    println!();

    let online = probe(client.upstream.as_ref()).await;
    client.telemetry.set_online(online).await;
    if online {
        log_line(&describe_outcome(&client.telemetry.flush().await));
    } else {
        log_line("Offline; events will queue");
    }
    print_recorded(
        &client
            .telemetry
            .record(EventDraft::new(EventType::PageOpen, None))
            .await,
    );

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(poll_duration).await;

        let was_online = client.telemetry.is_online();
        let online = probe(client.upstream.as_ref()).await;
        match client.telemetry.set_online(online).await {
            Some(outcome) => log_line(&format!("Back online: {}", describe_outcome(&outcome))),
            None if was_online && !online => log_line("Offline; events will queue"),
            None => {}
        }
    }

    println!("Flushing before exit...");
    match tokio::time::timeout(TEARDOWN_TIMEOUT, client.telemetry.teardown()).await {
        Ok(outcome) => println!("{}", describe_outcome(&outcome)),
        Err(_) => println!("Exit flush timed out; events stay queued"),
    }

    let stats = client.telemetry.stats();
    tracing::info!(
        attempts = stats.attempts,
        events_delivered = stats.events_delivered,
        single_deliveries = stats.single_deliveries,
        batch_deliveries = stats.batch_deliveries,
        retained = stats.retained,
        "docent watch stopped"
    );
    println!("Watch mode stopped.");
    Ok(())
}

/// Set up a Ctrl+C handler that clears the returned flag
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    Ok(running)
}

/// Any HTTP answer at all counts as online
async fn probe(upstream: &dyn Upstream) -> bool {
    upstream.fetch(&Request::get("/")).await.is_ok()
}

fn log_line(message: &str) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    println!("[{}] {}", timestamp, message);
}

fn print_recorded(recorded: &Recorded) {
    if let Some(queued) = &recorded.queued {
        match &queued.event.artwork_id {
            Some(artwork) => println!(
                "Queued {} for {} (seq {})",
                queued.event.event_type, artwork, queued.seq
            ),
            None => println!("Queued {} (seq {})", queued.event.event_type, queued.seq),
        }
    }
    if let Some(outcome) = &recorded.flush {
        println!("{}", describe_outcome(outcome));
    }
}

fn describe_outcome(outcome: &FlushOutcome) -> String {
    match outcome {
        FlushOutcome::ConsentNotGranted => "Consent not granted; nothing sent".to_string(),
        FlushOutcome::Empty => "Queue empty; nothing to send".to_string(),
        FlushOutcome::StorageUnavailable => {
            format!(
                "Queue unreadable; see logs in {}",
                docent_core::logging::log_dir().display()
            )
        }
        FlushOutcome::Delivered { count, mode } => {
            format!("Delivered {} event(s) via {} endpoint", count, mode.as_str())
        }
        FlushOutcome::Retained {
            count,
            mode,
            reason,
        } => format!(
            "Kept {} event(s) for retry ({} endpoint): {}",
            count,
            mode.as_str(),
            reason
        ),
    }
}
