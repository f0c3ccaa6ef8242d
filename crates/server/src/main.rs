//! Trend Sentinel: unattended price sampling and trend indicators
//!
//! Usage:
//!   trend-sentinel run --tickers BTC,ETH          Run the scheduler until the deadline or Ctrl+C
//!   trend-sentinel serve --port 3001 --wild       Same, plus the HTTP status API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use engine::config::{
    parse_deadline, parse_instruments, parse_interval, parse_report_window, parse_rumour_ratio,
    DEFAULT_CONCURRENCY, DEFAULT_HISTORY_WINDOW,
};
use engine::{
    AnalysisBoard, BinanceClient, Deadline, HistoryStore, Instrument, LogNotifier, Notifier,
    RedditFeed, RiskLevel, RunConfig, Scheduler, SchedulerProgress, SqliteHistoryStore,
    WebhookNotifier,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "trend-sentinel")]
#[command(about = "Samples prices, computes trend indicators and reports daily", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler in the foreground
    Run {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the scheduler and serve the status API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Instruments to track (comma-separated)
    #[arg(long, env = "TICKERS", value_delimiter = ',')]
    tickers: Vec<String>,
    /// Extra instruments, one per line
    #[arg(long, env = "TICKER_FILE", default_value = "config/tickers.txt")]
    ticker_file: PathBuf,
    /// Add discovery slots mining the rumor feed
    #[arg(long, env = "RUN_WILD")]
    wild: bool,
    /// Discovery slots per instrument, a float below 1
    #[arg(long, env = "RUMOUR")]
    rumour: Option<String>,
    /// Rumor feed risk level: high or low
    #[arg(long, env = "RISK", default_value = "low")]
    risk: String,
    /// Maximum concurrent workers
    #[arg(long, env = "CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Pause between iterations, e.g. 30.seconds or 5.minutes
    #[arg(long, env = "INTERVAL", default_value = "60.seconds")]
    interval: String,
    /// Stop after this time (RFC 3339 or YYYY-MM-DD HH:MM:SS)
    #[arg(long, env = "RUN_UNTIL")]
    run_until: Option<String>,
    /// Price points per analysis window
    #[arg(long = "window", env = "HISTORY_WINDOW", default_value_t = DEFAULT_HISTORY_WINDOW)]
    history_window: usize,
    /// Local time window for the daily report, HH:MM-HH:MM
    #[arg(long, env = "REPORT_WINDOW", default_value = "16:00-16:30")]
    report_window: String,
    /// Quote asset appended to bare instruments for Binance symbols
    #[arg(long, env = "QUOTE_ASSET", default_value = "USDT")]
    quote_asset: String,
}

#[derive(Clone)]
struct AppState {
    store: SqliteHistoryStore,
    board: Arc<AnalysisBoard>,
    progress: Arc<SchedulerProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,trend_sentinel=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,trend_sentinel=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before clap reads its env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run { run } => {
            cmd_run(run).await?;
        }
        Commands::Serve { host, port, run } => {
            cmd_serve(&host, port, run).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// Instruments from the CLI/env list plus the ticker file, if present
fn collect_instruments(args: &RunArgs) -> Vec<Instrument> {
    let mut raw = args.tickers.join(",");

    match std::fs::read_to_string(&args.ticker_file) {
        Ok(contents) => {
            raw.push('\n');
            raw.push_str(&contents);
        }
        Err(e) => debug!(path = %args.ticker_file.display(), error = %e, "No ticker file"),
    }

    parse_instruments(&raw)
}

fn build_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let config = RunConfig {
        instruments: collect_instruments(args),
        run_wild: args.wild,
        rumour_ratio: args.rumour.as_deref().map(parse_rumour_ratio).transpose()?,
        concurrency: args.concurrency,
        interval: parse_interval(&args.interval),
        deadline: args
            .run_until
            .as_deref()
            .map(parse_deadline)
            .unwrap_or(Deadline::Never),
        history_window: args.history_window,
        report_window: parse_report_window(&args.report_window)?,
    };
    config.validate()?;
    Ok(config)
}

async fn open_database() -> anyhow::Result<(persistence::Database, String)> {
    let db_path =
        std::env::var("SENTINEL_DB_PATH").unwrap_or_else(|_| "data/sentinel.db".to_string());
    let db = persistence::Database::new(Path::new(&db_path))
        .await
        .map_err(|e| {
            error!("Failed to initialize database: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;
    info!("Database initialized: {}", db_path);
    Ok((db, db_path))
}

fn build_notifier() -> Arc<dyn Notifier> {
    match std::env::var("SENTINEL_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => {
            info!("Daily reports go to the configured webhook");
            Arc::new(WebhookNotifier::new(url.trim()))
        }
        _ => Arc::new(LogNotifier),
    }
}

fn build_scheduler(config: RunConfig, args: &RunArgs, store: SqliteHistoryStore) -> Scheduler {
    let prices = Arc::new(BinanceClient::new().quote_asset(&args.quote_asset));
    let run_wild = config.run_wild;

    let scheduler = Scheduler::new(config, prices, Arc::new(store), build_notifier());
    if run_wild {
        let feed = RedditFeed::new(RiskLevel::parse(&args.risk));
        info!(subreddit = feed.subreddit(), "Wild mode: mining rumor feed");
        scheduler.with_feed(Arc::new(feed))
    } else {
        scheduler
    }
}

fn print_banner(config: &RunConfig, db_path: &str) {
    println!("\n=== Trend Sentinel v{} ===", APP_VERSION);
    println!("Database: {}", db_path);
    println!(
        "Instruments: {}",
        if config.instruments.is_empty() {
            "(none, discovery only)".to_string()
        } else {
            config
                .instruments
                .iter()
                .map(Instrument::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    println!(
        "Interval: {:?} | Concurrency: {} | Window: {} | Wild: {} | Deadline: {}",
        config.interval,
        config.concurrency,
        config.history_window,
        config.run_wild,
        match config.deadline {
            Deadline::Never => "never".to_string(),
            Deadline::At(at) => at.with_timezone(&Local).to_rfc3339(),
        }
    );
    println!("Press Ctrl+C to stop\n");
}

/// Cancel the scheduler on Ctrl+C; workers stop after their current iteration
fn cancel_on_ctrl_c(progress: Arc<SchedulerProgress>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, stopping after the current iteration...");
        progress.cancel();
    });
}

// ============================================================================
// Run command: scheduler only
// ============================================================================

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let (db, db_path) = open_database().await?;
    print_banner(&config, &db_path);

    let scheduler = Arc::new(build_scheduler(
        config,
        &args,
        SqliteHistoryStore::new(db.pool_clone()),
    ));
    let progress = scheduler.progress();
    cancel_on_ctrl_c(progress.clone());

    scheduler.run().await;

    let summary = progress.snapshot();
    println!(
        "\nStopped: {} iterations, {} failed, {} daily reports sent",
        summary.iterations, summary.failures, summary.reports_sent
    );
    Ok(())
}

// ============================================================================
// Serve command: scheduler plus Axum status API
// ============================================================================

async fn cmd_serve(host: &str, port: u16, args: RunArgs) -> anyhow::Result<()> {
    info!("Trend Sentinel v{} starting...", APP_VERSION);

    let config = build_config(&args)?;
    let (db, db_path) = open_database().await?;
    let store = SqliteHistoryStore::new(db.pool_clone());
    print_banner(&config, &db_path);

    let scheduler = Arc::new(build_scheduler(config, &args, store.clone()));
    let state = AppState {
        store,
        board: scheduler.board(),
        progress: scheduler.progress(),
    };
    let scheduler_handle = tokio::spawn(scheduler.run());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/analysis", get(api_analysis))
        .route("/reports", get(api_reports))
        .with_state(state.clone());

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check and scheduler counters");
    println!("  GET  /api/analysis            - Latest analysis per instrument");
    println!("  GET  /api/reports?date=       - Daily reports (default today)\n");

    let progress = state.progress.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl+C received, stopping after the current iteration...");
            progress.cancel();
        })
        .await?;

    info!("HTTP server stopped, waiting for workers");
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "trend-sentinel",
        "version": APP_VERSION,
        "scheduler": state.progress.snapshot(),
    }))
}

/// GET /api/analysis: latest result per instrument
async fn api_analysis(State(state): State<AppState>) -> Json<serde_json::Value> {
    let results = state.board.snapshot();
    Json(serde_json::json!({
        "count": results.len(),
        "results": results,
    }))
}

#[derive(Debug, Deserialize)]
struct ReportsQuery {
    date: Option<String>,
}

/// GET /api/reports?date=YYYY-MM-DD, persisted reports for one day
async fn api_reports(
    State(state): State<AppState>,
    Query(params): Query<ReportsQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let date = match params.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            warn!(date = raw, error = %e, "Bad report date");
            StatusCode::BAD_REQUEST
        })?,
        None => Local::now().date_naive(),
    };

    match state.store.reports_on(date).await {
        Ok(reports) => Ok(Json(serde_json::json!({
            "date": date,
            "count": reports.len(),
            "reports": reports,
        }))),
        Err(e) => Ok(Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to load reports: {}", e),
        }))),
    }
}
