//! BRACKETEER: protective bracket orders for crypto exchanges
//!
//! Entry point. Loads configuration, initialises structured logging,
//! and runs every configured bracket trade to completion.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use bracketeer::config::{self, LoggingConfig};
use bracketeer::engine::executor::{BracketService, ExecutionReport};
use bracketeer::gateway::paper::PaperGateway;
use bracketeer::gateway::{GatewayProvider, LiveGateways, PaperGateways};
use bracketeer::resolver::VenueResolver;

const BANNER: &str = r#"
 ___  ___    _   ___ _  _____ _____ ___ ___ ___
| _ )| _ \  /_\ / __| |/ / __|_   _| __| __| _ \
| _ \|   / / _ \ (__| ' <| _|  | | | _|| _||   /
|___/|_|_\/_/ \_\___|_|\_\___| |_| |___|___|_|_\

  Entry, take-profit, stop-loss
  v0.1.0
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    // Held for the life of the process or buffered file lines are lost.
    let _log_guard = init_logging(&cfg.logging)?;

    println!("{BANNER}");
    info!(
        config = %config_path,
        dry_run = cfg.execution.dry_run,
        entry_side = %cfg.execution.entry_side,
        brackets = cfg.brackets.len(),
        log_file = %cfg.logging.file,
        "BRACKETEER starting up"
    );

    if cfg.brackets.is_empty() {
        warn!("No [[brackets]] configured. Nothing to do.");
        return Ok(());
    }

    // -- Initialise components -------------------------------------------

    let gateways: Arc<dyn GatewayProvider> = if cfg.execution.dry_run {
        info!(
            fill_after_polls = ?cfg.paper.fill_after_polls,
            fee_rate = %cfg.paper.fee_rate,
            "[DRY RUN] Orders go to the paper venue"
        );
        Arc::new(PaperGateways::new(PaperGateway::new(
            cfg.paper.fill_after_polls,
            cfg.paper.fee_rate,
        )))
    } else {
        warn!("LIVE mode: orders will be sent to real venues");
        Arc::new(LiveGateways)
    };

    let resolver = VenueResolver::from_env(cfg.venue_table());
    let service = BracketService::new(resolver, gateways, cfg.execution.clone());

    // -- Run -------------------------------------------------------------

    let report = service.execute_all(&cfg.brackets).await;
    log_report(&report);

    if report.failed() > 0 {
        bail!("{} of {} bracket(s) failed", report.failed(), report.runs.len());
    }
    Ok(())
}

fn log_report(report: &ExecutionReport) {
    for run in report.critical() {
        if let Err(e) = &run.result {
            error!(
                venue = %run.order.venue,
                pair = %run.order.pair,
                error = %e,
                "CRITICAL: position open without full protection. Place the missing leg by hand."
            );
        }
    }

    for run in &report.runs {
        if let Err(e) = &run.result {
            if e.needs_reconciliation() && !e.is_critical() {
                warn!(
                    venue = %run.order.venue,
                    pair = %run.order.pair,
                    error = %e,
                    "Check this order on the venue before retrying"
                );
            }
        }
    }

    info!(
        total = report.runs.len(),
        placed = report.placed(),
        aborted = report.aborted(),
        failed = report.failed(),
        "Run complete"
    );
}

/// Initialise the tracing subscriber.
///
/// Stdout uses JSON format if `BRACKETEER_LOG_JSON` env var is set,
/// otherwise human-readable output. When a log file is configured, a
/// plain-text copy goes there through a non-blocking writer. Log level is
/// controlled by `RUST_LOG` (defaults to `bracketeer=info`).
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
    };

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bracketeer=info"))
    };

    let json_logging = std::env::var("BRACKETEER_LOG_JSON").is_ok();

    let stdout_layer: Box<dyn Layer<Registry> + Send + Sync> = if json_logging {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_filter(env_filter())
            .boxed()
    };

    let (file_layer, guard) = match logging.file_target() {
        Some((dir, name)) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
