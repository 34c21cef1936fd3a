// =============================================================================
// Meridian Trade Core — Main Entry Point
// =============================================================================
//
// The engine starts against the configured exchange; missing credentials
// degrade to simulation + rules so a bare checkout always runs safely.
//
// Exit codes: 0 normal stop, 1 fatal config error, 2 unrecoverable runtime
// error.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysts;
mod config;
mod core;
mod costs;
mod cycle;
mod events;
mod exchange;
mod executor;
mod fanout;
mod fusion;
mod indicators;
mod ledger;
mod market_data;
mod persistence;
mod regime;
mod scheduler;
mod sentinel;
mod strategist;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::Core;

const DEFAULT_CONFIG_PATH: &str = "meridian_config.json";

#[tokio::main]
async fn main() {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Trade Core — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Invocation ────────────────────────────────────────────────────
    let command = std::env::args().nth(1).unwrap_or_else(|| "start".to_string());
    if command != "start" {
        error!(command = %command, "unknown command (only 'start' is supported)");
        std::process::exit(1);
    }

    // ── 3. Configuration ─────────────────────────────────────────────────
    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %config_path, error = %e, "config not loaded — using defaults");
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "fatal configuration error");
        std::process::exit(1);
    }

    info!(
        exchange = ?config.effective_exchange(),
        stage = ?config.stage,
        pairs = ?config.pairs,
        cycle_interval_minutes = config.cycle_interval_minutes,
        "configuration ready"
    );

    // ── 4. Build and run the core ────────────────────────────────────────
    let core = match Core::init(config.clone()) {
        Ok(core) => core,
        Err(e) => {
            error!(error = %e, "failed to initialise core");
            std::process::exit(2);
        }
    };

    let scheduler = core.run().await;
    info!("all subsystems running — press Ctrl+C to stop");

    // ── 5. Wait for shutdown or scheduler death ──────────────────────────
    let mut freeze_poll = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "failed to listen for shutdown signal");
                    std::process::exit(2);
                }
                warn!("shutdown signal received — stopping gracefully");
                break;
            }
            _ = freeze_poll.tick() => {
                let status = scheduler.status();
                if status.stopped {
                    // The scheduler froze itself (invariant violation).
                    error!(
                        last_error = ?status.last_error,
                        "scheduler stopped on its own — unrecoverable"
                    );
                    core.stop().await;
                    std::process::exit(2);
                }
            }
        }
    }

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    core.stop().await;

    if let Err(e) = config.save(&config_path) {
        warn!(error = %e, "failed to save config on shutdown");
    }

    info!("Meridian Trade Core shut down complete.");
}
