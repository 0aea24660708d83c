//! PD engine daemon entry point.
//!
//! Loads a bus configuration for one named host, starts the engine's
//! scheduler, and logs periodic diagnostics until a shutdown signal
//! arrives. A `SIGHUP` triggers a config reload from the same path
//! rather than a restart.

mod diagnostics;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use trdp_runtime::Engine;
use trdp_transport::{SimulatedTransport, Transport, UdpTransport};

use crate::diagnostics::{DiagnosticsCollector, DiagnosticsState, StatusFormat};
use crate::signals::SignalHandler;

/// PD engine daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "trdp-daemon",
    about = "TRDP process-data engine - real-time telegram exchange for one bus participant",
    version,
    long_about = None
)]
struct Args {
    /// Path to the bus configuration XML file.
    #[arg(long, short = 'c', value_name = "FILE")]
    config: PathBuf,

    /// This participant's host name, as it appears in the configuration's
    /// telegram source/destination URIs.
    #[arg(long, short = 'n', value_name = "NAME")]
    host_name: String,

    /// Run against the in-process simulated transport instead of UDP.
    #[arg(long, short = 's')]
    simulated: bool,

    /// UDP port to bind when not running simulated.
    #[arg(long, default_value_t = trdp_transport::DEFAULT_PD_PORT)]
    port: u16,

    /// Interval, in seconds, between periodic status log lines.
    #[arg(long, default_value = "10")]
    status_interval_secs: u64,

    /// Emit periodic status lines as a single JSON object instead of
    /// structured tracing fields, for a log shipper or a polling adapter.
    #[arg(long)]
    status_json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting TRDP PD daemon");

    let transport: Arc<dyn Transport> = if args.simulated {
        info!("using simulated transport");
        Arc::new(SimulatedTransport::new())
    } else {
        info!(port = args.port, "using UDP transport");
        Arc::new(UdpTransport::with_port(args.port))
    };

    let engine = Engine::new(transport);
    let signal_handler = SignalHandler::new().context("failed to set up signal handlers")?;
    let diag_state = Arc::new(DiagnosticsState::new());
    let diagnostics = DiagnosticsCollector::new(Arc::clone(&diag_state));

    run_daemon(&engine, &args, &signal_handler, &diagnostics)
}

fn init_logging(level: &str) {
    let filter = format!(
        "trdp_daemon={level},trdp_runtime={level},trdp_transport={level},trdp_config={level},trdp_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn run_daemon(
    engine: &Engine,
    args: &Args,
    signal_handler: &SignalHandler,
    diagnostics: &DiagnosticsCollector,
) -> Result<()> {
    engine
        .load_config(&args.config, &args.host_name)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    diagnostics.state().record_reload();
    info!(host = %args.host_name, "configuration loaded");

    engine.start();
    info!(state = %engine.state(), "engine started, entering main loop");

    let status_format = if args.status_json {
        StatusFormat::Json
    } else {
        StatusFormat::Fields
    };
    let status_interval = Duration::from_secs(args.status_interval_secs.max(1));
    let poll_interval = Duration::from_millis(100);
    let mut since_last_status = Duration::ZERO;

    loop {
        if signal_handler.shutdown_requested() {
            info!("shutdown signal received, stopping engine");
            break;
        }

        if signal_handler.take_reload_request() {
            info!(config = ?args.config, "reload signal received, reloading configuration");
            match engine.load_config(&args.config, &args.host_name) {
                Ok(()) => diagnostics.state().record_reload(),
                Err(e) => warn!(error = %e, "configuration reload failed, keeping previous configuration"),
            }
        }

        std::thread::sleep(poll_interval);
        since_last_status += poll_interval;
        if since_last_status >= status_interval {
            diagnostics.log_status(engine, status_format);
            since_last_status = Duration::ZERO;
        }
    }

    engine.stop();
    diagnostics.log_status(engine, status_format);
    info!("daemon shutdown complete");

    Ok(())
}
