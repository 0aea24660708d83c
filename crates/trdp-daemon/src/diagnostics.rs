//! Diagnostics and periodic status logging for the PD engine daemon.
//!
//! Unlike the cycle-time histogram this module descends from (the PD
//! engine has no scan-cycle deadline to miss), diagnostics here are an
//! aggregate over [`trdp_runtime::PdSnapshot`]s: how many telegrams are
//! loaded, how many have ever been received, and how many are
//! currently timed out.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;
use trdp_runtime::{Engine, PdSnapshot};

/// Status line rendering the daemon's periodic diagnostics log uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFormat {
    /// One structured `tracing` event with individual fields (default).
    #[default]
    Fields,
    /// A single JSON object per status line, convenient for a log
    /// shipper or an adapter polling the daemon's own stdout.
    Json,
}

/// Coarse health classification derived from the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every sink telegram has received at least one PD, none timed out.
    Healthy,
    /// At least one sink telegram is timed out, but RX is otherwise flowing.
    Degraded,
    /// No PD telegrams have ever been received.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A point-in-time rollup across every loaded telegram.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Coarse health classification.
    pub health: HealthStatus,
    /// Time since the daemon started.
    pub uptime_secs: u64,
    /// Number of loaded PD telegrams.
    pub telegram_count: usize,
    /// Sum of `rx_count` across all telegrams.
    pub total_rx: u64,
    /// Sum of `tx_count` across all telegrams.
    pub total_tx: u64,
    /// Sum of `timeout_count` across all telegrams.
    pub total_timeouts: u64,
    /// Count of `load_config` calls since start.
    pub reload_count: u32,
}

fn classify(snapshot: &[PdSnapshot]) -> HealthStatus {
    let sinks: Vec<&PdSnapshot> = snapshot
        .iter()
        .filter(|s| s.direction != trdp_common::Direction::Source)
        .collect();
    if sinks.is_empty() {
        return HealthStatus::Healthy;
    }
    if sinks.iter().all(|s| !s.last_rx_valid) {
        return HealthStatus::Unhealthy;
    }
    if sinks.iter().any(|s| s.timeout_count > 0) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

/// Shared counters the daemon's main loop updates directly.
#[derive(Debug)]
pub struct DiagnosticsState {
    started_at: Instant,
    reload_count: AtomicU32,
    status_log_count: AtomicU64,
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsState {
    /// Start tracking uptime from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            reload_count: AtomicU32::new(0),
            status_log_count: AtomicU64::new(0),
        }
    }

    /// Record a completed `load_config` call.
    pub fn record_reload(&self) {
        self.reload_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Periodically logs an aggregate status line from the engine's
/// snapshot. Holds no lock of its own - each call takes a fresh
/// `Engine::get_snapshot()`.
pub struct DiagnosticsCollector {
    state: Arc<DiagnosticsState>,
}

impl DiagnosticsCollector {
    /// Wrap shared diagnostics state.
    #[must_use]
    pub fn new(state: Arc<DiagnosticsState>) -> Self {
        Self { state }
    }

    /// Shared state accessor, so the main loop can record reloads.
    #[must_use]
    pub fn state(&self) -> &DiagnosticsState {
        &self.state
    }

    /// Build a rollup snapshot from the engine's current state.
    #[must_use]
    pub fn snapshot(&self, engine: &Engine) -> DiagnosticsSnapshot {
        let pd_snapshot = engine.get_snapshot();
        DiagnosticsSnapshot {
            health: classify(&pd_snapshot),
            uptime_secs: self.state.started_at.elapsed().as_secs(),
            telegram_count: pd_snapshot.len(),
            total_rx: pd_snapshot.iter().map(|s| s.rx_count).sum(),
            total_tx: pd_snapshot.iter().map(|s| s.tx_count).sum(),
            total_timeouts: pd_snapshot.iter().map(|s| s.timeout_count).sum(),
            reload_count: self.state.reload_count.load(Ordering::Relaxed),
        }
    }

    /// Log one status line and bump the internal log counter.
    ///
    /// `Fields` emits one structured `tracing` event; `Json` emits a
    /// single serialized [`DiagnosticsSnapshot`] instead, for a log
    /// shipper or an adapter polling the daemon's own stdout.
    pub fn log_status(&self, engine: &Engine, format: StatusFormat) {
        let s = self.snapshot(engine);
        self.state.status_log_count.fetch_add(1, Ordering::Relaxed);
        match format {
            StatusFormat::Fields => info!(
                health = %s.health,
                uptime_secs = s.uptime_secs,
                telegrams = s.telegram_count,
                total_rx = s.total_rx,
                total_tx = s.total_tx,
                total_timeouts = s.total_timeouts,
                reloads = s.reload_count,
                "periodic status"
            ),
            StatusFormat::Json => match serde_json::to_string(&s) {
                Ok(json) => info!(status = json, "periodic status"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize diagnostics snapshot"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use trdp_transport::SimulatedTransport;

    #[test]
    fn classify_empty_snapshot_is_healthy() {
        assert_eq!(classify(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn collector_reports_zero_counts_before_any_traffic() {
        let engine = Engine::new(StdArc::new(SimulatedTransport::new()));
        let collector = DiagnosticsCollector::new(Arc::new(DiagnosticsState::new()));
        let snapshot = collector.snapshot(&engine);
        assert_eq!(snapshot.telegram_count, 0);
        assert_eq!(snapshot.total_rx, 0);
        assert_eq!(snapshot.health, HealthStatus::Healthy);
    }

    #[test]
    fn record_reload_increments_counter() {
        let engine = Engine::new(StdArc::new(SimulatedTransport::new()));
        let state = Arc::new(DiagnosticsState::new());
        let collector = DiagnosticsCollector::new(Arc::clone(&state));
        state.record_reload();
        state.record_reload();
        assert_eq!(collector.snapshot(&engine).reload_count, 2);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let engine = Engine::new(StdArc::new(SimulatedTransport::new()));
        let collector = DiagnosticsCollector::new(Arc::new(DiagnosticsState::new()));
        let snapshot = collector.snapshot(&engine);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"health\":\"healthy\""));
        assert!(json.contains("\"telegram_count\":0"));
    }

    #[test]
    fn log_status_both_formats_do_not_panic() {
        let engine = Engine::new(StdArc::new(SimulatedTransport::new()));
        let collector = DiagnosticsCollector::new(Arc::new(DiagnosticsState::new()));
        collector.log_status(&engine, StatusFormat::Fields);
        collector.log_status(&engine, StatusFormat::Json);
    }
}
