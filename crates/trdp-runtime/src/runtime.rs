//! Mutable per-telegram and per-interface runtime state.
//!
//! `PdTelegramDef`/`Dataset`/`InterfaceDef` are immutable and owned by
//! the [`crate::engine::Engine`]'s current [`trdp_common::ConfigModel`];
//! `PdRuntime` refers back to its def by index into that config's
//! `telegrams` vector rather than holding a pointer, so a `load_config`
//! rebuild can't leave a dangling reference - the whole table is
//! rebuilt atomically during stop/rebuild/start.

use trdp_common::time::MicroInstant;
use trdp_transport::SessionHandle;

/// Mutable state for one PD telegram, one per `PdTelegramDef`.
#[derive(Debug, Clone)]
pub struct PdRuntime {
    /// Index of the owning def in the engine's current `ConfigModel::telegrams`.
    pub def_index: usize,
    /// Bytes to transmit; replaced atomically by `set_pd_values`.
    pub tx_payload: Vec<u8>,
    /// Whether this telegram is due to fire on the scheduler.
    pub tx_enabled: bool,
    /// Next scheduled transmission time.
    pub next_tx_due: MicroInstant,
    /// Most recently received payload.
    pub last_rx_payload: Vec<u8>,
    /// Timestamp of the most recent RX; meaningful only if `last_rx_valid`.
    pub last_rx_time: MicroInstant,
    /// Set on first RX; never cleared.
    pub last_rx_valid: bool,
    /// Monotonically increasing RX count.
    pub rx_count: u64,
    /// Monotonically increasing TX count.
    pub tx_count: u64,
    /// Monotonically increasing liveness-watchdog timeout count.
    pub timeout_count: u64,
    /// Microseconds between the last two RX events.
    pub last_period_us: f64,
    /// Exponential running average of `last_period_us`.
    pub avg_period_us: f64,
    /// Suppresses repeat `timeout_count` increments until the next RX
    /// clears it. Passive bookkeeping only - no fault semantics attach
    /// to a PD timeout.
    pub(crate) timed_out: bool,
}

impl PdRuntime {
    /// A fresh runtime for a telegram def at `def_index`.
    ///
    /// `tx_enabled` starts `true` unless the direction is `Sink` - a
    /// sink-only telegram never has anything to transmit.
    pub fn new(def_index: usize, tx_enabled: bool) -> Self {
        Self {
            def_index,
            tx_payload: Vec::new(),
            tx_enabled,
            next_tx_due: MicroInstant::default(),
            last_rx_payload: Vec::new(),
            last_rx_time: MicroInstant::default(),
            last_rx_valid: false,
            rx_count: 0,
            tx_count: 0,
            timeout_count: 0,
            last_period_us: 0.0,
            avg_period_us: 0.0,
            timed_out: false,
        }
    }
}

/// Mutable state for one network interface: its session handle and
/// the PD runtimes that subscribe on it.
#[derive(Debug, Clone)]
pub struct InterfaceRuntime {
    /// Index of the owning `InterfaceDef` in the engine's `ConfigModel::interfaces`.
    pub def_index: usize,
    /// Open transport session bound to this interface's host IP.
    pub session: SessionHandle,
    /// Indices into the engine's `pd_runtimes` subscribed on this interface.
    pub pd_indices: Vec<usize>,
}
