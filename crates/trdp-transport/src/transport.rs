//! The `Transport` capability boundary the engine drives the underlying
//! network stack through.
//!
//! This is the only place the core touches anything resembling a
//! socket; everything above it (scheduler, RX pipeline, codec) is
//! transport-agnostic and exercises this trait through test doubles.

use std::sync::Arc;

use trdp_common::TransportError;

/// Opaque handle to an open transport session, returned by
/// [`Transport::open_session`].
pub type SessionHandle = u64;

/// RX delivery callback invoked by the transport on packet arrival.
///
/// Arguments: the session the packet arrived on, the telegram's
/// `com_id`, and the raw payload bytes. Implementations may invoke this
/// from an arbitrary thread; the receiving engine takes its own lock
/// before touching shared state (see `trdp-runtime`).
pub type RxCallback = Arc<dyn Fn(SessionHandle, u32, &[u8]) + Send + Sync>;

/// Per-session PD configuration passed to `open_session`.
///
/// Mirrors the process-level configuration `Engine::load_config` hands
/// to the transport at session-open time: the host identity, a nominal
/// service cycle, and whether the transport should use blocking I/O.
#[derive(Debug, Clone)]
pub struct PdSessionConfig {
    /// Host this session is opened for.
    pub host_name: String,
    /// Nominal transport-level service cycle, in milliseconds.
    pub cycle_ms: u64,
    /// Whether the transport's RX path uses blocking I/O.
    pub blocking_io: bool,
}

impl Default for PdSessionConfig {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            cycle_ms: 100,
            blocking_io: true,
        }
    }
}

/// Capability boundary to the underlying PD transport.
///
/// One session is opened per `InterfaceDef`; `com_id` subscriptions and
/// publishes are scoped to a session. Implementations must be safe to
/// share across the scheduler thread, RX delivery thread(s), and any
/// control-plane caller.
pub trait Transport: Send + Sync {
    /// One-shot, idempotent process-wide initialization.
    fn init(&self) -> Result<(), TransportError>;

    /// Open a session bound to `host_ip` on the named interface,
    /// registering `rx_callback` for all future RX delivery on this
    /// session.
    fn open_session(
        &self,
        interface: &str,
        host_ip: &str,
        pd_config: &PdSessionConfig,
        rx_callback: RxCallback,
    ) -> Result<SessionHandle, TransportError>;

    /// Subscribe the session to `com_id`, with `timeout_us` as the
    /// liveness timeout hint (`0` requests the transport's default).
    fn subscribe(
        &self,
        session: SessionHandle,
        interface: &str,
        com_id: u32,
        timeout_us: u64,
    ) -> Result<(), TransportError>;

    /// Publish `payload` for `com_id` on `session`.
    fn publish(
        &self,
        session: SessionHandle,
        com_id: u32,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Close a previously opened session, releasing its resources.
    fn close_session(&self, session: SessionHandle) -> Result<(), TransportError>;

    /// Tear down the process-wide transport stack. Idempotent.
    fn terminate(&self) -> Result<(), TransportError>;
}
