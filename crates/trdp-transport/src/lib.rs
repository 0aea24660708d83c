//! Transport capability boundary for the TRDP PD engine.
//!
//! Provides:
//! - [`Transport`] trait abstracting the underlying PD network stack
//! - [`SimulatedTransport`], an in-process loopback bus for tests
//! - [`UdpTransport`], a real `UdpSocket`-backed implementation

mod simulated;
mod transport;
mod udp;

pub use simulated::SimulatedTransport;
pub use transport::{PdSessionConfig, RxCallback, SessionHandle, Transport};
pub use udp::{UdpTransport, DEFAULT_PD_PORT};
