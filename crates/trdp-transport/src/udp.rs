//! Real `UdpSocket`-backed `Transport`.
//!
//! Each session binds one socket to `host_ip:port` (default port
//! [`DEFAULT_PD_PORT`], the conventional TRDP PD port) and publishes by
//! broadcasting to that interface's `/24` broadcast address. A
//! dedicated RX thread per session demultiplexes incoming datagrams by
//! a small fixed header and hands matching payloads to the registered
//! callback - the header is private to this module, not the dataset
//! codec described in `trdp-runtime`.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};
use trdp_common::TransportError;

use crate::transport::{PdSessionConfig, RxCallback, SessionHandle, Transport};

/// Conventional TRDP process-data UDP port.
pub const DEFAULT_PD_PORT: u16 = 17224;

const HEADER_LEN: usize = 8;
const MAX_DATAGRAM: usize = 1500;

struct UdpSession {
    socket: Arc<UdpSocket>,
    subscriptions: Arc<Mutex<HashSet<u32>>>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    broadcast_addr: SocketAddrV4,
}

/// Transport backend driving real UDP sockets.
pub struct UdpTransport {
    port: u16,
    sessions: Mutex<HashMap<SessionHandle, UdpSession>>,
    next_handle: AtomicU64,
}

impl UdpTransport {
    /// Transport bound to the conventional PD port.
    #[must_use]
    pub fn new() -> Self {
        Self::with_port(DEFAULT_PD_PORT)
    }

    /// Transport bound to a specific port, mainly for tests that can't
    /// share the conventional port across processes.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast_address_for(host_ip: &Ipv4Addr, port: u16) -> SocketAddrV4 {
    let octets = host_ip.octets();
    SocketAddrV4::new(Ipv4Addr::new(octets[0], octets[1], octets[2], 255), port)
}

fn encode_header(com_id: u32, length: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..4].copy_from_slice(&com_id.to_be_bytes());
    buf[4..8].copy_from_slice(&length.to_be_bytes());
    buf
}

fn decode_header(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let com_id = u32::from_be_bytes(buf[0..4].try_into().ok()?);
    let length = u32::from_be_bytes(buf[4..8].try_into().ok()?);
    Some((com_id, length))
}

fn rx_loop(
    session: SessionHandle,
    socket: Arc<UdpSocket>,
    subscriptions: Arc<Mutex<HashSet<u32>>>,
    running: Arc<AtomicBool>,
    callback: RxCallback,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, _addr)) => {
                let Some((com_id, length)) = decode_header(&buf[..n]) else {
                    trace!(session, "dropped datagram: short header");
                    continue;
                };
                let length = length as usize;
                if HEADER_LEN + length > n {
                    trace!(session, com_id, "dropped datagram: truncated payload");
                    continue;
                }
                let interested = subscriptions
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&com_id);
                if interested {
                    callback(session, com_id, &buf[HEADER_LEN..HEADER_LEN + length]);
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!(session, error = %e, "UDP receive error, stopping RX thread");
                break;
            }
        }
    }
}

impl Transport for UdpTransport {
    fn init(&self) -> Result<(), TransportError> {
        debug!(port = self.port, "UDP transport initialized");
        Ok(())
    }

    fn open_session(
        &self,
        interface: &str,
        host_ip: &str,
        _pd_config: &PdSessionConfig,
        rx_callback: RxCallback,
    ) -> Result<SessionHandle, TransportError> {
        let ip: Ipv4Addr = host_ip
            .parse()
            .map_err(|e| TransportError::SessionOpenFailure {
                host_ip: host_ip.to_string(),
                reason: format!("invalid IPv4 address: {e}"),
            })?;

        let socket = UdpSocket::bind((ip, self.port)).map_err(|e| TransportError::SessionOpenFailure {
            host_ip: host_ip.to_string(),
            reason: format!("bind failed: {e}"),
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::SessionOpenFailure {
                host_ip: host_ip.to_string(),
                reason: format!("set_broadcast failed: {e}"),
            })?;
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .map_err(|e| TransportError::SessionOpenFailure {
                host_ip: host_ip.to_string(),
                reason: format!("set_read_timeout failed: {e}"),
            })?;

        let socket = Arc::new(socket);
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));
        let running = Arc::new(AtomicBool::new(true));

        let rx_thread = {
            let socket = Arc::clone(&socket);
            let subscriptions = Arc::clone(&subscriptions);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(format!("trdp-udp-rx-{handle}"))
                .spawn(move || rx_loop(handle, socket, subscriptions, running, rx_callback))
                .map_err(|e| TransportError::SessionOpenFailure {
                    host_ip: host_ip.to_string(),
                    reason: format!("failed to spawn RX thread: {e}"),
                })?
        };

        let session = UdpSession {
            broadcast_addr: broadcast_address_for(&ip, self.port),
            socket,
            subscriptions,
            running,
            rx_thread: Some(rx_thread),
        };

        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, session);

        debug!(interface, host_ip, session = handle, "opened UDP session");
        Ok(handle)
    }

    fn subscribe(
        &self,
        session: SessionHandle,
        interface: &str,
        com_id: u32,
        timeout_us: u64,
    ) -> Result<(), TransportError> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let s = sessions
            .get(&session)
            .ok_or_else(|| TransportError::SubscribeFailure {
                com_id,
                interface: interface.to_string(),
                reason: "unknown session".to_string(),
            })?;
        s.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(com_id);
        trace!(session, com_id, timeout_us, "subscribed on UDP session");
        Ok(())
    }

    fn publish(
        &self,
        session: SessionHandle,
        com_id: u32,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(s) = sessions.get(&session) else {
            return Ok(());
        };
        let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
        datagram.extend_from_slice(&encode_header(com_id, payload.len() as u32));
        datagram.extend_from_slice(payload);
        s.socket
            .send_to(&datagram, s.broadcast_addr)
            .map_err(|e| TransportError::InitFailure(format!("publish failed: {e}")))?;
        Ok(())
    }

    fn close_session(&self, session: SessionHandle) -> Result<(), TransportError> {
        let removed = self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&session);
        if let Some(mut s) = removed {
            s.running.store(false, Ordering::Release);
            if let Some(thread) = s.rx_thread.take() {
                let _ = thread.join();
            }
        }
        Ok(())
    }

    fn terminate(&self) -> Result<(), TransportError> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        for handle in handles {
            self.close_session(handle)?;
        }
        debug!("UDP transport terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let header = encode_header(1001, 42);
        assert_eq!(decode_header(&header), Some((1001, 42)));
    }

    #[test]
    fn short_buffer_has_no_header() {
        assert_eq!(decode_header(&[1, 2, 3]), None);
    }

    #[test]
    fn broadcast_address_uses_last_octet_255() {
        let ip: Ipv4Addr = "10.0.0.7".parse().unwrap();
        let addr = broadcast_address_for(&ip, 17224);
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 255), 17224));
    }

    #[test]
    fn open_session_with_invalid_ip_fails() {
        let transport = UdpTransport::with_port(0);
        let err = transport
            .open_session(
                "eth0",
                "not-an-ip",
                &PdSessionConfig::default(),
                Arc::new(|_, _, _| {}),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::SessionOpenFailure { .. }));
    }
}
