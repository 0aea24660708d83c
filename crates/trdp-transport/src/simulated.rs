//! In-process `Transport` used by tests and the daemon's `--simulated`
//! mode: no sockets, just a shared subscriber table keyed by `com_id`.
//!
//! `publish` never invokes a subscriber's RX callback directly - doing
//! so while the publisher holds its own lock (the scheduler's engine
//! lock, in practice) is exactly the lock-ordering hazard spec.md
//! section 4.8 rules out by having the transport deliver RX from its
//! own thread. Instead `publish` looks up matching subscribers,
//! releases the bus lock, and hands each delivery off to a dedicated
//! background thread via a channel; callbacks run there, with none of
//! the publisher's locks held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use tracing::{debug, trace};
use trdp_common::TransportError;

use crate::transport::{PdSessionConfig, RxCallback, SessionHandle, Transport};

struct SessionState {
    host_ip: String,
    callback: RxCallback,
    subscriptions: Vec<u32>,
}

#[derive(Default)]
struct Bus {
    sessions: HashMap<SessionHandle, SessionState>,
}

/// One RX delivery, queued by `publish` and run on the delivery thread.
struct DeliveryJob {
    target: SessionHandle,
    com_id: u32,
    payload: Vec<u8>,
    callback: RxCallback,
}

/// A loopback bus: `publish` on one session queues a delivery job for
/// every other session subscribed to the same `com_id`; a dedicated
/// background thread drains the queue and invokes each RX callback.
/// Useful for exercising the scheduler, codec, and RX pipeline without
/// any real I/O.
pub struct SimulatedTransport {
    next_handle: AtomicU64,
    bus: Mutex<Bus>,
    delivery_tx: Mutex<Option<Sender<DeliveryJob>>>,
    delivery_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedTransport {
    /// Create an empty simulated bus and start its delivery thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<DeliveryJob>();
        let thread = std::thread::Builder::new()
            .name("trdp-sim-delivery".into())
            .spawn(move || {
                for job in rx {
                    (job.callback)(job.target, job.com_id, &job.payload);
                }
            })
            .expect("failed to spawn simulated delivery thread");

        Self {
            next_handle: AtomicU64::new(0),
            bus: Mutex::new(Bus::default()),
            delivery_tx: Mutex::new(Some(tx)),
            delivery_thread: Mutex::new(Some(thread)),
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which ends the
        // delivery thread's `for job in rx` loop; join it before the
        // rest of the struct is torn down.
        self.delivery_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = self
            .delivery_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Transport for SimulatedTransport {
    fn init(&self) -> Result<(), TransportError> {
        debug!("simulated transport initialized");
        Ok(())
    }

    fn open_session(
        &self,
        interface: &str,
        host_ip: &str,
        _pd_config: &PdSessionConfig,
        rx_callback: RxCallback,
    ) -> Result<SessionHandle, TransportError> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        bus.sessions.insert(
            handle,
            SessionState {
                host_ip: host_ip.to_string(),
                callback: rx_callback,
                subscriptions: Vec::new(),
            },
        );
        debug!(interface, host_ip, session = handle, "opened simulated session");
        Ok(handle)
    }

    fn subscribe(
        &self,
        session: SessionHandle,
        interface: &str,
        com_id: u32,
        timeout_us: u64,
    ) -> Result<(), TransportError> {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        let state = bus
            .sessions
            .get_mut(&session)
            .ok_or_else(|| TransportError::SubscribeFailure {
                com_id,
                interface: interface.to_string(),
                reason: "unknown session".to_string(),
            })?;
        state.subscriptions.push(com_id);
        trace!(session, com_id, timeout_us, "subscribed on simulated bus");
        Ok(())
    }

    fn publish(
        &self,
        session: SessionHandle,
        com_id: u32,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let jobs: Vec<DeliveryJob> = {
            let bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
            if !bus.sessions.contains_key(&session) {
                return Ok(());
            }
            bus.sessions
                .iter()
                .filter(|(&other_handle, state)| {
                    other_handle != session && state.subscriptions.contains(&com_id)
                })
                .map(|(&other_handle, state)| DeliveryJob {
                    target: other_handle,
                    com_id,
                    payload: payload.to_vec(),
                    callback: state.callback.clone(),
                })
                .collect()
        };

        let tx = self.delivery_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            for job in jobs {
                let _ = tx.send(job);
            }
        }
        Ok(())
    }

    fn close_session(&self, session: SessionHandle) -> Result<(), TransportError> {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        bus.sessions.remove(&session);
        Ok(())
    }

    fn terminate(&self) -> Result<(), TransportError> {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        bus.sessions.clear();
        debug!("simulated transport terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        loop {
            if check() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn publish_delivers_to_subscribed_session_only() {
        let transport = SimulatedTransport::new();
        transport.init().unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        let sink_cb: RxCallback = Arc::new(move |_session, com_id, payload| {
            assert_eq!(com_id, 42);
            assert_eq!(payload, [1, 2, 3]);
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        let source = transport
            .open_session("eth0", "10.0.0.1", &PdSessionConfig::default(), Arc::new(|_, _, _| {}))
            .unwrap();
        let sink = transport
            .open_session("eth0", "10.0.0.2", &PdSessionConfig::default(), sink_cb)
            .unwrap();
        let other = transport
            .open_session("eth0", "10.0.0.3", &PdSessionConfig::default(), Arc::new(|_, _, _| {
                panic!("unsubscribed session should not receive");
            }))
            .unwrap();

        transport.subscribe(sink, "eth0", 42, 0).unwrap();
        let _ = other;

        transport.publish(source, 42, &[1, 2, 3]).unwrap();
        assert!(
            wait_until(Duration::from_secs(1), || received.load(Ordering::SeqCst) == 1),
            "callback was not delivered by the background delivery thread"
        );
    }

    #[test]
    fn publish_on_unknown_session_is_a_noop() {
        let transport = SimulatedTransport::new();
        transport.publish(999, 1, &[0]).unwrap();
    }

    #[test]
    fn publish_does_not_invoke_callback_on_caller_thread() {
        let transport = SimulatedTransport::new();
        let caller_thread = std::thread::current().id();
        let callback_thread = Arc::new(Mutex::new(None));
        let callback_thread_clone = Arc::clone(&callback_thread);

        let source = transport
            .open_session("eth0", "10.0.0.1", &PdSessionConfig::default(), Arc::new(|_, _, _| {}))
            .unwrap();
        let sink = transport
            .open_session(
                "eth0",
                "10.0.0.2",
                &PdSessionConfig::default(),
                Arc::new(move |_, _, _| {
                    *callback_thread_clone.lock().unwrap() = Some(std::thread::current().id());
                }),
            )
            .unwrap();
        transport.subscribe(sink, "eth0", 7, 0).unwrap();

        transport.publish(source, 7, &[0]).unwrap();

        assert!(wait_until(Duration::from_secs(1), || callback_thread
            .lock()
            .unwrap()
            .is_some()));
        assert_ne!(callback_thread.lock().unwrap().unwrap(), caller_thread);
    }
}
