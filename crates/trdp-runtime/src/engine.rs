//! The `Engine` facade: lifecycle (`load_config`/`start`/`stop`) and the
//! control surface (`enable_pd`, `set_pd_values`, `get_snapshot`) an
//! HTTP adapter drives.
//!
//! `EngineInner` holds everything the single shared state lock guards:
//! the current `ConfigModel`, the transport handle, and
//! the mutable `PdRuntime`/`InterfaceRuntime` tables. `Engine` wraps it
//! in `Arc<Mutex<_>>` plus an `AtomicBool` fast-path `running` flag the
//! scheduler checks every tick without taking the lock to decide
//! whether to keep looping.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use trdp_common::time::MonotonicClock;
use trdp_common::{ConfigModel, Direction, PdError, PdResult};
use trdp_transport::{PdSessionConfig, RxCallback, SessionHandle, Transport};

use crate::codec::{self, DecodedField};
use crate::runtime::{InterfaceRuntime, PdRuntime};
use crate::scheduler::Scheduler;

/// Everything the engine's single shared lock guards.
pub(crate) struct EngineInner {
    pub(crate) config: ConfigModel,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) pd_runtimes: Vec<PdRuntime>,
    pub(crate) interfaces: Vec<InterfaceRuntime>,
    pub(crate) clock: MonotonicClock,
}

/// A PD telegram's state as exposed to a control-plane caller: a
/// self-contained deep copy, safe to read after the lock is released.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PdSnapshot {
    /// Communication identifier.
    pub com_id: u32,
    /// Telegram name.
    pub name: String,
    /// Dataset this telegram's payload is shaped by.
    pub dataset_id: u32,
    /// Direction relative to the loaded host.
    pub direction: Direction,
    /// Transmission period in microseconds (0 = never due).
    pub cycle_us: u64,
    /// Owning interface name.
    pub interface: String,
    /// Whether periodic TX is currently enabled.
    pub tx_enabled: bool,
    /// Next scheduled TX time, in microseconds since the engine's clock epoch.
    pub next_tx_due_us: u64,
    /// Size of the current TX payload buffer, in bytes.
    pub tx_payload_size: usize,
    /// Size of the most recently received payload, in bytes.
    pub last_rx_payload_size: usize,
    /// Timestamp of the most recent RX, in microseconds since the engine's clock epoch.
    pub last_rx_time_us: u64,
    /// Whether at least one RX has been observed.
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
    /// Decoded field values from `last_rx_payload`, if the dataset is
    /// known and at least one RX has been observed.
    pub decoded_fields: Option<Vec<DecodedField>>,
}

/// Coarse lifecycle state, derived from the same flag the scheduler
/// checks - exposed separately only for clearer logging/`Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No scheduler thread is running.
    Idle,
    /// The scheduler thread is firing due telegrams.
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Facade over the PD runtime: lifecycle and control API.
///
/// Only one `Engine` should exist per process - it pins the
/// process-wide transport `init`/`terminate` lifecycle to its own
/// `load_config`/`stop` cycle.
pub struct Engine {
    inner: Arc<Mutex<EngineInner>>,
    running: Arc<AtomicBool>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Engine {
    /// Construct an engine driving `transport`. No sessions are opened
    /// and no configuration is loaded until [`Engine::load_config`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                config: ConfigModel::default(),
                transport,
                pd_runtimes: Vec::new(),
                interfaces: Vec::new(),
                clock: MonotonicClock::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
        }
    }

    /// Load an XML configuration and (re)materialize the runtime
    /// against it.
    ///
    /// If the engine is running or already has interfaces, it is fully
    /// stopped first; if it *had* been running, the scheduler is
    /// restarted once the new configuration is installed.
    pub fn load_config(&self, xml_path: &Path, host_name: &str) -> PdResult<()> {
        let was_running = self.running.load(Ordering::Acquire);
        let had_interfaces = !self.lock_inner().interfaces.is_empty();
        if was_running || had_interfaces {
            self.stop();
        }

        let config = trdp_config::load_from_xml(xml_path, host_name)?;

        let transport = self.lock_inner().transport.clone();
        transport.init()?;

        let (interfaces, pd_runtimes) = self.build_runtime(&config, &transport)?;

        {
            let mut inner = self.lock_inner();
            inner.config = config;
            inner.interfaces = interfaces;
            inner.pd_runtimes = pd_runtimes;
        }

        info!(host_name, "configuration loaded");

        if was_running {
            self.start();
        }

        Ok(())
    }

    /// Open one transport session per interface and subscribe every
    /// non-source telegram, tearing down whatever was opened so far on
    /// the first failure.
    fn build_runtime(
        &self,
        config: &ConfigModel,
        transport: &Arc<dyn Transport>,
    ) -> PdResult<(Vec<InterfaceRuntime>, Vec<PdRuntime>)> {
        let mut interfaces = Vec::new();

        for (def_index, iface_def) in config.interfaces.iter().enumerate() {
            let pd_config = PdSessionConfig {
                host_name: config.host_name.clone(),
                cycle_ms: 100,
                blocking_io: true,
            };
            let inner_for_cb = Arc::clone(&self.inner);
            let callback: RxCallback = Arc::new(move |session, com_id, payload| {
                EngineInner::on_pd_receive(&inner_for_cb, session, com_id, payload);
            });

            match transport.open_session(&iface_def.name, &iface_def.host_ip, &pd_config, callback) {
                Ok(session) => interfaces.push(InterfaceRuntime {
                    def_index,
                    session,
                    pd_indices: Vec::new(),
                }),
                Err(e) => {
                    close_all(transport, &interfaces);
                    return Err(PdError::from(e));
                }
            }
        }

        let mut pd_runtimes = Vec::new();
        for (def_index, def) in config.telegrams.iter().enumerate() {
            let pd_index = pd_runtimes.len();
            pd_runtimes.push(PdRuntime::new(def_index, def.direction != Direction::Sink));

            if def.direction == Direction::Source {
                continue;
            }

            let timeout_us = if def.cycle_us == 0 { 0 } else { 2 * def.cycle_us };
            let Some(iface) = interfaces
                .iter_mut()
                .find(|r: &&mut InterfaceRuntime| config.interfaces[r.def_index].name == def.interface_name)
            else {
                close_all(transport, &interfaces);
                return Err(PdError::InvariantViolation(format!(
                    "telegram {} references unknown interface {}",
                    def.com_id, def.interface_name
                )));
            };

            if let Err(e) = transport.subscribe(iface.session, &def.interface_name, def.com_id, timeout_us) {
                close_all(transport, &interfaces);
                return Err(PdError::from(e));
            }
            iface.pd_indices.push(pd_index);
        }

        Ok((interfaces, pd_runtimes))
    }

    /// Start the background scheduler. Idempotent: a second call while
    /// already running is a no-op.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);
        let clock = self.lock_inner().clock.clone();
        *scheduler = Some(Scheduler::spawn(
            Arc::clone(&self.inner),
            clock,
            Arc::clone(&self.running),
        ));
        info!("engine started");
    }

    /// Stop the scheduler, close every transport session, and tear down
    /// the transport stack. Idempotent.
    pub fn stop(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().unwrap_or_else(|e| e.into_inner()).take() {
            scheduler.stop();
        }
        self.running.store(false, Ordering::Release);

        let (transport, sessions): (Arc<dyn Transport>, Vec<SessionHandle>) = {
            let inner = self.lock_inner();
            (
                inner.transport.clone(),
                inner.interfaces.iter().map(|i| i.session).collect(),
            )
        };
        for session in sessions {
            if let Err(e) = transport.close_session(session) {
                warn!(error = %e, "failed to close transport session");
            }
        }
        if let Err(e) = transport.terminate() {
            warn!(error = %e, "failed to terminate transport");
        }

        self.lock_inner().interfaces.clear();
        info!("engine stopped");
    }

    /// Enable or disable periodic TX for the first telegram matching
    /// `com_id` (any interface). No-op if no telegram matches.
    pub fn enable_pd(&self, com_id: u32, enable: bool) {
        let mut inner = self.lock_inner();
        if let Some(idx) = inner.find_pd_index(com_id) {
            inner.pd_runtimes[idx].tx_enabled = enable;
        }
    }

    /// Encode `values` against the dataset of the first telegram
    /// matching `com_id` and replace its TX payload. No-op if the
    /// telegram or its dataset can't be resolved.
    pub fn set_pd_values(&self, com_id: u32, values: &HashMap<String, f64>) {
        let mut inner = self.lock_inner();
        let Some(idx) = inner.find_pd_index(com_id) else {
            return;
        };
        let dataset_id = inner.config.telegrams[inner.pd_runtimes[idx].def_index].dataset_id;
        let Some(dataset) = inner.config.dataset(dataset_id) else {
            return;
        };
        let payload = codec::encode(dataset, values);
        inner.pd_runtimes[idx].tx_payload = payload;
    }

    /// A deep-copied snapshot of every loaded PD telegram's current
    /// state, safe to read after the lock is released.
    #[must_use]
    pub fn get_snapshot(&self) -> Vec<PdSnapshot> {
        let inner = self.lock_inner();
        inner
            .pd_runtimes
            .iter()
            .map(|rt| {
                let def = &inner.config.telegrams[rt.def_index];
                let decoded_fields = if rt.last_rx_valid {
                    inner
                        .config
                        .dataset(def.dataset_id)
                        .map(|ds| codec::decode(ds, &rt.last_rx_payload))
                } else {
                    None
                };
                PdSnapshot {
                    com_id: def.com_id,
                    name: def.name.clone(),
                    dataset_id: def.dataset_id,
                    direction: def.direction,
                    cycle_us: def.cycle_us,
                    interface: def.interface_name.clone(),
                    tx_enabled: rt.tx_enabled,
                    next_tx_due_us: rt.next_tx_due.0,
                    tx_payload_size: rt.tx_payload.len(),
                    last_rx_payload_size: rt.last_rx_payload.len(),
                    last_rx_time_us: rt.last_rx_time.0,
                    last_rx_valid: rt.last_rx_valid,
                    rx_count: rt.rx_count,
                    tx_count: rt.tx_count,
                    timeout_count: rt.timeout_count,
                    last_period_us: rt.last_period_us,
                    avg_period_us: rt.avg_period_us,
                    decoded_fields,
                }
            })
            .collect()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.running.load(Ordering::Acquire) {
            EngineState::Running
        } else {
            EngineState::Idle
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn close_all(transport: &Arc<dyn Transport>, interfaces: &[InterfaceRuntime]) {
    for iface in interfaces.iter().rev() {
        let _ = transport.close_session(iface.session);
    }
}

impl EngineInner {
    fn find_pd_index(&self, com_id: u32) -> Option<usize> {
        self.pd_runtimes
            .iter()
            .position(|rt| self.config.telegrams[rt.def_index].com_id == com_id)
    }

    /// RX delivery entry point invoked from the transport's (possibly
    /// foreign) RX thread. Drops the packet silently if the session or
    /// `com_id` isn't recognized.
    pub(crate) fn on_pd_receive(
        inner: &Arc<Mutex<EngineInner>>,
        session: SessionHandle,
        com_id: u32,
        payload: &[u8],
    ) {
        let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());

        let Some(iface) = inner.interfaces.iter().find(|r| r.session == session) else {
            return;
        };
        let pd_index = iface.pd_indices.iter().copied().find(|&idx| {
            inner.config.telegrams[inner.pd_runtimes[idx].def_index].com_id == com_id
        });
        let Some(pd_index) = pd_index else {
            return;
        };

        let now = inner.clock.now();
        let rt = &mut inner.pd_runtimes[pd_index];
        rt.last_rx_payload = payload.to_vec();
        if rt.last_rx_valid {
            let period = now.since(rt.last_rx_time) as f64;
            rt.last_period_us = period;
            let n = (rt.rx_count + 1) as f64;
            rt.avg_period_us += (period - rt.avg_period_us) / n;
        } else {
            rt.last_period_us = 0.0;
            rt.avg_period_us = 0.0;
        }
        rt.last_rx_time = now;
        rt.last_rx_valid = true;
        rt.rx_count += 1;
        rt.timed_out = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trdp_transport::SimulatedTransport;

    fn write_xml(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    fn sample_config_xml(host: &str) -> String {
        format!(
            r#"<trdp-config>
                <bus-interface-list>
                    <bus-interface name="eth0" network-id="1" host-ip="127.0.0.1">
                        <telegram com-id="1001" dataset-id="10" type="SOURCE" cycle-us="5000" name="Status">
                            <source><uri host="{host}"/></source>
                            <destination><uri host="OTHER"/></destination>
                        </telegram>
                    </bus-interface>
                </bus-interface-list>
                <data-set-list>
                    <data-set id="10" name="StatusSet">
                        <element name="a" type="UINT16" array-size="0"/>
                        <element name="b" type="INT8" array-size="0"/>
                    </data-set>
                </data-set-list>
            </trdp-config>"#
        )
    }

    #[test]
    fn state_reflects_start_stop() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();
        assert_eq!(engine.state(), EngineState::Idle);

        engine.start();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop();
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn load_config_materializes_snapshot() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();

        let snapshot = engine.get_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].com_id, 1001);
        assert_eq!(snapshot[0].direction, Direction::Source);
        assert!(snapshot[0].tx_enabled);
    }

    #[test]
    fn set_pd_values_then_encode_is_visible_in_snapshot() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();

        let values = HashMap::from([("a".to_string(), 258.0), ("b".to_string(), -1.0)]);
        engine.set_pd_values(1001, &values);

        let snapshot = engine.get_snapshot();
        assert_eq!(snapshot[0].tx_payload_size, 3);
    }

    #[test]
    fn enable_pd_toggles_tx_enabled() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();

        engine.enable_pd(1001, false);
        assert!(!engine.get_snapshot()[0].tx_enabled);

        engine.enable_pd(1001, true);
        assert!(engine.get_snapshot()[0].tx_enabled);
    }

    #[test]
    fn unknown_com_id_is_a_noop() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();

        engine.enable_pd(9999, false);
        engine.set_pd_values(9999, &HashMap::new());
        assert_eq!(engine.get_snapshot().len(), 1);
    }

    #[test]
    fn scheduler_fires_tx_while_enabled() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();
        engine.start();

        std::thread::sleep(Duration::from_millis(60));
        engine.stop();

        let snapshot = engine.get_snapshot();
        // 5ms cycle over ~60ms should fire roughly 12 times; allow wide
        // slack for scheduling jitter in CI.
        assert!(snapshot[0].tx_count >= 5, "tx_count = {}", snapshot[0].tx_count);
    }

    #[test]
    fn disabled_telegram_never_fires() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();
        engine.enable_pd(1001, false);
        engine.start();

        std::thread::sleep(Duration::from_millis(30));
        engine.stop();

        assert_eq!(engine.get_snapshot()[0].tx_count, 0);
    }

    #[test]
    fn load_config_while_running_restarts_scheduler() {
        let engine = Engine::new(Arc::new(SimulatedTransport::new()));
        let f = write_xml(&sample_config_xml("A"));
        engine.load_config(f.path(), "A").unwrap();
        engine.start();
        std::thread::sleep(Duration::from_millis(10));

        engine.load_config(f.path(), "A").unwrap();
        // tx_count reset because PdRuntime table was rebuilt, but the
        // scheduler should still be running afterwards.
        std::thread::sleep(Duration::from_millis(20));
        let snapshot = engine.get_snapshot();
        engine.stop();
        assert!(snapshot[0].tx_count > 0);
    }
}
