//! Cooperative periodic scheduler driving PD telegram transmission.
//!
//! Unlike the fixed-cycle PLC scan this scheduler descends from, each
//! telegram carries its own due time: one dedicated worker thread wakes
//! every millisecond, fires whichever source/source-sink telegrams are
//! due, and goes back to sleep. The 1 ms quantum is deliberately coarse,
//! see [`TICK_PERIOD`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};

use trdp_common::time::MonotonicClock;
use trdp_common::Direction;

use crate::engine::EngineInner;

/// Scheduler tick resolution. Telegrams with `cycle_us` below this are
/// subject to up to one quantum of jitter.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

/// Owns the engine's background scheduler thread.
///
/// `Scheduler::spawn` starts the thread; dropping the returned handle
/// also stops it (see the `Drop` impl), but `Engine::stop` calls
/// [`Scheduler::stop`] explicitly so it can join before proceeding.
pub struct Scheduler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the scheduler thread. `running` is shared with the caller
    /// so `Engine::stop` can flip it without reaching back into the
    /// thread.
    pub fn spawn(
        inner: Arc<Mutex<EngineInner>>,
        clock: MonotonicClock,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = std::thread::Builder::new()
            .name("trdp-pd-scheduler".into())
            .spawn({
                let running = Arc::clone(&running);
                move || scheduler_loop(&inner, &clock, &running)
            })
            .expect("failed to spawn scheduler thread");

        debug!("scheduler thread spawned");
        Scheduler {
            running,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and join the thread. Idempotent: calling
    /// this twice, or on a scheduler whose thread already exited, is a
    /// no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduler_loop(inner: &Arc<Mutex<EngineInner>>, clock: &MonotonicClock, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let now = clock.now();
        {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.fire_due_telegrams(now);
            inner.sweep_watchdog(now);
        }
        std::thread::sleep(TICK_PERIOD);
    }
    trace!("scheduler loop exiting");
}

impl EngineInner {
    /// Fire every enabled, non-sink telegram whose `next_tx_due` has
    /// passed, publish its current `tx_payload`, and advance
    /// `next_tx_due` by exactly one `cycle_us` - dropping, not catching
    /// up, any cycles missed since the last tick.
    fn fire_due_telegrams(&mut self, now: trdp_common::time::MicroInstant) {
        for i in 0..self.pd_runtimes.len() {
            let def = &self.config.telegrams[self.pd_runtimes[i].def_index];
            if def.direction == Direction::Sink || def.cycle_us == 0 {
                continue;
            }
            if !self.pd_runtimes[i].tx_enabled || now < self.pd_runtimes[i].next_tx_due {
                continue;
            }

            let interface_name = def.interface_name.clone();
            let com_id = def.com_id;
            let cycle_us = def.cycle_us;
            let payload = self.pd_runtimes[i].tx_payload.clone();

            let Some(iface) = self
                .interfaces
                .iter()
                .find(|r| self.config.interfaces[r.def_index].name == interface_name)
            else {
                warn!(com_id, interface_name, "no interface runtime for TX telegram");
                continue;
            };

            match self.transport.publish(iface.session, com_id, &payload) {
                Ok(()) => {
                    self.pd_runtimes[i].tx_count += 1;
                    self.pd_runtimes[i].next_tx_due = now.plus_us(cycle_us);
                    trace!(com_id, tx_count = self.pd_runtimes[i].tx_count, "PD published");
                }
                Err(e) => warn!(com_id, error = %e, "PD publish failed"),
            }
        }
    }

    /// Optional liveness sweep: for every RX-tracked telegram that has
    /// seen at least one RX, flag a timeout once
    /// `now - last_rx_time > 2 * cycle_us`. `timed_out`
    /// suppresses repeat increments until the next RX clears it - this
    /// assigns no fault semantics, it is a passive counter.
    fn sweep_watchdog(&mut self, now: trdp_common::time::MicroInstant) {
        for i in 0..self.pd_runtimes.len() {
            let def = &self.config.telegrams[self.pd_runtimes[i].def_index];
            if def.direction == Direction::Source || def.cycle_us == 0 {
                continue;
            }
            let rt = &mut self.pd_runtimes[i];
            if !rt.last_rx_valid {
                continue;
            }
            let overrun = now.since(rt.last_rx_time) > 2 * def.cycle_us;
            if overrun && !rt.timed_out {
                rt.timeout_count += 1;
                rt.timed_out = true;
                trace!(com_id = def.com_id, "PD liveness timeout");
            } else if !overrun {
                rt.timed_out = false;
            }
        }
    }
}
