/*
Copyright 2026  The Evtpipe Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
 */

//! The transfer pipeline: ring state, scheduler hand-off, completion
//! path, and watchdog recovery.
//!
//! All mutable state sits in one mutex ([`PipeState`]) with two
//! condvars beside it: `not_empty` wakes consumers after a completion
//! publishes a slot, `not_full` wakes the scheduler after a consumer
//! frees one. Every transition of the ring cursors or the
//! transfer-in-progress flag happens under that single lock, which is
//! the entire memory-ordering story.

pub(crate) mod scheduler;
pub(crate) mod watchdog;

use std::sync::atomic::AtomicBool;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, trace, warn};
use tracing::{instrument, Span};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::metrics::{record_completion, record_watchdog_timeout};
use crate::regs::InitiatorExt;
use crate::ring::EventRing;
use crate::{DeviceBus, Result};

use watchdog::WatchdogControl;

/// Work orders for the scheduler thread.
pub(crate) enum Order {
    /// Try to start the next transfer.
    Schedule,
    /// Exit the worker loop.
    Exit,
}

/// Everything guarded by the pipeline lock.
pub(crate) struct PipeState {
    pub(crate) ring: EventRing,
    /// A write DMA has been started and its completion not yet
    /// consumed. At most one transfer is in flight.
    pub(crate) transfer_in_progress: bool,
    /// Monotonic id of the most recently started transfer. Lets the
    /// watchdog recognize an expiry that raced a completion and
    /// restart.
    pub(crate) xfer_seq: u64,
    pub(crate) shutdown: bool,
    pub(crate) read_abort: bool,
}

/// State shared by the pipeline handle, the scheduler thread, the
/// watchdog thread, and completion handles.
pub(crate) struct PipelineInner<B: DeviceBus> {
    pub(crate) bus: B,
    pub(crate) state: Mutex<PipeState>,
    pub(crate) not_empty: Condvar,
    pub(crate) not_full: Condvar,
    pub(crate) orders: Sender<Order>,
    pub(crate) watchdog: WatchdogControl,
    pub(crate) watchdog_timeout: Duration,
    pub(crate) session_active: AtomicBool,
    pub(crate) clear_abort_on_open: bool,
}

impl<B: DeviceBus> PipelineInner<B> {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, PipeState>> {
        Ok(self.state.lock()?)
    }

    /// Publish the in-flight transfer as a completed event.
    ///
    /// Reads the transferred length from the device, stamps the slot
    /// at the write cursor, and advances the cursor. The caller holds
    /// the lock and is responsible for waking `not_empty` afterwards.
    fn publish_completion(&self, state: &mut PipeState, recovered: bool) {
        state.transfer_in_progress = false;
        if state.shutdown {
            return;
        }
        let mut len = self.bus.transfer_size();
        let wr = state.ring.write_cursor();
        let slot = state.ring.slot_at_mut(wr);
        if len > slot.capacity() {
            warn!(
                "device reported {len} transferred bytes, beyond the {} byte slot; clamping",
                slot.capacity()
            );
            len = slot.capacity();
        }
        slot.set_len(len);
        state.ring.advance_write();
        record_completion(recovered);
        trace!(
            "completion: {len} bytes into slot #{wr}, {} pending",
            state.ring.entries()
        );
    }

    /// Completion-signal entry point.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn complete(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.watchdog.disarm()?;
        if !state.transfer_in_progress {
            // A signal with nothing in flight: a glitch, or the
            // watchdog already recovered this completion.
            debug!("completion signal with no transfer in progress, ignoring");
            return Ok(());
        }
        self.publish_completion(&mut state, false);
        let shutdown = state.shutdown;
        drop(state);
        self.not_empty.notify_all();
        if !shutdown {
            self.send_schedule()?;
        }
        Ok(())
    }

    pub(crate) fn send_schedule(&self) -> Result<()> {
        self.orders
            .send(Order::Schedule)
            .map_err(|_| PipelineError::SchedulerUnavailable)
    }

    /// Watchdog expiry for transfer `seq`: classify and recover.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn handle_watchdog_timeout(&self, seq: u64) -> Result<()> {
        let mut state = self.lock()?;
        if state.shutdown {
            return Ok(());
        }
        if state.xfer_seq != seq {
            // The expiry raced a completion and restart; the deadline
            // it fired for no longer exists.
            trace!(
                "stale watchdog expiry for transfer #{seq} (current #{})",
                state.xfer_seq
            );
            return Ok(());
        }
        if !state.transfer_in_progress {
            // Armed but never started, or the start order was lost.
            warn!("watchdog: transfer #{seq} never started, rescheduling");
            record_watchdog_timeout("not-started");
            drop(state);
            return self.send_schedule();
        }
        if self.bus.write_dma_done() {
            // The transfer finished but the completion signal was
            // lost. Recover it as if the signal had arrived.
            warn!("watchdog: completion signal for transfer #{seq} lost, recovering");
            record_watchdog_timeout("signal-lost");
            self.publish_completion(&mut state, true);
            drop(state);
            self.not_empty.notify_all();
            return self.send_schedule();
        }
        // Genuinely wedged: the engine never finished. Reset it and
        // start over with the same slot.
        warn!("watchdog: transfer #{seq} wedged, resetting initiator");
        record_watchdog_timeout("wedged");
        self.bus.initiator_reset();
        state.transfer_in_progress = false;
        drop(state);
        self.send_schedule()
    }

    /// Discard all buffered events and any in-flight content.
    pub(crate) fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.ring.flush();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        debug!("ring flushed");
        Ok(())
    }

    /// Full reinitialization: reset the engine, drop all state, and
    /// restart scheduling from slot zero.
    pub(crate) fn init(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.watchdog.disarm()?;
        self.bus.initiator_reset();
        state.transfer_in_progress = false;
        state.read_abort = false;
        state.ring.flush();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        debug!("pipeline reinitialized");
        self.send_schedule()
    }
}

/// A hardware-to-host event transfer pipeline over a [`DeviceBus`].
///
/// Construction allocates the ring, resets the transfer engine, and
/// starts the scheduler and watchdog threads; the first transfer is
/// requested when a [`Session`](crate::Session) opens. Dropping the
/// pipeline stops both threads.
pub struct EventPipeline<B: DeviceBus> {
    pub(crate) inner: std::sync::Arc<PipelineInner<B>>,
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl<B: DeviceBus> EventPipeline<B> {
    /// Create a pipeline over `bus` with the given configuration.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(bus: B, config: PipelineConfig) -> Result<Self> {
        let ring = EventRing::new(&bus, config.ring_capacity(), config.slot_size())
            .map_err(PipelineError::RingAllocation)?;
        bus.initiator_reset();

        let (orders, order_rx) = crossbeam_channel::unbounded();
        let inner = std::sync::Arc::new(PipelineInner {
            bus,
            state: Mutex::new(PipeState {
                ring,
                transfer_in_progress: false,
                xfer_seq: 0,
                shutdown: false,
                read_abort: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            orders,
            watchdog: WatchdogControl::new(),
            watchdog_timeout: config.watchdog_timeout(),
            session_active: AtomicBool::new(false),
            clear_abort_on_open: config.clear_abort_on_open(),
        });

        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("evtpipe-scheduler".to_string())
                .spawn(move || scheduler::run(inner, order_rx))?
        };
        let timer = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("evtpipe-watchdog".to_string())
                .spawn(move || {
                    let cb = inner.clone();
                    inner.watchdog.run(move |seq| {
                        if let Err(e) = cb.handle_watchdog_timeout(seq) {
                            warn!("watchdog recovery failed: {e}");
                        }
                    })
                })
        };
        let timer = match timer {
            Ok(t) => t,
            Err(e) => {
                // Unwind the scheduler thread before propagating.
                let _ = inner.orders.send(Order::Exit);
                return Err(e.into());
            }
        };

        Ok(Self {
            inner,
            worker: Some(worker),
            timer: Some(timer),
        })
    }

    /// Deliver a completion signal from the device.
    ///
    /// Publishes the in-flight transfer, wakes blocked readers, and
    /// requests the next transfer. Signals with nothing in flight are
    /// ignored.
    pub fn completion_signal(&self) -> Result<()> {
        self.inner.complete()
    }

    /// A cloneable handle for delivering completion signals from the
    /// interrupt-dispatch context.
    pub fn completion_handle(&self) -> CompletionHandle<B> {
        CompletionHandle {
            inner: self.inner.clone(),
        }
    }

    /// Discard all buffered events and any partially consumed one.
    ///
    /// An in-flight transfer is left to complete; its slot is simply
    /// reused. Blocked readers re-check and keep waiting.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Reset the transfer engine and all pipeline state, then restart
    /// scheduling from an empty ring. Also clears a pending read
    /// abort.
    pub fn init(&self) -> Result<()> {
        self.inner.init()
    }

    /// Number of completed events waiting to be consumed.
    pub fn pending_events(&self) -> Result<usize> {
        Ok(self.inner.lock()?.ring.entries())
    }

    /// Begin shutdown without waiting: blocked readers return
    /// [`PipelineError::Interrupted`] once the ring is drained, and no
    /// further transfers are scheduled. `Drop` completes the teardown.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.lock()?.shutdown = true;
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        Ok(())
    }

    fn teardown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
        }
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        // The channel outlives us via inner, so Exit is what actually
        // stops the worker.
        let _ = self.inner.orders.send(Order::Exit);
        self.inner.watchdog.shutdown();
        if worker.join().is_err() {
            warn!("scheduler thread panicked");
        }
        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                warn!("watchdog thread panicked");
            }
        }
    }
}

impl<B: DeviceBus> Drop for EventPipeline<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Clonable, `Send` entry point for completion signals.
///
/// The interrupt-dispatch side holds one of these; it stays valid for
/// the pipeline's whole lifetime. Signals delivered during teardown
/// are ignored.
pub struct CompletionHandle<B: DeviceBus> {
    inner: std::sync::Arc<PipelineInner<B>>,
}

impl<B: DeviceBus> Clone for CompletionHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: DeviceBus> CompletionHandle<B> {
    /// Deliver a completion signal from the device.
    pub fn signal(&self) -> Result<()> {
        self.inner.complete()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::testing::{wait_until, MockBus};

    use super::*;

    fn config(capacity: usize, watchdog: Duration) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.set_slot_size(256)
            .set_ring_capacity(capacity)
            .set_watchdog_timeout(watchdog);
        cfg
    }

    #[test]
    fn new_resets_engine_and_starts_nothing() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();
        assert_eq!(bus.resets(), 1);
        assert_eq!(bus.starts(), 0);
        assert_eq!(pipe.pending_events().unwrap(), 0);
    }

    #[test]
    fn schedule_order_is_idempotent_while_in_flight() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();

        pipe.inner.send_schedule().unwrap();
        assert!(wait_until(Duration::from_secs(5), || bus.starts() == 1));

        // A second order while the transfer is still in flight is
        // dropped, not queued behind it.
        pipe.inner.send_schedule().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bus.starts(), 1);
    }

    #[test]
    fn completion_with_nothing_in_flight_is_ignored() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();
        pipe.completion_signal().unwrap();
        assert_eq!(pipe.pending_events().unwrap(), 0);
        assert_eq!(bus.starts(), 0);
    }

    #[test]
    fn watchdog_expiry_without_start_schedules_exactly_once() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();

        let seq = pipe.inner.lock().unwrap().xfer_seq;
        pipe.inner.handle_watchdog_timeout(seq).unwrap();
        assert!(wait_until(Duration::from_secs(5), || bus.starts() == 1));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bus.starts(), 1);
    }

    #[test]
    fn stale_watchdog_expiry_is_ignored() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();

        pipe.inner.send_schedule().unwrap();
        assert!(wait_until(Duration::from_secs(5), || bus.starts() == 1));
        let seq = pipe.inner.lock().unwrap().xfer_seq;

        // An expiry carrying a sequence the pipeline has moved past
        // must not touch the engine or the ring.
        pipe.inner.handle_watchdog_timeout(seq.wrapping_sub(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bus.starts(), 1);
        assert_eq!(bus.resets(), 1);
        assert_eq!(pipe.pending_events().unwrap(), 0);
    }

    #[test]
    fn oversized_transfer_report_is_clamped() {
        let bus = Arc::new(MockBus::new());
        let pipe = EventPipeline::new(bus.clone(), config(4, Duration::from_secs(60))).unwrap();

        pipe.inner.send_schedule().unwrap();
        assert!(wait_until(Duration::from_secs(5), || bus.starts() == 1));
        bus.complete_transfer(&[0xau8; 256]);
        // Inflate the halfword count beyond the slot capacity.
        bus.write_register(crate::regs::REG_WR_XFER_COUNT, 4096);
        pipe.completion_signal().unwrap();

        let state = pipe.inner.lock().unwrap();
        let rd = state.ring.read_cursor();
        assert_eq!(state.ring.slot_at(rd).len(), 256);
    }
}
