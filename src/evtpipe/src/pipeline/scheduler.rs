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

//! The scheduler worker: starts the next transfer off the hot path.
//!
//! Completion and watchdog contexts never program the device directly;
//! they post [`Order::Schedule`] and this thread does the work, waiting
//! for ring space when it has to. That keeps the blocking wait out of
//! every signal-delivery context.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{trace, warn};
use tracing::{instrument, Span};

use crate::metrics::record_scheduler_conflict;
use crate::regs::InitiatorExt;
use crate::{DeviceBus, Result};

use super::{Order, PipelineInner};

/// Worker loop body for the `evtpipe-scheduler` thread.
pub(crate) fn run<B: DeviceBus>(inner: Arc<PipelineInner<B>>, orders: Receiver<Order>) {
    for order in orders.iter() {
        match order {
            Order::Schedule => {
                if let Err(e) = inner.schedule_next() {
                    warn!("transfer scheduling failed: {e}");
                }
            }
            Order::Exit => break,
        }
    }
    trace!("scheduler thread exiting");
}

impl<B: DeviceBus> PipelineInner<B> {
    /// Start the next write DMA into the slot at the write cursor.
    ///
    /// No-op while a transfer is already in flight; blocks while the
    /// ring is full. Arms the watchdog for the started transfer.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn schedule_next(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.transfer_in_progress {
            trace!("schedule request with transfer already in flight");
            record_scheduler_conflict();
            return Ok(());
        }
        while state.ring.is_full() && !state.shutdown {
            state = self.not_full.wait(state)?;
        }
        if state.shutdown {
            return Ok(());
        }
        // Re-check after the wait: a watchdog restart may have raced
        // this order through the channel.
        if state.transfer_in_progress {
            record_scheduler_conflict();
            return Ok(());
        }
        let addr = state.ring.slot_at(state.ring.write_cursor()).addr();
        self.bus.start_write_dma(addr);
        state.transfer_in_progress = true;
        state.xfer_seq = state.xfer_seq.wrapping_add(1);
        let seq = state.xfer_seq;
        drop(state);
        trace!("transfer #{seq} started into {addr}");
        self.watchdog.arm(self.watchdog_timeout, seq)
    }
}
