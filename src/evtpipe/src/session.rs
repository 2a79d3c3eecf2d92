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

//! Consumer sessions: the read side of the pipeline.
//!
//! At most one session exists at a time. A session hands out events in
//! completion order, one slot at a time, with partial-read resumption:
//! a buffer smaller than the event gets the event's next chunk, and
//! the slot is recycled only when its final byte has been delivered.

use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};

use log::{debug, trace};
use tracing::{instrument, Span};

use crate::error::PipelineError;
use crate::pipeline::EventPipeline;
use crate::{DeviceBus, Result};

/// Whether [`Session::read`] waits for an event or returns
/// immediately.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadMode {
    /// Wait until an event is available, the session is aborted, or
    /// the pipeline shuts down.
    Blocking,
    /// Return [`PipelineError::WouldBlock`] if no event is buffered.
    NonBlocking,
}

/// An exclusive consumer session on an [`EventPipeline`].
///
/// Obtained from [`EventPipeline::open`]; dropping it releases the
/// slot for the next consumer. `read` takes `&self` so that another
/// thread holding a reference can [`abort`](Self::abort) a blocked
/// read.
pub struct Session<'p, B: DeviceBus> {
    pipeline: &'p EventPipeline<B>,
    /// Byte offset into the event at the read cursor that has already
    /// been delivered. Also serializes concurrent `read` calls.
    pos: Mutex<usize>,
}

impl<B: DeviceBus> EventPipeline<B> {
    /// Open the single consumer session.
    ///
    /// Fails with [`PipelineError::DeviceBusy`] while another session
    /// is alive. Requests the first transfer, and (by default) clears
    /// any abort left behind by a previous session.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn open(&self) -> Result<Session<'_, B>> {
        if self.inner.session_active.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::DeviceBusy);
        }
        let armed = || -> Result<()> {
            if self.inner.clear_abort_on_open {
                self.inner.lock()?.read_abort = false;
            }
            self.inner.send_schedule()
        }();
        if let Err(e) = armed {
            self.inner.session_active.store(false, Ordering::Release);
            return Err(e);
        }
        debug!("consumer session opened");
        Ok(Session {
            pipeline: self,
            pos: Mutex::new(0),
        })
    }
}

impl<B: DeviceBus> Session<'_, B> {
    /// Read the next chunk of event data into `buf`.
    ///
    /// Returns the number of bytes delivered: the remainder of the
    /// event at the read cursor, capped at `buf.len()`. The event's
    /// slot is recycled once its final byte has been delivered, so a
    /// large event may take several calls.
    ///
    /// `Ok(0)` means end-of-stream (the session was aborted, or the
    /// event at the cursor has zero remaining bytes after a flush
    /// mid-event). A shutdown with the ring drained surfaces as
    /// [`PipelineError::Interrupted`] instead, and an empty ring in
    /// [`ReadMode::NonBlocking`] as [`PipelineError::WouldBlock`].
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn read(&self, buf: &mut [u8], mode: ReadMode) -> Result<usize> {
        let inner = &self.pipeline.inner;
        let mut pos = self.pos.lock()?;
        let mut state = inner.lock()?;

        while state.ring.is_empty() && !state.read_abort && !state.shutdown {
            if mode == ReadMode::NonBlocking {
                return Err(PipelineError::WouldBlock);
            }
            state = inner.not_empty.wait(state)?;
        }
        if state.read_abort {
            debug!("read aborted, signaling end of stream");
            return Ok(0);
        }
        if state.ring.is_empty() {
            // Shutdown with nothing left to drain.
            return Err(PipelineError::Interrupted);
        }

        let slot = state.ring.slot_at(state.ring.read_cursor());
        // A flush mid-event can leave the delivered offset past the
        // (new) event's length; saturate rather than underflow.
        let remaining = slot.len().saturating_sub(*pos);
        let nbytes = remaining.min(buf.len());
        if nbytes > 0 {
            // On a copy-out fault nothing advances; the caller may
            // retry the same chunk.
            inner.bus.read_dma(slot.addr(), *pos, &mut buf[..nbytes])?;
        }
        if nbytes == remaining {
            state.ring.advance_read();
            *pos = 0;
            drop(state);
            inner.not_full.notify_all();
            trace!("event drained ({nbytes} final bytes)");
        } else {
            *pos += nbytes;
            trace!("partial read: {nbytes} bytes, {} remain", remaining - nbytes);
        }
        Ok(nbytes)
    }

    /// Abort the session: any blocked `read` (and every later one)
    /// returns `Ok(0)`. Callable from any thread holding a reference.
    pub fn abort(&self) -> Result<()> {
        self.pipeline.inner.lock()?.read_abort = true;
        self.pipeline.inner.not_empty.notify_all();
        Ok(())
    }
}

impl<B: DeviceBus> Drop for Session<'_, B> {
    fn drop(&mut self) {
        let inner = &self.pipeline.inner;
        {
            let mut state = inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.read_abort = true;
        }
        inner.not_empty.notify_all();
        inner.session_active.store(false, Ordering::Release);
        debug!("consumer session closed");
    }
}
