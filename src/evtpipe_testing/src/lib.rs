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

//! Test support for the pipeline crates: an in-memory device bus that
//! behaves like the write-DMA transfer engine, plus small helpers for
//! waiting on background threads. This crate is for tests only and
//! freely panics on misuse.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;

use evtpipe::regs::{
    DeviceControl, DmaControl, REG_CONTROL, REG_DMA_CONTROL, REG_WR_DMA_ADDR, REG_WR_XFER_COUNT,
};
use evtpipe::{BusAddr, BusError, DeviceBus};

#[derive(Default)]
struct MockState {
    regs: [u32; 16],
    /// Backing store for every DMA allocation, bump-allocated;
    /// a [`BusAddr`] is an offset into this vector.
    mem: Vec<u8>,
    /// Target of the currently started (unfinished) write DMA.
    pending: Option<BusAddr>,
    starts: usize,
    resets: usize,
}

/// An in-memory [`DeviceBus`] mimicking the transfer engine's register
/// protocol.
///
/// A write DMA is "started" by the usual register sequence; the test
/// then plays the device by calling [`complete_transfer`] to fill the
/// target buffer and set the done bit. Raising the completion signal
/// is left to the test, so lost-signal scenarios are expressible.
///
/// [`complete_transfer`]: Self::complete_transfer
#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    /// Create an empty mock device.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Number of write DMAs started so far.
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Number of initiator resets so far.
    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    /// Target address of the in-flight write DMA, if one was started
    /// and not yet completed or reset away.
    pub fn pending_target(&self) -> Option<BusAddr> {
        self.lock().pending
    }

    /// Finish the in-flight write DMA: copy `payload` into its target
    /// buffer, publish the halfword count, and set the done bit.
    ///
    /// Does NOT deliver a completion signal; the test decides whether
    /// (and when) the pipeline hears about it.
    ///
    /// # Panics
    ///
    /// If no write DMA is in flight, or `payload` has odd length
    /// (the engine transfers halfwords).
    pub fn complete_transfer(&self, payload: &[u8]) {
        assert!(
            self.try_complete_transfer(payload),
            "no write DMA in flight"
        );
    }

    /// Like [`complete_transfer`](Self::complete_transfer), but returns
    /// `false` instead of panicking when no write DMA is in flight.
    /// Useful when a watchdog reset may be racing the completion.
    pub fn try_complete_transfer(&self, payload: &[u8]) -> bool {
        assert!(
            payload.len() % 2 == 0,
            "transfer payloads are halfword-sized"
        );
        let mut state = self.lock();
        let Some(addr) = state.pending.take() else {
            return false;
        };
        let start = addr.0 as usize;
        state.mem[start..start + payload.len()].copy_from_slice(payload);
        state.regs[REG_WR_XFER_COUNT as usize] = (payload.len() / 2) as u32;
        state.regs[REG_DMA_CONTROL as usize] |= DmaControl::WRITE_DONE.bits();
        trace!("mock transfer of {} bytes into {addr} done", payload.len());
        true
    }
}

impl DeviceBus for MockBus {
    fn read_register(&self, offset: u32) -> u32 {
        self.lock().regs[offset as usize]
    }

    fn write_register(&self, offset: u32, value: u32) {
        let mut state = self.lock();
        match offset {
            REG_CONTROL if value & DeviceControl::INITIATOR_RESET.bits() != 0 => {
                state.resets += 1;
                state.pending = None;
                state.regs[REG_DMA_CONTROL as usize] &= !DmaControl::WRITE_DONE.bits();
                state.regs[offset as usize] = value;
            }
            REG_DMA_CONTROL if value & DmaControl::WRITE_START.bits() != 0 => {
                state.starts += 1;
                state.pending = Some(BusAddr(u64::from(state.regs[REG_WR_DMA_ADDR as usize])));
                // Starting clears the previous transfer's done state.
                state.regs[offset as usize] = value & !DmaControl::WRITE_DONE.bits();
            }
            _ => state.regs[offset as usize] = value,
        }
    }

    fn alloc_dma(&self, len: usize) -> Result<BusAddr, BusError> {
        let mut state = self.lock();
        let addr = BusAddr(state.mem.len() as u64);
        let new_len = state.mem.len() + len;
        state.mem.resize(new_len, 0);
        Ok(addr)
    }

    fn read_dma(&self, addr: BusAddr, offset: usize, dst: &mut [u8]) -> Result<(), BusError> {
        let state = self.lock();
        let start = addr.0 as usize + offset;
        let src = state
            .mem
            .get(start..start + dst.len())
            .ok_or(BusError::InvalidAccess {
                addr,
                offset,
                len: dst.len(),
            })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Poll `predicate` until it holds or `timeout` elapses; returns
/// whether it held.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_complete_round_trips_payload() {
        let bus = MockBus::new();
        let addr = bus.alloc_dma(8).unwrap();
        bus.write_register(REG_WR_DMA_ADDR, addr.0 as u32);
        bus.write_register(REG_DMA_CONTROL, DmaControl::WRITE_START.bits());
        assert_eq!(bus.starts(), 1);
        assert_eq!(bus.pending_target(), Some(addr));

        bus.complete_transfer(&[1, 2, 3, 4]);
        assert_eq!(bus.read_register(REG_WR_XFER_COUNT), 2);
        assert!(bus.read_register(REG_DMA_CONTROL) & DmaControl::WRITE_DONE.bits() != 0);

        let mut out = [0u8; 4];
        bus.read_dma(addr, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn reset_clears_pending_and_done() {
        let bus = MockBus::new();
        let addr = bus.alloc_dma(4).unwrap();
        bus.write_register(REG_WR_DMA_ADDR, addr.0 as u32);
        bus.write_register(REG_DMA_CONTROL, DmaControl::WRITE_START.bits());
        bus.complete_transfer(&[5, 6]);

        bus.write_register(REG_CONTROL, DeviceControl::INITIATOR_RESET.bits());
        assert_eq!(bus.resets(), 1);
        assert_eq!(bus.pending_target(), None);
        assert!(bus.read_register(REG_DMA_CONTROL) & DmaControl::WRITE_DONE.bits() == 0);
    }

    #[test]
    fn out_of_range_dma_read_fails() {
        let bus = MockBus::new();
        let addr = bus.alloc_dma(4).unwrap();
        let mut out = [0u8; 8];
        assert!(bus.read_dma(addr, 0, &mut out).is_err());
    }
}
