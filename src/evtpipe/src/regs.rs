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

//! Register map of the write-DMA transfer engine.
//!
//! Dword offsets into the device's register space, the control bits the
//! pipeline drives, and a small extension trait wrapping the initiator
//! operations (reset, start, done-poll, transferred-length readout).

use bitflags::bitflags;
use log::trace;

use crate::bus::{BusAddr, DeviceBus};

/// Device control/status register.
pub const REG_CONTROL: u32 = 0;
/// Write-DMA control/status register.
pub const REG_DMA_CONTROL: u32 = 1;
/// Write-DMA target bus address. The engine addresses 32 bits.
pub const REG_WR_DMA_ADDR: u32 = 2;
/// Completed write-DMA length, in halfwords.
pub const REG_WR_XFER_COUNT: u32 = 3;

bitflags! {
    /// Bits of [`REG_CONTROL`].
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceControl: u32 {
        /// Hold the transfer initiator in reset. Aborts any in-flight
        /// transfer and clears the done state. Clear to re-activate.
        const INITIATOR_RESET = 1 << 0;
    }
}

bitflags! {
    /// Bits of [`REG_DMA_CONTROL`].
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DmaControl: u32 {
        /// Start a device-to-host write DMA into the programmed target.
        const WRITE_START = 1 << 0;
        /// Set by the device when the write DMA has finished.
        const WRITE_DONE = 1 << 8;
    }
}

/// Initiator operations layered over raw register access.
///
/// These mirror what the device manual describes as single commands;
/// each is a short fixed register sequence with no waiting.
pub(crate) trait InitiatorExt: DeviceBus {
    /// Pulse the initiator reset: aborts any in-flight transfer and
    /// clears the in-progress/done state at the hardware level.
    fn initiator_reset(&self) {
        trace!("initiator reset");
        self.write_register(REG_CONTROL, DeviceControl::INITIATOR_RESET.bits());
        self.write_register(REG_CONTROL, DeviceControl::empty().bits());
    }

    /// Program the write-DMA target and tell the device to start.
    fn start_write_dma(&self, addr: BusAddr) {
        debug_assert!(addr.0 <= u64::from(u32::MAX), "engine addresses 32 bits");
        trace!("start write DMA into {addr}");
        self.write_register(REG_WR_DMA_ADDR, addr.0 as u32);
        self.write_register(REG_DMA_CONTROL, DmaControl::WRITE_START.bits());
    }

    /// Poll whether the current write DMA has finished.
    fn write_dma_done(&self) -> bool {
        let ctl = DmaControl::from_bits_retain(self.read_register(REG_DMA_CONTROL));
        ctl.contains(DmaControl::WRITE_DONE)
    }

    /// Actual number of bytes the device transferred, read from the
    /// halfword count status register.
    fn transfer_size(&self) -> usize {
        self.read_register(REG_WR_XFER_COUNT) as usize * 2
    }
}

impl<B: DeviceBus + ?Sized> InitiatorExt for B {}
