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

//! The external collaborator interface: register access and DMA memory.
//!
//! Device discovery, resource claiming, and the physical-to-bus mapping
//! of buffers all live behind [`DeviceBus`]. The pipeline only needs
//! four primitives: read a register, write a register, allocate a
//! DMA-visible buffer with a stable bus address, and copy bytes out of
//! such a buffer.

use core::fmt;
use std::sync::Arc;

use thiserror::Error;

/// An opaque bus-address handle for a DMA buffer.
///
/// Valid only for the buffer it was allocated for, and only while that
/// buffer is alive. The pipeline never interprets the value; it is
/// programmed into the device and handed back on copy-out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusAddr(pub u64);

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Errors from the bus/DMA access layer.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A DMA buffer could not be allocated.
    #[error("DMA buffer allocation of {0} bytes failed")]
    OutOfMemory(usize),

    /// A copy out of DMA memory referenced an invalid range.
    #[error("invalid DMA access at {addr} (+{offset}, {len} bytes)")]
    InvalidAccess {
        /// Base bus address of the attempted access.
        addr: BusAddr,
        /// Byte offset from `addr`.
        offset: usize,
        /// Length of the attempted access.
        len: usize,
    },
}

/// Host-side view of the device: memory-mapped registers plus
/// DMA-coherent buffer memory.
///
/// Register access is infallible, matching MMIO semantics; only
/// allocation and copy-out can fail. Implementations must be callable
/// from any thread — the scheduler worker, the watchdog, the
/// completion context, and readers all share one instance.
pub trait DeviceBus: Send + Sync + 'static {
    /// Read a device register at the given dword offset.
    fn read_register(&self, offset: u32) -> u32;

    /// Write a device register at the given dword offset.
    fn write_register(&self, offset: u32, value: u32);

    /// Allocate `len` bytes of DMA-coherent memory, returning its
    /// stable bus address. Buffers live until the device is torn down.
    fn alloc_dma(&self, len: usize) -> Result<BusAddr, BusError>;

    /// Copy `dst.len()` bytes out of the DMA buffer at `addr`,
    /// starting `offset` bytes in.
    fn read_dma(&self, addr: BusAddr, offset: usize, dst: &mut [u8]) -> Result<(), BusError>;
}

impl<B: DeviceBus> DeviceBus for Arc<B> {
    fn read_register(&self, offset: u32) -> u32 {
        (**self).read_register(offset)
    }

    fn write_register(&self, offset: u32, value: u32) {
        (**self).write_register(offset, value)
    }

    fn alloc_dma(&self, len: usize) -> Result<BusAddr, BusError> {
        (**self).alloc_dma(len)
    }

    fn read_dma(&self, addr: BusAddr, offset: usize, dst: &mut [u8]) -> Result<(), BusError> {
        (**self).read_dma(addr, offset, dst)
    }
}
