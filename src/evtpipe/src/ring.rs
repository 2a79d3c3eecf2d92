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

//! The event ring: a fixed set of DMA transfer slots indexed by
//! free-running cursors.
//!
//! Capacity is a power of two; the slot for a cursor value is
//! `cursor & (capacity - 1)`. Cursors are `u64` and only their
//! difference is ever compared, so wraparound is a non-issue within
//! any realistic device lifetime (2^64 events).
//!
//! The ring carries no lock of its own. The pipeline wraps it in one
//! mutex together with the transfer-in-progress flag, which is what
//! makes "slot contents and length happen-before the cursor advance
//! that publishes them" hold.

use log::debug;

use crate::bus::{BusAddr, BusError, DeviceBus};

/// One transfer slot: a fixed-capacity DMA buffer plus metadata.
///
/// The buffer itself is device-visible memory reached through the bus
/// address; `len` is meaningful only between a completion publishing
/// the slot and the consumer draining it.
pub(crate) struct Slot {
    addr: BusAddr,
    capacity: usize,
    len: usize,
}

impl Slot {
    /// Bus address the device writes this slot through.
    pub(crate) fn addr(&self) -> BusAddr {
        self.addr
    }

    /// Fixed buffer capacity in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Valid length of the event currently held, set on completion.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len;
    }
}

/// Fixed-capacity circular array of [`Slot`]s.
pub(crate) struct EventRing {
    slots: Box<[Slot]>,
    mask: u64,
    rd: u64,
    wr: u64,
}

impl EventRing {
    /// Allocate `capacity` slots of `slot_size` bytes each through the
    /// bus. All slots are allocated up front and live for the ring's
    /// entire lifetime; any allocation failure fails construction.
    pub(crate) fn new<B: DeviceBus>(
        bus: &B,
        capacity: usize,
        slot_size: usize,
    ) -> Result<Self, BusError> {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                addr: bus.alloc_dma(slot_size)?,
                capacity: slot_size,
                len: 0,
            });
        }
        debug!("event ring allocated: {capacity} slots x {slot_size} bytes");
        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
            rd: 0,
            wr: 0,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of completed, unconsumed events.
    pub(crate) fn entries(&self) -> usize {
        self.wr.wrapping_sub(self.rd) as usize
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.wr == self.rd
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries() == self.capacity()
    }

    pub(crate) fn read_cursor(&self) -> u64 {
        self.rd
    }

    pub(crate) fn write_cursor(&self) -> u64 {
        self.wr
    }

    /// Slot for a cursor value; the index is masked, never out of
    /// bounds.
    pub(crate) fn slot_at(&self, cursor: u64) -> &Slot {
        &self.slots[(cursor & self.mask) as usize]
    }

    pub(crate) fn slot_at_mut(&mut self, cursor: u64) -> &mut Slot {
        &mut self.slots[(cursor & self.mask) as usize]
    }

    /// Publish the slot at the write cursor. The caller pairs this
    /// with waking consumer waiters.
    pub(crate) fn advance_write(&mut self) {
        debug_assert!(!self.is_full());
        self.wr = self.wr.wrapping_add(1);
    }

    /// Consume the slot at the read cursor. The caller pairs this with
    /// waking scheduler waiters.
    pub(crate) fn advance_read(&mut self) {
        debug_assert!(!self.is_empty());
        self.rd = self.rd.wrapping_add(1);
    }

    /// Discard everything, including in-flight content: both cursors
    /// reset to zero. Callers must wake both waiter sets afterwards,
    /// since both the full and empty predicates may have changed.
    pub(crate) fn flush(&mut self) {
        self.rd = 0;
        self.wr = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Minimal bus: a bump allocator and no register space.
    #[derive(Default)]
    struct TestBus {
        next: AtomicU64,
    }

    impl DeviceBus for TestBus {
        fn read_register(&self, _offset: u32) -> u32 {
            0
        }

        fn write_register(&self, _offset: u32, _value: u32) {}

        fn alloc_dma(&self, len: usize) -> Result<BusAddr, BusError> {
            Ok(BusAddr(self.next.fetch_add(len as u64, Ordering::Relaxed)))
        }

        fn read_dma(&self, _addr: BusAddr, _offset: usize, _dst: &mut [u8]) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn ring(capacity: usize) -> EventRing {
        EventRing::new(&TestBus::default(), capacity, 64).unwrap()
    }

    #[test]
    fn starts_empty() {
        let r = ring(8);
        assert!(r.is_empty());
        assert!(!r.is_full());
        assert_eq!(r.entries(), 0);
        assert_eq!(r.capacity(), 8);
    }

    #[test]
    fn slots_have_distinct_addresses() {
        let r = ring(8);
        for i in 0..8 {
            for j in (i + 1)..8 {
                assert_ne!(r.slot_at(i as u64).addr(), r.slot_at(j as u64).addr());
            }
        }
    }

    #[test]
    fn cursor_index_is_masked() {
        let r = ring(4);
        assert_eq!(r.slot_at(1).addr(), r.slot_at(5).addr());
        assert_eq!(r.slot_at(3).addr(), r.slot_at(7).addr());
        assert_ne!(r.slot_at(0).addr(), r.slot_at(1).addr());
    }

    #[test]
    fn fill_drain_invariant_holds_after_every_operation() {
        let mut r = ring(4);
        // Two full fill/drain rounds so the cursors pass the capacity
        // boundary.
        for _ in 0..2 {
            for n in 1..=4 {
                r.advance_write();
                assert_eq!(r.entries(), n);
                assert!(r.entries() <= r.capacity());
            }
            assert!(r.is_full());
            for n in (0..4).rev() {
                r.advance_read();
                assert_eq!(r.entries(), n);
            }
            assert!(r.is_empty());
        }
    }

    #[test]
    fn interleaved_producer_consumer() {
        let mut r = ring(4);
        r.advance_write();
        r.advance_write();
        r.advance_read();
        assert_eq!(r.entries(), 1);
        r.advance_write();
        r.advance_write();
        r.advance_write();
        assert!(r.is_full());
        assert_eq!(r.entries(), 4);
    }

    #[test]
    fn flush_always_reports_empty() {
        let mut r = ring(4);
        assert!(r.is_empty());
        r.flush();
        assert!(r.is_empty());

        r.advance_write();
        r.advance_write();
        r.advance_write();
        r.flush();
        assert!(r.is_empty());
        assert_eq!(r.entries(), 0);
        assert_eq!(r.read_cursor(), 0);
        assert_eq!(r.write_cursor(), 0);
    }

    #[test]
    fn slot_length_set_on_publish() {
        let mut r = ring(4);
        let wr = r.write_cursor();
        r.slot_at_mut(wr).set_len(37);
        r.advance_write();
        assert_eq!(r.slot_at(r.read_cursor()).len(), 37);
    }
}
