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

//! Pipeline configuration.

use std::time::Duration;

use tracing::{instrument, Span};

/// The complete set of configuration needed to create an
/// [`EventPipeline`](crate::EventPipeline).
///
/// Out-of-range values are clamped rather than rejected; the ring
/// capacity is additionally rounded up to a power of two so cursor
/// masking works.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PipelineConfig {
    slot_size: usize,
    ring_capacity: usize,
    watchdog_timeout: Duration,
    clear_abort_on_open: bool,
}

impl PipelineConfig {
    /// Default size of one transfer slot in bytes (500 KB events).
    pub const DEFAULT_SLOT_SIZE: usize = 512_000;
    /// Minimum slot size; the transfer engine counts halfwords.
    pub const MIN_SLOT_SIZE: usize = 2;

    /// Default number of slots in the event ring.
    pub const DEFAULT_RING_CAPACITY: usize = 32;
    /// Minimum ring capacity.
    pub const MIN_RING_CAPACITY: usize = 2;
    /// Maximum ring capacity.
    pub const MAX_RING_CAPACITY: usize = 1 << 16;

    /// Default watchdog timeout for a lost completion signal.
    pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(500);
    /// Minimum watchdog timeout.
    pub const MIN_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(1);

    /// Size of one transfer slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots in the event ring (always a power of two).
    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    /// How long a started transfer may run without a completion signal
    /// before the watchdog intervenes.
    pub fn watchdog_timeout(&self) -> Duration {
        self.watchdog_timeout
    }

    /// Whether a leftover read-abort flag is cleared automatically by
    /// `open` (default) or must be cleared by an explicit
    /// [`init`](crate::EventPipeline::init).
    pub fn clear_abort_on_open(&self) -> bool {
        self.clear_abort_on_open
    }

    /// Set the slot size, clamped to at least [`Self::MIN_SLOT_SIZE`].
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_slot_size(&mut self, size: usize) -> &mut Self {
        self.slot_size = size.max(Self::MIN_SLOT_SIZE);
        self
    }

    /// Set the ring capacity, rounded up to a power of two and clamped
    /// to [[`Self::MIN_RING_CAPACITY`], [`Self::MAX_RING_CAPACITY`]].
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_ring_capacity(&mut self, capacity: usize) -> &mut Self {
        self.ring_capacity = capacity
            .clamp(Self::MIN_RING_CAPACITY, Self::MAX_RING_CAPACITY)
            .next_power_of_two();
        self
    }

    /// Set the watchdog timeout, clamped to at least
    /// [`Self::MIN_WATCHDOG_TIMEOUT`].
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_watchdog_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.watchdog_timeout = timeout.max(Self::MIN_WATCHDOG_TIMEOUT);
        self
    }

    /// Choose whether `open` clears a leftover abort flag.
    pub fn set_clear_abort_on_open(&mut self, clear: bool) -> &mut Self {
        self.clear_abort_on_open = clear;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slot_size: Self::DEFAULT_SLOT_SIZE,
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
            watchdog_timeout: Self::DEFAULT_WATCHDOG_TIMEOUT,
            clear_abort_on_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.slot_size(), PipelineConfig::DEFAULT_SLOT_SIZE);
        assert_eq!(cfg.ring_capacity(), PipelineConfig::DEFAULT_RING_CAPACITY);
        assert_eq!(
            cfg.watchdog_timeout(),
            PipelineConfig::DEFAULT_WATCHDOG_TIMEOUT
        );
        assert!(cfg.clear_abort_on_open());
    }

    #[test]
    fn ring_capacity_rounds_to_power_of_two() {
        let mut cfg = PipelineConfig::default();
        cfg.set_ring_capacity(33);
        assert_eq!(cfg.ring_capacity(), 64);
        cfg.set_ring_capacity(64);
        assert_eq!(cfg.ring_capacity(), 64);
        cfg.set_ring_capacity(0);
        assert_eq!(cfg.ring_capacity(), PipelineConfig::MIN_RING_CAPACITY);
        cfg.set_ring_capacity(usize::MAX);
        assert_eq!(cfg.ring_capacity(), PipelineConfig::MAX_RING_CAPACITY);
    }

    #[test]
    fn slot_size_and_timeout_clamped() {
        let mut cfg = PipelineConfig::default();
        cfg.set_slot_size(0);
        assert_eq!(cfg.slot_size(), PipelineConfig::MIN_SLOT_SIZE);
        cfg.set_watchdog_timeout(Duration::ZERO);
        assert_eq!(
            cfg.watchdog_timeout(),
            PipelineConfig::MIN_WATCHDOG_TIMEOUT
        );
    }
}
