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

//! Asynchronous device-to-host DMA event-transfer pipeline.
//!
//! A peripheral fills fixed-size DMA buffers and raises a completion
//! signal for each finished transfer. This crate owns the host side of
//! that contract:
//!
//! - [`EventPipeline`] — a bounded ring of transfer slots plus the
//!   background machinery that keeps exactly one transfer in flight.
//! - A non-blocking completion path ([`EventPipeline::completion_signal`],
//!   [`CompletionHandle`]) intended to be driven from interrupt glue.
//! - A watchdog that detects and repairs lost completion signals.
//! - [`Session`] — the single admitted consumer, with blocking and
//!   non-blocking reads that drain completed events in order.
//!
//! # Data flow
//!
//! ```text
//!  open()          schedule_next()          completion signal
//!    │                   │                         │
//!    v                   v                         v
//!  Session ──kick──> scheduler ──start DMA──> device fills slot
//!    ^                   ^                         │
//!    │                   │ ring not full           │ write cursor++
//!    │ read cursor++     │ (woken by read)         v
//!    └──── read() <──────┴──────────── ring publishes event
//!
//!  watchdog ── expiry ──> reschedule / synthesize completion / reset
//! ```
//!
//! The hardware stays behind the [`DeviceBus`] trait (register access
//! plus DMA buffer allocation and copy-out), so the pipeline runs
//! unchanged against a real register mapping or an in-memory mock.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = EventPipeline::new(bus, PipelineConfig::default())?;
//! let session = pipeline.open()?;
//! let mut buf = vec![0u8; 4096];
//! loop {
//!     match session.read(&mut buf, ReadMode::Blocking)? {
//!         0 => break, // end of stream
//!         n => process(&buf[..n]),
//!     }
//! }
//! ```

// The mock-bus test helpers live in the `evtpipe-testing` crate, which
// depends on this crate. Unit tests cannot link that crate without
// pulling in a second copy of `evtpipe` (dev-dependency cycle), so the
// helper source is compiled directly into the test build instead. The
// `extern crate self` alias lets its `use evtpipe::...` imports resolve
// to this compilation.
#[cfg(test)]
extern crate self as evtpipe;
#[cfg(test)]
#[path = "../../evtpipe_testing/src/lib.rs"]
mod testing;

pub mod bus;
pub mod config;
mod error;
mod metrics;
mod pipeline;
pub mod regs;
mod ring;
mod session;

pub use bus::{BusAddr, BusError, DeviceBus};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{CompletionHandle, EventPipeline};
pub use session::{ReadMode, Session};
