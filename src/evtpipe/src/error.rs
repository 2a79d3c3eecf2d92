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

use std::sync::PoisonError;

use thiserror::Error;

use crate::bus::BusError;

/// The error type for all fallible pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A second `open` was attempted while a session was already active.
    #[error("device is busy with another session")]
    DeviceBusy,

    /// A non-blocking read found the event ring empty.
    #[error("no completed event available")]
    WouldBlock,

    /// A blocking read was cancelled by pipeline shutdown before an
    /// event arrived. Distinct from the `Ok(0)` end-of-stream result a
    /// session close produces.
    #[error("blocking read interrupted by pipeline shutdown")]
    Interrupted,

    /// Bus or DMA access failed while copying an event out to the
    /// caller.
    #[error("bus access failed: {0}")]
    Bus(#[from] BusError),

    /// Allocating the event ring's DMA buffers failed; the pipeline
    /// could not be constructed.
    #[error("event ring allocation failed: {0}")]
    RingAllocation(#[source] BusError),

    /// The scheduler worker is not running, so a transfer could not be
    /// handed off.
    #[error("scheduler worker is not running")]
    SchedulerUnavailable,

    /// Spawning a pipeline thread failed.
    #[error("failed to spawn pipeline thread: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding pipeline state was poisoned.
    #[error("a lock was poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<PoisonError<T>> for PipelineError {
    fn from(e: PoisonError<T>) -> Self {
        PipelineError::LockPoisoned(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, PipelineError>;
