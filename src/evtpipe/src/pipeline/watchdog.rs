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

//! One-shot watchdog timer backing lost-completion recovery.
//!
//! A dedicated thread sleeps on a condvar until the armed deadline
//! passes, then invokes the expiry callback with the transfer sequence
//! number the deadline was armed for. Arming carries the sequence so
//! the pipeline can tell an expiry for the transfer it is still
//! waiting on apart from one that raced a disarm/re-arm for a newer
//! transfer.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::trace;
use tracing::{instrument, Span};

use crate::Result;

struct WatchdogState {
    deadline: Option<Instant>,
    seq: u64,
    shutdown: bool,
}

/// Shared handle between the watchdog thread and the pipeline.
pub(crate) struct WatchdogControl {
    state: Mutex<WatchdogState>,
    cv: Condvar,
}

impl WatchdogControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WatchdogState {
                deadline: None,
                seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Arm (or re-arm) the timer for the transfer identified by `seq`.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn arm(&self, timeout: Duration, seq: u64) -> Result<()> {
        let mut state = self.state.lock()?;
        state.deadline = Some(Instant::now() + timeout);
        state.seq = seq;
        drop(state);
        self.cv.notify_one();
        Ok(())
    }

    /// Cancel a pending expiry, if any. An expiry already past the
    /// deadline check may still be delivered; the sequence number at
    /// the callback is what makes that harmless.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn disarm(&self) -> Result<()> {
        self.state.lock()?.deadline = None;
        Ok(())
    }

    /// Tell the watchdog thread to exit. Called during teardown, so it
    /// tolerates a poisoned lock.
    pub(crate) fn shutdown(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.shutdown = true;
        state.deadline = None;
        drop(state);
        self.cv.notify_one();
    }

    /// Watchdog thread body. Runs until [`Self::shutdown`]; invokes
    /// `on_timeout` with the armed sequence number on every expiry.
    ///
    /// The lock is not held across the callback, so the callback may
    /// freely re-arm or disarm.
    pub(crate) fn run<F: Fn(u64)>(&self, on_timeout: F) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => {
                    state = self
                        .cv
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let seq = state.seq;
                        state.deadline = None;
                        drop(state);
                        trace!("watchdog expired for transfer #{seq}");
                        on_timeout(seq);
                        state = self
                            .state
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                    } else {
                        state = self
                            .cv
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn spawn(wd: &Arc<WatchdogControl>) -> (Arc<AtomicU64>, thread::JoinHandle<()>) {
        // Fired sequence numbers are stored off by one so zero can mean
        // "never fired".
        let fired = Arc::new(AtomicU64::new(0));
        let handle = {
            let wd = wd.clone();
            let fired = fired.clone();
            thread::spawn(move || {
                wd.run(|seq| {
                    fired.store(seq + 1, Ordering::SeqCst);
                })
            })
        };
        (fired, handle)
    }

    #[test]
    fn fires_after_timeout_with_armed_seq() {
        let wd = Arc::new(WatchdogControl::new());
        let (fired, handle) = spawn(&wd);

        wd.arm(Duration::from_millis(10), 7).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "watchdog never fired");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 8);

        wd.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn disarm_prevents_expiry() {
        let wd = Arc::new(WatchdogControl::new());
        let (fired, handle) = spawn(&wd);

        wd.arm(Duration::from_millis(50), 1).unwrap();
        wd.disarm().unwrap();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        wd.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn rearm_replaces_pending_deadline() {
        let wd = Arc::new(WatchdogControl::new());
        let (fired, handle) = spawn(&wd);

        wd.arm(Duration::from_secs(60), 1).unwrap();
        wd.arm(Duration::from_millis(10), 2).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "watchdog never fired");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        wd.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_exits_idle_thread() {
        let wd = Arc::new(WatchdogControl::new());
        let (_fired, handle) = spawn(&wd);
        wd.shutdown();
        handle.join().unwrap();
    }
}
