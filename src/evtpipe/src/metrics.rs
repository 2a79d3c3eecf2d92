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

//! Pipeline metrics, emitted through the `metrics` facade.
//!
//! Watchdog recoveries and scheduling conflicts are invisible to the
//! consumer by design; these counters (plus the log) are how operators
//! see them.

use metrics::counter;

/// Events published into the ring, by whether the watchdog had to
/// synthesize the completion.
const COMPLETIONS: &str = "evtpipe_completions_total";
/// Watchdog expiries, by classification.
const WATCHDOG_TIMEOUTS: &str = "evtpipe_watchdog_timeouts_total";
/// Schedule requests dropped because a transfer was already in flight.
const SCHEDULER_CONFLICTS: &str = "evtpipe_scheduler_conflicts_total";

pub(crate) fn record_completion(recovered: bool) {
    let recovered = if recovered { "true" } else { "false" };
    counter!(COMPLETIONS, "recovered" => recovered).increment(1);
}

pub(crate) fn record_watchdog_timeout(kind: &'static str) {
    counter!(WATCHDOG_TIMEOUTS, "kind" => kind).increment(1);
}

pub(crate) fn record_scheduler_conflict() {
    counter!(SCHEDULER_CONFLICTS).increment(1);
}
