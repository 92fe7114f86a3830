// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::coordination::WatchEvent;
use crate::error::FairlockError;
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::LockWaitObserver;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-level counters fed through the observer hooks.
#[derive(Debug, Default)]
pub struct LockMetrics {
    in_flight: AtomicU64,
    attempts: AtomicU64,
    acquired: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    watch_waits: AtomicU64,
    wakeups: AtomicU64,
    released: AtomicU64,
    wait_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub in_flight: u64,
    pub attempts: u64,
    pub acquired: u64,
    /// All failed attempts, timeouts and cancellations included.
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub watch_waits: u64,
    pub wakeups: u64,
    pub released: u64,
    pub total_wait_ms: u64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisitions currently between start and finish.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            in_flight: self.in_flight.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            watch_waits: self.watch_waits.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            total_wait_ms: self.wait_micros.load(Ordering::Relaxed) / 1_000,
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl LockWaitObserver for LockMetrics {
    fn on_attempt_start(&self, _root: &str, _correlation: &str) {
        Self::bump(&self.attempts);
        Self::bump(&self.in_flight);
    }

    fn on_wait_start(&self, _root: &str, _predecessor: &str, _timeout: LockTimeoutValue) {
        Self::bump(&self.watch_waits);
    }

    fn on_wakeup(&self, _root: &str, _event: &WatchEvent) {
        Self::bump(&self.wakeups);
    }

    fn on_acquired(&self, _root: &str, waited: Duration) {
        Self::bump(&self.acquired);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn on_timeout(&self, _root: &str, _waited: Duration) {
        Self::bump(&self.timed_out);
    }

    fn on_cancelled(&self, _root: &str, _waited: Duration) {
        Self::bump(&self.cancelled);
    }

    fn on_failed(&self, _root: &str, _error: &FairlockError) {
        Self::bump(&self.failed);
    }

    fn on_attempt_end(&self, _root: &str) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn on_released(&self, _root: &str, _held: Duration) {
        Self::bump(&self.released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_gauge_tracks_open_attempts() {
        let metrics = LockMetrics::new();
        metrics.on_attempt_start("/locks/a", "one");
        metrics.on_attempt_start("/locks/a", "two");
        assert_eq!(metrics.in_flight(), 2);

        metrics.on_attempt_end("/locks/a");
        metrics.on_attempt_end("/locks/a");
        metrics.on_attempt_end("/locks/a");
        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.snapshot().attempts, 2);
    }

    #[test]
    fn snapshot_accumulates_wait_time() {
        let metrics = LockMetrics::new();
        metrics.on_acquired("/locks/a", Duration::from_millis(40));
        metrics.on_acquired("/locks/a", Duration::from_millis(2));
        metrics.on_released("/locks/a", Duration::from_millis(1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.acquired, 2);
        assert_eq!(snapshot.released, 1);
        assert_eq!(snapshot.total_wait_ms, 42);
    }

    #[test]
    fn snapshot_serializes_as_flat_object() {
        let json = serde_json::to_value(LockMetrics::new().snapshot()).unwrap();
        assert_eq!(json["in_flight"], 0);
        assert_eq!(json["total_wait_ms"], 0);
    }
}
