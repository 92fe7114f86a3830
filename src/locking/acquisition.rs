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

use crate::coordination::{Watch, WatchOutcome};
use crate::locking::cancellation::CancellationToken;
use crate::locking::timeout::LockTimeoutValue;
use log::trace;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Tracks elapsed and remaining time for a lock timeout budget.
#[derive(Debug, Clone)]
pub struct LockTimeoutBudget {
    value: LockTimeoutValue,
    started_at: Instant,
}

impl LockTimeoutBudget {
    pub fn new(value: LockTimeoutValue) -> Self {
        Self {
            value,
            started_at: Instant::now(),
        }
    }

    pub fn value(&self) -> LockTimeoutValue {
        self.value
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self.value {
            LockTimeoutValue::Infinite => None,
            LockTimeoutValue::Finite(limit) => Some(limit.saturating_sub(self.elapsed())),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.value, LockTimeoutValue::Finite(limit) if self.elapsed() >= limit)
    }
}

/// Per-call options for [`LockHandle::acquire_with`](crate::locking::LockHandle::acquire_with).
#[derive(Debug, Clone)]
pub struct LockRequest {
    budget: LockTimeoutBudget,
    cancellation: CancellationToken,
    correlation: String,
}

impl LockRequest {
    /// Starts the timeout clock immediately.
    pub fn new(timeout: LockTimeoutValue) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            budget: LockTimeoutBudget::new(timeout),
            cancellation: CancellationToken::new(),
            correlation: id[..8].to_string(),
        }
    }

    /// Waits as long as it takes.
    pub fn blocking() -> Self {
        Self::new(LockTimeoutValue::Infinite)
    }

    /// Gives up at the first predecessor instead of waiting.
    pub fn immediate() -> Self {
        Self::new(LockTimeoutValue::Finite(Duration::ZERO))
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = correlation.into();
        self
    }

    pub fn budget(&self) -> &LockTimeoutBudget {
        &self.budget
    }

    pub fn timeout_value(&self) -> LockTimeoutValue {
        self.budget.value()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Short token that ties together the log lines of one acquisition.
    pub fn correlation(&self) -> &str {
        &self.correlation
    }

    pub fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }
}

impl Default for LockRequest {
    fn default() -> Self {
        Self::blocking()
    }
}

/// How a predecessor wait ended.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    Notified(WatchOutcome),
    Cancelled,
    TimedOut,
}

/// Blocks on `watch` until it fires, the request is cancelled, or its budget
/// runs out. Cancellation and the deadline are checked every `slice`; the
/// service is not contacted while waiting.
pub(crate) fn wait_for_notification(
    watch: &Watch,
    request: &LockRequest,
    slice: Duration,
) -> WaitOutcome {
    let slice = slice.max(Duration::from_millis(1));
    loop {
        if request.cancellation().is_cancelled() {
            return WaitOutcome::Cancelled;
        }

        let wait = match request.budget().remaining() {
            Some(remaining) if remaining.is_zero() => return WaitOutcome::TimedOut,
            Some(remaining) => remaining.min(slice),
            None => slice,
        };

        if let Some(outcome) = watch.wait_timeout(wait) {
            return WaitOutcome::Notified(outcome);
        }
        trace!(
            "[{}] still waiting on {} after {:.3}s",
            request.correlation(),
            watch.path(),
            request.elapsed().as_secs_f64()
        );
    }
}
