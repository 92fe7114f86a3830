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

//! Observer interfaces for lock acquisition instrumentation.
//!
//! Observers keep metrics and user feedback out of the acquisition loop.
//! Nothing an observer records is ever read back by the protocol.

use crate::coordination::WatchEvent;
use crate::error::FairlockError;
use crate::locking::timeout::LockTimeoutValue;
use std::time::Duration;

/// Hooks invoked by [`LockHandle`](crate::locking::LockHandle) as an
/// acquisition progresses. Every method defaults to doing nothing.
pub trait LockWaitObserver: Send + Sync {
    fn on_attempt_start(&self, _root: &str, _correlation: &str) {}

    fn on_node_created(&self, _root: &str, _node: &str, _sequence: u64) {}

    fn on_wait_start(&self, _root: &str, _predecessor: &str, _timeout: LockTimeoutValue) {}

    fn on_wakeup(&self, _root: &str, _event: &WatchEvent) {}

    fn on_acquired(&self, _root: &str, _waited: Duration) {}

    fn on_timeout(&self, _root: &str, _waited: Duration) {}

    fn on_cancelled(&self, _root: &str, _waited: Duration) {}

    /// Called for every failed attempt, including timeouts and cancellations.
    fn on_failed(&self, _root: &str, _error: &FairlockError) {}

    fn on_attempt_end(&self, _root: &str) {}

    fn on_released(&self, _root: &str, _held: Duration) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockWaitObserver;

impl LockWaitObserver for NoopLockWaitObserver {}

/// Pairs `on_attempt_start` with `on_attempt_end` on every exit path.
pub(crate) struct AttemptScope<'a> {
    observer: Option<&'a dyn LockWaitObserver>,
    root: &'a str,
}

impl<'a> AttemptScope<'a> {
    pub(crate) fn enter(
        observer: Option<&'a dyn LockWaitObserver>,
        root: &'a str,
        correlation: &str,
    ) -> Self {
        if let Some(observer) = observer {
            observer.on_attempt_start(root, correlation);
        }
        Self { observer, root }
    }
}

impl Drop for AttemptScope<'_> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.on_attempt_end(self.root);
        }
    }
}
