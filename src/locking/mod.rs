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

pub mod acquisition;
pub mod arbitration;
pub mod cancellation;
pub mod controller;
pub mod handle;
pub mod metrics;
pub mod timeout;
pub mod wait_observer;

pub use acquisition::{LockRequest, LockTimeoutBudget};
pub use arbitration::{Predecessor, Ranking, parse_sequence, queue_order, rank};
pub use cancellation::{CancellationToken, signal_token};
pub use controller::LockController;
pub use handle::{LockHandle, LockPhase, LockSettings};
pub use metrics::{LockMetrics, MetricsSnapshot};
pub use timeout::{
    LockTimeoutResolution, LockTimeoutResolver, LockTimeoutSource, LockTimeoutValue,
    parse_timeout_override,
};
pub use wait_observer::{LockWaitObserver, NoopLockWaitObserver};
