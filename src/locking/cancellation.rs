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

use log::{debug, warn};
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(windows)]
use signal_hook::consts::signal::SIGBREAK;

/// Lets a caller abandon a pending acquisition.
///
/// Clones share one flag. The waiting side only reads it between watch
/// slices, so cancelling never interrupts a service call half-way.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            debug!("Lock acquisition cancellation requested");
        }
    }

    /// True when both tokens observe the same flag.
    pub fn shares_flag_with(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

#[derive(Debug)]
struct SignalRegistry {
    token: CancellationToken,
    _handles: Vec<SigId>,
}

impl SignalRegistry {
    fn install() -> Self {
        let token = CancellationToken::new();
        let handles = termination_signals()
            .iter()
            .filter_map(|signal| match flag::register(*signal, Arc::clone(&token.flag)) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("Could not watch signal {signal} for lock cancellation: {err}");
                    None
                }
            })
            .collect();

        Self {
            token,
            _handles: handles,
        }
    }
}

fn termination_signals() -> &'static [i32] {
    #[cfg(windows)]
    {
        static SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGBREAK];
        &SIGNALS
    }

    #[cfg(not(windows))]
    {
        static SIGNALS: [i32; 2] = [SIGINT, SIGTERM];
        &SIGNALS
    }
}

static SIGNAL_REGISTRY: OnceLock<SignalRegistry> = OnceLock::new();

/// Token that flips when the process receives SIGINT or SIGTERM.
pub fn signal_token() -> CancellationToken {
    SIGNAL_REGISTRY
        .get_or_init(SignalRegistry::install)
        .token
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(token.shares_flag_with(&clone));
    }

    #[test]
    fn fresh_tokens_are_independent() {
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        first.cancel();
        assert!(!second.is_cancelled());
        assert!(!first.shares_flag_with(&second));
    }

    #[test]
    fn signal_token_is_process_wide() {
        assert!(signal_token().shares_flag_with(&signal_token()));
    }
}
