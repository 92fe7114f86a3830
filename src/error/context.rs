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

use crate::coordination::CoordinationError;
use crate::error::FairlockError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a FairlockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a FairlockError) -> Self {
        let (suggestion, details) = match error {
            FairlockError::NoSession { root } => {
                let suggestion = Some(
                    "Re-establish the coordination session and retry the acquisition.".to_string(),
                );
                let details = Some(format!(
                    "The client reported no session while acquiring {root}; nothing was created."
                ));
                (suggestion, details)
            }
            FairlockError::Deadlock { root } => {
                let suggestion = Some(
                    "Release the lock before acquiring it again, or use a separate handle per \
                     attempt. Locks are not reentrant."
                        .to_string(),
                );
                let details = Some(format!("The handle for {root} already owns a queue node."));
                (suggestion, details)
            }
            FairlockError::NotLocked { root } => {
                let suggestion =
                    Some("Only a handle that completed acquire() can release.".to_string());
                let details = Some(format!("No held node is recorded for {root}."));
                (suggestion, details)
            }
            FairlockError::MalformedSequence { node } => {
                let suggestion = Some(
                    "Make sure only lock nodes live under the lock root, and that the service \
                     assigns sequential suffixes."
                        .to_string(),
                );
                let details = Some(format!("Could not parse a sequence number from '{node}'."));
                (suggestion, details)
            }
            FairlockError::NodeVanished { node } => {
                let suggestion = Some(
                    "The session probably expired while queued. Reconnect and acquire again."
                        .to_string(),
                );
                let details = Some(format!("{node} was no longer listed under its lock root."));
                (suggestion, details)
            }
            FairlockError::InvalidPath(msg) => {
                let suggestion = Some(
                    "Lock roots are absolute paths such as '/locks/orders' without a trailing \
                     slash."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            FairlockError::Timeout { root, .. } => {
                let suggestion = Some(
                    "Increase the wait with --timeout or FAIRLOCK_LOCK_TIMEOUT, or use \
                     'infinite'."
                        .to_string(),
                );
                let details = Some(format!(
                    "The queued node for {root} was removed so later waiters are not blocked."
                ));
                (suggestion, details)
            }
            FairlockError::Cancelled { root, .. } => {
                let suggestion = None;
                let details = Some(format!(
                    "The queued node for {root} was removed after cancellation."
                ));
                (suggestion, details)
            }
            FairlockError::Coordination(CoordinationError::SessionExpired) => {
                let suggestion = Some(
                    "Open a new session. Every lock held by the expired session has already been \
                     released by the service."
                        .to_string(),
                );
                (suggestion, None)
            }
            FairlockError::Coordination(CoordinationError::ConnectionLoss) => {
                let suggestion = Some(
                    "Check connectivity to the coordination service and retry.".to_string(),
                );
                (suggestion, None)
            }
            FairlockError::ConfigError(msg) | FairlockError::InvalidConfig(msg) => {
                let suggestion = Some(
                    "Check the [locking] section of config.toml and any FAIRLOCK_LOCKING__* \
                     environment variables."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }
}

impl fmt::Display for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
