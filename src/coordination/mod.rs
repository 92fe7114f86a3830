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

//! Contract consumed from the hierarchical coordination service.
//!
//! The lock only needs a handful of primitives: ephemeral sequential creation,
//! plain creation for ancestor recovery, child listing, watched reads, and
//! deletion. Session management and watch delivery belong to the service.

pub mod memory;
pub mod path;

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;
use thiserror::Error;

/// Connection status reported by a coordination client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    HasSession,
    Expired,
    Closed,
}

impl ConnectionState {
    pub fn has_session(self) -> bool {
        matches!(self, ConnectionState::HasSession)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::HasSession => "has session",
            ConnectionState::Expired => "expired",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node {path} does not exist")]
    NoNode { path: String },

    #[error("node {path} already exists")]
    NodeExists { path: String },

    #[error("node {path} still has children")]
    NotEmpty { path: String },

    #[error("version mismatch on node {path}")]
    BadVersion { path: String },

    #[error("ephemeral node {path} cannot have children")]
    NoChildrenForEphemerals { path: String },

    #[error("connection to the coordination service was lost")]
    ConnectionLoss,

    #[error("coordination session has expired")]
    SessionExpired,

    #[error("coordination connection is closed")]
    ConnectionClosed,

    #[error("{0}")]
    Other(String),
}

impl CoordinationError {
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordinationError::NoNode { .. })
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordinationError::NodeExists { .. })
    }
}

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Permission bits carried by an access rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions(u32);

impl Permissions {
    pub const READ: Permissions = Permissions(1);
    pub const WRITE: Permissions = Permissions(1 << 1);
    pub const CREATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const ADMIN: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0b1_1111);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessRule {
    pub permissions: Permissions,
    pub scheme: String,
    pub id: String,
}

impl AccessRule {
    pub fn new(permissions: Permissions, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            permissions,
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

/// Ownership and visibility rules attached to created nodes.
///
/// The lock never interprets the policy; it is forwarded verbatim to every
/// create call so the service can enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Anyone may do anything with the node.
    pub fn open_unsafe() -> Self {
        Self::new(vec![AccessRule::new(Permissions::ALL, "world", "anyone")])
    }

    /// Only the authenticated creator has access.
    pub fn creator_all() -> Self {
        Self::new(vec![AccessRule::new(Permissions::ALL, "auth", "")])
    }

    pub fn read_unsafe() -> Self {
        Self::new(vec![AccessRule::new(Permissions::READ, "world", "anyone")])
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::open_unsafe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::NodeCreated => "node created",
            EventKind::NodeDeleted => "node deleted",
            EventKind::NodeDataChanged => "node data changed",
            EventKind::NodeChildrenChanged => "node children changed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub path: String,
}

/// What a watch delivers: a change notification, or the failure that ended it.
pub type WatchOutcome = CoordinationResult<WatchEvent>;

/// Receiving end of a one-shot watch. Yields exactly one outcome.
#[derive(Debug)]
pub struct Watch {
    path: String,
    receiver: Receiver<WatchOutcome>,
}

/// Sending end held by the service until the watch fires.
#[derive(Debug)]
pub struct WatchTrigger {
    path: String,
    sender: SyncSender<WatchOutcome>,
}

/// Creates a connected trigger/watch pair for `path`.
pub fn watch_channel(path: impl Into<String>) -> (WatchTrigger, Watch) {
    let path = path.into();
    let (sender, receiver) = mpsc::sync_channel(1);
    (
        WatchTrigger {
            path: path.clone(),
            sender,
        },
        Watch { path, receiver },
    )
}

impl WatchTrigger {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Delivers the single outcome. A watcher that already went away is ignored.
    pub fn fire(self, outcome: WatchOutcome) {
        let _ = self.sender.try_send(outcome);
    }
}

impl Watch {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Blocks until the watch fires. A dropped trigger reads as a closed connection.
    pub fn wait(self) -> WatchOutcome {
        self.receiver
            .recv()
            .unwrap_or(Err(CoordinationError::ConnectionClosed))
    }

    /// Waits at most `timeout`; `None` means nothing arrived yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WatchOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CoordinationError::ConnectionClosed)),
        }
    }
}

/// Operations the lock consumes from a coordination client.
pub trait CoordinationService: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    /// Creates an ephemeral node named `prefix` plus a service-assigned
    /// sequence suffix and returns its full path. Fails with `NoNode` when the
    /// parent does not exist.
    fn create_ephemeral_sequential(
        &self,
        prefix: &str,
        policy: &AccessPolicy,
    ) -> CoordinationResult<String>;

    /// Creates a persistent, empty node. Fails with `NodeExists` if present.
    fn create(&self, path: &str, policy: &AccessPolicy) -> CoordinationResult<String>;

    /// Lists child names (not full paths) of `path`.
    fn children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Reads `path` and arms a one-shot watch on it.
    fn get_watched(&self, path: &str) -> CoordinationResult<(Vec<u8>, Watch)>;

    /// Deletes `path`; `None` skips the version check.
    fn delete(&self, path: &str, version: Option<i32>) -> CoordinationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_delivers_single_outcome() {
        let (trigger, watch) = watch_channel("/locks/a");
        trigger.fire(Ok(WatchEvent {
            kind: EventKind::NodeDeleted,
            path: "/locks/a".to_string(),
        }));

        let event = watch.wait().unwrap();
        assert_eq!(event.kind, EventKind::NodeDeleted);
        assert_eq!(event.path, "/locks/a");
    }

    #[test]
    fn dropped_trigger_reads_as_closed_connection() {
        let (trigger, watch) = watch_channel("/locks/a");
        drop(trigger);
        assert_eq!(watch.wait(), Err(CoordinationError::ConnectionClosed));
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let (_trigger, watch) = watch_channel("/locks/a");
        assert!(watch.wait_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn permissions_compose() {
        assert!(Permissions::ALL.contains(Permissions::DELETE));
        assert!(!Permissions::READ.contains(Permissions::WRITE));
        assert_eq!(AccessPolicy::default(), AccessPolicy::open_unsafe());
    }
}
