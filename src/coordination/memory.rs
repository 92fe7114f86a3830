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

//! In-process coordination service.
//!
//! Models the parts of a hierarchical coordination store the lock depends
//! on: sessions, ephemeral and sequential nodes, one-shot data watches and
//! session expiry. Every [`MemorySession`] behaves like an independent client
//! connection against a shared [`MemoryCoordinator`] tree. Fault injection and
//! per-session call statistics make protocol behaviour observable in tests.

use crate::coordination::path;
use crate::coordination::{
    AccessPolicy, ConnectionState, CoordinationError, CoordinationResult, CoordinationService,
    EventKind, Watch, WatchEvent, WatchTrigger, watch_channel,
};
use log::{debug, trace};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SessionId = u64;

/// Service operations that can carry an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    CreateSequential,
    Children,
    GetWatched,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the call without touching the tree.
    Fail(CoordinationError),
    /// Apply the call, then report `ConnectionLoss` as if the reply was lost.
    LoseResponse,
}

/// Number of calls a session issued, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub connection_checks: u64,
    pub creates: u64,
    pub sequential_creates: u64,
    pub children_calls: u64,
    pub watched_reads: u64,
    pub deletes: u64,
}

impl OperationStats {
    /// Calls that touched the node tree (connection checks excluded).
    pub fn tree_calls(&self) -> u64 {
        self.creates + self.sequential_creates + self.children_calls + self.watched_reads + self.deletes
    }
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<SessionId>,
    policy: AccessPolicy,
    version: i32,
    next_sequence: u64,
    children: BTreeSet<String>,
}

impl Node {
    fn new(policy: AccessPolicy, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data: Vec::new(),
            ephemeral_owner,
            policy,
            version: 0,
            next_sequence: 0,
            children: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct WatchRegistration {
    session: SessionId,
    trigger: WatchTrigger,
}

#[derive(Debug, Default)]
struct SessionRecord {
    state: Option<ConnectionState>,
    stats: OperationStats,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<WatchRegistration>>,
    sessions: HashMap<SessionId, SessionRecord>,
    faults: HashMap<Operation, VecDeque<Fault>>,
    next_session: SessionId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(AccessPolicy::open_unsafe(), None));
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            faults: HashMap::new(),
            next_session: 1,
        }
    }

    fn state_of(&self, session: SessionId) -> ConnectionState {
        self.sessions
            .get(&session)
            .and_then(|record| record.state)
            .unwrap_or(ConnectionState::Closed)
    }

    fn check_session(&self, session: SessionId) -> CoordinationResult<()> {
        match self.state_of(session) {
            ConnectionState::HasSession => Ok(()),
            ConnectionState::Expired => Err(CoordinationError::SessionExpired),
            ConnectionState::Closed => Err(CoordinationError::ConnectionClosed),
            _ => Err(CoordinationError::ConnectionLoss),
        }
    }

    fn stats_mut(&mut self, session: SessionId) -> &mut OperationStats {
        &mut self.sessions.entry(session).or_default().stats
    }

    fn take_fault(&mut self, operation: Operation) -> Option<Fault> {
        self.faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
    }

    fn create_node(
        &mut self,
        session: SessionId,
        path: &str,
        policy: &AccessPolicy,
        ephemeral: bool,
        sequential: bool,
    ) -> CoordinationResult<String> {
        let parent_path = path::parent(path)
            .ok_or_else(|| CoordinationError::NodeExists {
                path: path.to_string(),
            })?
            .to_string();

        let parent = self
            .nodes
            .get(&parent_path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: parent_path.clone(),
            })?;
        if parent.ephemeral_owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals { path: parent_path });
        }

        let full_path = if sequential {
            let sequence = parent.next_sequence;
            format!("{path}{sequence:010}")
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&full_path) {
            return Err(CoordinationError::NodeExists { path: full_path });
        }

        let parent = self
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: parent_path.clone(),
            })?;
        if sequential {
            parent.next_sequence += 1;
        }
        parent
            .children
            .insert(path::basename(&full_path).to_string());

        let owner = ephemeral.then_some(session);
        self.nodes
            .insert(full_path.clone(), Node::new(policy.clone(), owner));
        trace!("session {session} created {full_path}");
        Ok(full_path)
    }

    fn delete_node(&mut self, path: &str, version: Option<i32>) -> CoordinationResult<()> {
        if path == "/" {
            return Err(CoordinationError::Other(
                "the root node cannot be deleted".to_string(),
            ));
        }

        let node = self.nodes.get(path).ok_or_else(|| CoordinationError::NoNode {
            path: path.to_string(),
        })?;
        if let Some(expected) = version
            && expected != node.version
        {
            return Err(CoordinationError::BadVersion {
                path: path.to_string(),
            });
        }
        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty {
                path: path.to_string(),
            });
        }

        self.nodes.remove(path);
        if let Some(parent) = path::parent(path).and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(path::basename(path));
        }
        self.fire(path, EventKind::NodeDeleted);
        Ok(())
    }

    fn fire(&mut self, path: &str, kind: EventKind) {
        if let Some(registrations) = self.watches.remove(path) {
            trace!(
                "firing {} watch(es) on {path} for {kind}",
                registrations.len()
            );
            for registration in registrations {
                registration.trigger.fire(Ok(WatchEvent {
                    kind,
                    path: path.to_string(),
                }));
            }
        }
    }

    fn end_session(&mut self, session: SessionId, state: ConnectionState, error: CoordinationError) {
        match self.state_of(session) {
            ConnectionState::Expired | ConnectionState::Closed => return,
            _ => {}
        }
        self.sessions.entry(session).or_default().state = Some(state);

        // The session's own watchers learn about the end first.
        for registrations in self.watches.values_mut() {
            let (own, others): (Vec<_>, Vec<_>) = registrations
                .drain(..)
                .partition(|registration| registration.session == session);
            *registrations = others;
            for registration in own {
                registration.trigger.fire(Err(error.clone()));
            }
        }
        self.watches.retain(|_, registrations| !registrations.is_empty());

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            if let Err(err) = self.delete_node(&path, None) {
                debug!("failed to remove ephemeral {path} of session {session}: {err}");
            }
        }
        debug!("session {session} ended as {state}");
    }
}

fn lock_tree(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared node tree that sessions connect to.
#[derive(Debug, Clone)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Opens a new session with an active state.
    pub fn connect(&self) -> MemorySession {
        let mut tree = lock_tree(&self.tree);
        let id = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(
            id,
            SessionRecord {
                state: Some(ConnectionState::HasSession),
                stats: OperationStats::default(),
            },
        );
        debug!("session {id} connected");
        MemorySession {
            id,
            tree: Arc::clone(&self.tree),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        lock_tree(&self.tree).nodes.contains_key(path)
    }

    /// Child names of `path` in name order; empty when `path` is missing.
    pub fn children_of(&self, path: &str) -> Vec<String> {
        lock_tree(&self.tree)
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Access policy a node was created with.
    pub fn policy_of(&self, path: &str) -> Option<AccessPolicy> {
        lock_tree(&self.tree)
            .nodes
            .get(path)
            .map(|node| node.policy.clone())
    }

    pub fn armed_watches(&self, path: &str) -> usize {
        lock_tree(&self.tree)
            .watches
            .get(path)
            .map_or(0, Vec::len)
    }

    pub fn total_armed_watches(&self) -> usize {
        lock_tree(&self.tree).watches.values().map(Vec::len).sum()
    }

    /// Replaces a node's data and fires its data watches.
    pub fn set_data(&self, path: &str, data: &[u8]) -> CoordinationResult<()> {
        let mut tree = lock_tree(&self.tree);
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })?;
        node.data = data.to_vec();
        node.version += 1;
        tree.fire(path, EventKind::NodeDataChanged);
        Ok(())
    }

    /// Queues a fault consumed by the next matching call of any session.
    pub fn inject_fault(&self, operation: Operation, fault: Fault) {
        lock_tree(&self.tree)
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection. Dropping it closes the session.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Simulates server-side expiry: ephemeral nodes vanish and pending
    /// watches of this session fail with `SessionExpired`.
    pub fn expire(&self) {
        lock_tree(&self.tree).end_session(
            self.id,
            ConnectionState::Expired,
            CoordinationError::SessionExpired,
        );
    }

    /// Closes the session the way a client shutdown does.
    pub fn close(&self) {
        lock_tree(&self.tree).end_session(
            self.id,
            ConnectionState::Closed,
            CoordinationError::ConnectionClosed,
        );
    }

    pub fn stats(&self) -> OperationStats {
        lock_tree(&self.tree)
            .sessions
            .get(&self.id)
            .map(|record| record.stats)
            .unwrap_or_default()
    }

    fn begin(&self, operation: Operation) -> CoordinationResult<(MutexGuard<'_, Tree>, Option<Fault>)> {
        let mut tree = lock_tree(&self.tree);
        tree.check_session(self.id)?;
        let stats = tree.stats_mut(self.id);
        match operation {
            Operation::Create => stats.creates += 1,
            Operation::CreateSequential => stats.sequential_creates += 1,
            Operation::Children => stats.children_calls += 1,
            Operation::GetWatched => stats.watched_reads += 1,
            Operation::Delete => stats.deletes += 1,
        }
        let fault = tree.take_fault(operation);
        if let Some(Fault::Fail(err)) = fault {
            debug!("session {} injected failure for {operation:?}: {err}", self.id);
            return Err(err);
        }
        Ok((tree, fault))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

impl CoordinationService for MemorySession {
    fn connection_state(&self) -> ConnectionState {
        let mut tree = lock_tree(&self.tree);
        tree.stats_mut(self.id).connection_checks += 1;
        tree.state_of(self.id)
    }

    fn create_ephemeral_sequential(
        &self,
        prefix: &str,
        policy: &AccessPolicy,
    ) -> CoordinationResult<String> {
        let (mut tree, fault) = self.begin(Operation::CreateSequential)?;
        let created = tree.create_node(self.id, prefix, policy, true, true)?;
        if fault == Some(Fault::LoseResponse) {
            debug!("session {} dropping reply for {created}", self.id);
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(created)
    }

    fn create(&self, path: &str, policy: &AccessPolicy) -> CoordinationResult<String> {
        let (mut tree, fault) = self.begin(Operation::Create)?;
        let created = tree.create_node(self.id, path, policy, false, false)?;
        if fault == Some(Fault::LoseResponse) {
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(created)
    }

    fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let (tree, _) = self.begin(Operation::Children)?;
        tree.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })
    }

    fn get_watched(&self, path: &str) -> CoordinationResult<(Vec<u8>, Watch)> {
        let (mut tree, _) = self.begin(Operation::GetWatched)?;
        let data = tree
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })?;
        let (trigger, watch) = watch_channel(path);
        tree.watches
            .entry(path.to_string())
            .or_default()
            .push(WatchRegistration {
                session: self.id,
                trigger,
            });
        Ok((data, watch))
    }

    fn delete(&self, path: &str, version: Option<i32>) -> CoordinationResult<()> {
        let (mut tree, fault) = self.begin(Operation::Delete)?;
        tree.delete_node(path, version)?;
        if fault == Some(Fault::LoseResponse) {
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy() -> AccessPolicy {
        AccessPolicy::open_unsafe()
    }

    #[test]
    fn sequential_nodes_are_numbered_per_parent() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();

        let first = session
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();
        let second = session
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();

        assert_eq!(first, "/locks/lock-0000000000");
        assert_eq!(second, "/locks/lock-0000000001");
        assert_eq!(
            coordinator.children_of("/locks"),
            vec!["lock-0000000000", "lock-0000000001"]
        );
    }

    #[test]
    fn create_without_parent_reports_no_node() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        let err = session
            .create_ephemeral_sequential("/missing/lock-", &policy())
            .unwrap_err();
        assert_eq!(
            err,
            CoordinationError::NoNode {
                path: "/missing".to_string()
            }
        );
    }

    #[test]
    fn duplicate_create_reports_node_exists() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        assert!(session.create("/locks", &policy()).unwrap_err().is_node_exists());
    }

    #[test]
    fn nodes_keep_their_access_policy() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &AccessPolicy::read_unsafe()).unwrap();
        assert_eq!(
            coordinator.policy_of("/locks"),
            Some(AccessPolicy::read_unsafe())
        );
        assert_eq!(coordinator.policy_of("/missing"), None);
    }

    #[test]
    fn ephemeral_nodes_cannot_have_children() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        let node = session
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();
        let err = session.create(&format!("{node}/child"), &policy()).unwrap_err();
        assert!(matches!(err, CoordinationError::NoChildrenForEphemerals { .. }));
    }

    #[test]
    fn delete_fires_watch_once() {
        let coordinator = MemoryCoordinator::new();
        let owner = coordinator.connect();
        let watcher = coordinator.connect();
        owner.create("/locks", &policy()).unwrap();
        let node = owner
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();

        let (_, watch) = watcher.get_watched(&node).unwrap();
        assert_eq!(coordinator.armed_watches(&node), 1);

        owner.delete(&node, None).unwrap();
        let event = watch.wait().unwrap();
        assert_eq!(event.kind, EventKind::NodeDeleted);
        assert_eq!(coordinator.armed_watches(&node), 0);
    }

    #[test]
    fn delete_checks_version_and_children() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        session.create("/locks/res", &policy()).unwrap();

        assert!(matches!(
            session.delete("/locks", None).unwrap_err(),
            CoordinationError::NotEmpty { .. }
        ));
        assert!(matches!(
            session.delete("/locks/res", Some(7)).unwrap_err(),
            CoordinationError::BadVersion { .. }
        ));
        session.delete("/locks/res", Some(0)).unwrap();
        assert!(session.delete("/locks/res", None).unwrap_err().is_no_node());
    }

    #[test]
    fn expiry_removes_ephemerals_and_fails_own_watches() {
        let coordinator = MemoryCoordinator::new();
        let holder = coordinator.connect();
        let waiter = coordinator.connect();
        holder.create("/locks", &policy()).unwrap();
        let held = holder
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();
        let waiting = waiter
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();

        let (_, holder_watch) = holder.get_watched(&waiting).unwrap();
        let (_, waiter_watch) = waiter.get_watched(&held).unwrap();

        holder.expire();

        assert_eq!(holder_watch.wait(), Err(CoordinationError::SessionExpired));
        assert_eq!(waiter_watch.wait().unwrap().kind, EventKind::NodeDeleted);
        assert!(!coordinator.exists(&held));
        assert!(coordinator.exists(&waiting));
        assert_eq!(holder.connection_state(), ConnectionState::Expired);
        assert_eq!(
            holder.children("/locks").unwrap_err(),
            CoordinationError::SessionExpired
        );
    }

    #[test]
    fn dropping_session_closes_it() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        let node = session
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap();
        drop(session);
        assert!(!coordinator.exists(&node));
        assert!(coordinator.exists("/locks"));
    }

    #[test]
    fn injected_faults_are_consumed_in_order() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        coordinator.inject_fault(
            Operation::Children,
            Fault::Fail(CoordinationError::ConnectionLoss),
        );

        assert_eq!(
            session.children("/").unwrap_err(),
            CoordinationError::ConnectionLoss
        );
        assert!(session.children("/").is_ok());
        assert_eq!(session.stats().children_calls, 2);
    }

    #[test]
    fn lost_response_still_creates_node() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        coordinator.inject_fault(Operation::CreateSequential, Fault::LoseResponse);

        let err = session
            .create_ephemeral_sequential("/locks/lock-", &policy())
            .unwrap_err();
        assert_eq!(err, CoordinationError::ConnectionLoss);
        assert_eq!(coordinator.children_of("/locks"), vec!["lock-0000000000"]);
    }

    #[test]
    fn data_change_fires_watch() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        session.create("/locks", &policy()).unwrap();
        let (_, watch) = session.get_watched("/locks").unwrap();

        coordinator.set_data("/locks", b"payload").unwrap();
        let event = watch.wait_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(event.kind, EventKind::NodeDataChanged);

        let (data, _) = session.get_watched("/locks").unwrap();
        assert_eq!(data, b"payload");
    }
}
