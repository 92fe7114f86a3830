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

use crate::config::LockingConfig;
use crate::coordination::path;
use crate::coordination::{AccessPolicy, CoordinationError, CoordinationService};
use crate::error::{FairlockError, Result};
use crate::locking::acquisition::{LockRequest, WaitOutcome, wait_for_notification};
use crate::locking::arbitration;
use crate::locking::wait_observer::{AttemptScope, LockWaitObserver};
use log::{debug, info, trace, warn};
use retry::delay::NoDelay;
use retry::{OperationResult, retry_with_index};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Marks node names that embed a per-attempt guid.
const PROTECTED_MARKER: &str = "_c_";

/// Lifecycle phase of a [`LockHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Idle,
    Creating,
    Waiting,
    Held,
}

impl fmt::Display for LockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockPhase::Idle => "idle",
            LockPhase::Creating => "creating",
            LockPhase::Waiting => "waiting",
            LockPhase::Held => "held",
        };
        f.write_str(label)
    }
}

/// Knobs that shape how a handle queues and waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub node_prefix: String,
    pub parent_create_attempts: u32,
    pub protected_nodes: bool,
    pub wait_slice: Duration,
}

impl From<&LockingConfig> for LockSettings {
    fn from(config: &LockingConfig) -> Self {
        Self {
            node_prefix: config.node_prefix.clone(),
            parent_create_attempts: config.parent_create_attempts,
            protected_nodes: config.protected_nodes,
            wait_slice: config.wait_slice(),
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&LockingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OwnedNode {
    path: String,
    sequence: u64,
}

#[derive(Debug)]
struct HandleState {
    phase: LockPhase,
    node: Option<OwnedNode>,
    acquired_at: Option<Instant>,
}

impl HandleState {
    fn idle() -> Self {
        Self {
            phase: LockPhase::Idle,
            node: None,
            acquired_at: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::idle();
    }
}

/// One process's claim on a lock root.
///
/// A handle queues at most one ephemeral sequential node under its root and
/// holds the lock while that node has the lowest sequence. Waiters watch only
/// their immediate predecessor, so a release wakes exactly one of them.
///
/// Methods take `&self`. Driving one handle from two threads is not
/// supported, but the phase check makes a re-entrant `acquire` fail with
/// [`FairlockError::Deadlock`] instead of queueing twice.
pub struct LockHandle {
    service: Arc<dyn CoordinationService>,
    root: String,
    policy: AccessPolicy,
    settings: LockSettings,
    observer: Option<Arc<dyn LockWaitObserver>>,
    state: Mutex<HandleState>,
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("settings", &self.settings)
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl LockHandle {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        root: impl Into<String>,
        policy: AccessPolicy,
    ) -> Result<Self> {
        let root = root.into();
        path::validate_root(&root)?;
        Ok(Self {
            service,
            root,
            policy,
            settings: LockSettings::default(),
            observer: None,
            state: Mutex::new(HandleState::idle()),
        })
    }

    pub fn with_settings(mut self, settings: LockSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockWaitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn phase(&self) -> LockPhase {
        self.lock_state().phase
    }

    pub fn is_held(&self) -> bool {
        self.phase() == LockPhase::Held
    }

    /// Full path of the queued or held node.
    pub fn owned_node(&self) -> Option<String> {
        self.lock_state().node.as_ref().map(|node| node.path.clone())
    }

    pub fn sequence(&self) -> Option<u64> {
        self.lock_state().node.as_ref().map(|node| node.sequence)
    }

    /// Blocks until the lock is held.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_with(LockRequest::blocking())
    }

    /// Takes the lock only if no other node is queued ahead.
    pub fn try_acquire(&self) -> Result<bool> {
        match self.acquire_with(LockRequest::immediate()) {
            Ok(()) => Ok(true),
            Err(FairlockError::Timeout { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Acquires the lock honoring the request's timeout and cancellation.
    ///
    /// On failure the handle is `Idle` again and any node it queued has been
    /// removed, unless the session expired and the service already did so.
    pub fn acquire_with(&self, request: LockRequest) -> Result<()> {
        self.begin_attempt()?;
        let observer = self.observer.as_deref();
        let _attempt = AttemptScope::enter(observer, &self.root, request.correlation());

        let result = self.run_acquisition(&request);
        let mut state = self.lock_state();
        match result {
            Ok(node) => {
                info!(
                    "[{}] Acquired lock {} with {} after {:.3}s",
                    request.correlation(),
                    self.root,
                    node.path,
                    request.elapsed().as_secs_f64()
                );
                state.phase = LockPhase::Held;
                state.node = Some(node);
                state.acquired_at = Some(Instant::now());
                drop(state);
                if let Some(observer) = observer {
                    observer.on_acquired(&self.root, request.elapsed());
                }
                Ok(())
            }
            Err(err) => {
                state.reset();
                drop(state);
                self.report_failure(&request, &err);
                Err(err)
            }
        }
    }

    /// Deletes the held node and returns the handle to `Idle`.
    ///
    /// If the delete fails the handle stays `Held` so the caller can retry.
    pub fn release(&self) -> Result<()> {
        let mut state = self.lock_state();
        let node = match (state.phase, state.node.as_ref()) {
            (LockPhase::Held, Some(node)) => node.clone(),
            _ => {
                return Err(FairlockError::NotLocked {
                    root: self.root.clone(),
                });
            }
        };

        if let Err(err) = self.service.delete(&node.path, None) {
            warn!(
                "Failed to release lock {} ({}): {err}",
                self.root, node.path
            );
            return Err(err.into());
        }

        let held = state
            .acquired_at
            .map(|at| at.elapsed())
            .unwrap_or_default();
        state.reset();
        drop(state);

        info!(
            "Released lock {} ({}) after {:.3}s",
            self.root,
            node.path,
            held.as_secs_f64()
        );
        if let Some(observer) = self.observer.as_deref() {
            observer.on_released(&self.root, held);
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_attempt(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.phase != LockPhase::Idle {
            debug!(
                "Refusing to acquire {} while the handle is {}",
                self.root, state.phase
            );
            return Err(FairlockError::Deadlock {
                root: self.root.clone(),
            });
        }
        state.phase = LockPhase::Creating;
        Ok(())
    }

    fn run_acquisition(&self, request: &LockRequest) -> Result<OwnedNode> {
        let connection = self.service.connection_state();
        if !connection.has_session() {
            debug!(
                "[{}] Connection is {connection}; not acquiring {}",
                request.correlation(),
                self.root
            );
            return Err(FairlockError::NoSession {
                root: self.root.clone(),
            });
        }

        if request.cancellation().is_cancelled() {
            return Err(self.cancelled(request));
        }

        let created = self.create_candidate(request)?;
        let node = match arbitration::parse_sequence(&created) {
            Ok(sequence) => OwnedNode {
                path: created,
                sequence,
            },
            Err(err) => {
                self.abandon(&created, &err, request);
                return Err(err);
            }
        };
        debug!(
            "[{}] Queued {} with sequence {}",
            request.correlation(),
            node.path,
            node.sequence
        );
        if let Some(observer) = self.observer.as_deref() {
            observer.on_node_created(&self.root, &node.path, node.sequence);
        }

        {
            let mut state = self.lock_state();
            state.phase = LockPhase::Waiting;
            state.node = Some(node.clone());
        }

        if let Err(err) = self.arbitrate(&node, request) {
            self.abandon(&node.path, &err, request);
            return Err(err);
        }
        Ok(node)
    }

    /// Creates the candidate node, recreating a missing lock root and
    /// recovering protected nodes whose create reply was lost.
    fn create_candidate(&self, request: &LockRequest) -> Result<String> {
        let guid = self
            .settings
            .protected_nodes
            .then(|| Uuid::new_v4().simple().to_string());
        let name = match &guid {
            Some(guid) => format!("{PROTECTED_MARKER}{guid}-{}", self.settings.node_prefix),
            None => self.settings.node_prefix.clone(),
        };
        let prefix = path::join(&self.root, &name);
        let retries = self.settings.parent_create_attempts.max(1) as usize - 1;

        retry_with_index(NoDelay.take(retries), |attempt| {
            match self.service.create_ephemeral_sequential(&prefix, &self.policy) {
                Ok(created) => OperationResult::Ok(created),
                Err(err @ CoordinationError::NoNode { .. }) => {
                    debug!(
                        "[{}] Lock root {} missing on attempt {attempt}; creating it",
                        request.correlation(),
                        self.root
                    );
                    match self.ensure_ancestors() {
                        Ok(()) => OperationResult::Retry(err.into()),
                        Err(fatal) => OperationResult::Err(fatal),
                    }
                }
                Err(CoordinationError::ConnectionLoss) => match guid.as_deref() {
                    Some(guid) => match self.find_protected_node(guid) {
                        Ok(Some(found)) => {
                            debug!(
                                "[{}] Recovered {found} after a lost create reply",
                                request.correlation()
                            );
                            OperationResult::Ok(found)
                        }
                        Ok(None) => OperationResult::Retry(CoordinationError::ConnectionLoss.into()),
                        Err(fatal) => OperationResult::Err(fatal),
                    },
                    None => OperationResult::Err(CoordinationError::ConnectionLoss.into()),
                },
                Err(err) => OperationResult::Err(err.into()),
            }
        })
        .map_err(|e| e.error)
    }

    /// Creates each segment of the lock root; competitors may win any of them.
    fn ensure_ancestors(&self) -> Result<()> {
        for ancestor in path::ancestors(&self.root) {
            match self.service.create(&ancestor, &self.policy) {
                Ok(created) => debug!("Created lock path node {created}"),
                Err(err) if err.is_node_exists() => {
                    trace!("Lock path node {ancestor} already exists")
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn find_protected_node(&self, guid: &str) -> Result<Option<String>> {
        let marker = format!("{PROTECTED_MARKER}{guid}-");
        match self.service.children(&self.root) {
            Ok(children) => Ok(children
                .into_iter()
                .find(|child| child.starts_with(&marker))
                .map(|child| path::join(&self.root, &child))),
            Err(CoordinationError::NoNode { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Re-ranks until this node is lowest, sleeping on the predecessor's
    /// watch in between.
    fn arbitrate(&self, node: &OwnedNode, request: &LockRequest) -> Result<()> {
        let own_name = path::basename(&node.path);
        let observer = self.observer.as_deref();

        loop {
            let children = self.service.children(&self.root)?;
            let ranking = arbitration::rank(own_name, node.sequence, &children)?;
            if !ranking.listed {
                return Err(FairlockError::NodeVanished {
                    node: node.path.clone(),
                });
            }

            let ahead = ranking.ahead;
            let predecessor = match (ranking.is_lowest(), ranking.predecessor) {
                (false, Some(predecessor)) => predecessor,
                _ => return Ok(()),
            };

            if request.cancellation().is_cancelled() {
                return Err(self.cancelled(request));
            }
            // An exhausted budget must not arm a watch it will never wait on.
            if request.budget().is_expired() {
                return Err(self.timed_out(request));
            }

            let predecessor_path = path::join(&self.root, &predecessor.name);
            let watch = match self.service.get_watched(&predecessor_path) {
                Ok((_, watch)) => watch,
                Err(CoordinationError::NoNode { .. }) => {
                    debug!(
                        "[{}] Predecessor {predecessor_path} is already gone; re-ranking",
                        request.correlation()
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            debug!(
                "[{}] Sequence {} waiting on {predecessor_path} ({ahead} ahead)",
                request.correlation(),
                node.sequence
            );
            if let Some(observer) = observer {
                observer.on_wait_start(&self.root, &predecessor_path, request.timeout_value());
            }

            match wait_for_notification(&watch, request, self.settings.wait_slice) {
                WaitOutcome::Notified(Ok(event)) => {
                    trace!(
                        "[{}] Woke on {} for {}",
                        request.correlation(),
                        event.kind,
                        event.path
                    );
                    if let Some(observer) = observer {
                        observer.on_wakeup(&self.root, &event);
                    }
                }
                WaitOutcome::Notified(Err(err)) => return Err(err.into()),
                WaitOutcome::Cancelled => return Err(self.cancelled(request)),
                WaitOutcome::TimedOut => return Err(self.timed_out(request)),
            }
        }
    }

    fn cancelled(&self, request: &LockRequest) -> FairlockError {
        FairlockError::Cancelled {
            root: self.root.clone(),
            waited_secs: request.elapsed().as_secs_f64(),
        }
    }

    fn timed_out(&self, request: &LockRequest) -> FairlockError {
        FairlockError::Timeout {
            root: self.root.clone(),
            waited_secs: request.elapsed().as_secs_f64(),
        }
    }

    /// Best-effort removal of a node this attempt queued before failing.
    fn abandon(&self, node: &str, cause: &FairlockError, request: &LockRequest) {
        if cause.is_session_expired() {
            debug!(
                "[{}] Session expired; the service already dropped {node}",
                request.correlation()
            );
            return;
        }

        match self.service.delete(node, None) {
            Ok(()) => debug!(
                "[{}] Removed {node} after failed acquisition: {cause}",
                request.correlation()
            ),
            Err(err) if err.is_no_node() => {
                trace!("[{}] {node} was already gone", request.correlation())
            }
            Err(err) => warn!(
                "[{}] Could not remove {node} after failed acquisition: {err}",
                request.correlation()
            ),
        }
    }

    fn report_failure(&self, request: &LockRequest, err: &FairlockError) {
        match err {
            FairlockError::Deadlock { .. } | FairlockError::NoSession { .. } => {
                debug!("[{}] {err}", request.correlation())
            }
            _ => warn!("[{}] {err}", request.correlation()),
        }

        let Some(observer) = self.observer.as_deref() else {
            return;
        };
        match err {
            FairlockError::Timeout { .. } => observer.on_timeout(&self.root, request.elapsed()),
            FairlockError::Cancelled { .. } => {
                observer.on_cancelled(&self.root, request.elapsed())
            }
            _ => {}
        }
        observer.on_failed(&self.root, err);
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.phase != LockPhase::Held {
            return;
        }

        if let Some(node) = state.node.take() {
            match self.service.delete(&node.path, None) {
                Ok(()) => debug!("Released lock {} ({}) on drop", self.root, node.path),
                Err(err) => warn!(
                    "Failed to release lock {} ({}) during drop: {err}",
                    self.root, node.path
                ),
            }
        }
        state.reset();
    }
}
