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
use crate::error::Result;
use crate::locking::acquisition::LockRequest;
use crate::locking::arbitration;
use crate::locking::handle::{LockHandle, LockSettings};
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::LockWaitObserver;
use log::debug;
use std::sync::Arc;

/// Hands out lock handles that share one service, policy and observer.
pub struct LockController {
    service: Arc<dyn CoordinationService>,
    policy: AccessPolicy,
    settings: LockSettings,
    default_timeout: LockTimeoutValue,
    observer: Option<Arc<dyn LockWaitObserver>>,
}

impl LockController {
    pub fn new(service: Arc<dyn CoordinationService>, settings: LockSettings) -> Self {
        Self {
            service,
            policy: AccessPolicy::default(),
            settings,
            default_timeout: LockTimeoutValue::Infinite,
            observer: None,
        }
    }

    /// Builds a controller from validated configuration, including its
    /// default acquisition timeout.
    pub fn from_config(
        service: Arc<dyn CoordinationService>,
        config: &LockingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut controller = Self::new(service, LockSettings::from(config));
        controller.default_timeout = config.timeout_value()?;
        Ok(controller)
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: LockTimeoutValue) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockWaitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn default_timeout(&self) -> LockTimeoutValue {
        self.default_timeout
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn handle(&self, root: &str) -> Result<LockHandle> {
        let handle = LockHandle::new(Arc::clone(&self.service), root, self.policy.clone())?
            .with_settings(self.settings.clone());
        Ok(match &self.observer {
            Some(observer) => handle.with_observer(Arc::clone(observer)),
            None => handle,
        })
    }

    /// New handle for `root`, acquired with the controller's default timeout.
    pub fn acquire(&self, root: &str) -> Result<LockHandle> {
        self.acquire_with(root, LockRequest::new(self.default_timeout))
    }

    pub fn acquire_with(&self, root: &str, request: LockRequest) -> Result<LockHandle> {
        let handle = self.handle(root)?;
        handle.acquire_with(request)?;
        Ok(handle)
    }

    /// Queued node names under `root`, holder first.
    pub fn participants(&self, root: &str) -> Result<Vec<String>> {
        path::validate_root(root)?;
        match self.service.children(root) {
            Ok(children) => arbitration::queue_order(&children),
            Err(CoordinationError::NoNode { .. }) => {
                debug!("Lock root {root} does not exist yet");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory::MemoryCoordinator;
    use crate::error::FairlockError;
    use crate::locking::metrics::LockMetrics;

    fn controller(coordinator: &MemoryCoordinator) -> LockController {
        LockController::from_config(Arc::new(coordinator.connect()), &LockingConfig::default())
            .unwrap()
    }

    #[test]
    fn participants_of_missing_root_is_empty() {
        let coordinator = MemoryCoordinator::new();
        assert!(controller(&coordinator).participants("/locks/none").unwrap().is_empty());
    }

    #[test]
    fn participants_follow_queue_order() {
        let coordinator = MemoryCoordinator::new();
        let first = controller(&coordinator);
        let second = controller(&coordinator);

        let held = first.acquire("/locks/queue").unwrap();
        let waiting = second.handle("/locks/queue").unwrap();
        assert!(!waiting.try_acquire().unwrap());

        let names = first.participants("/locks/queue").unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(
            Some(path::join("/locks/queue", &names[0])),
            held.owned_node()
        );
    }

    #[test]
    fn handles_share_observer_and_settings() {
        let coordinator = MemoryCoordinator::new();
        let metrics = Arc::new(LockMetrics::new());
        let config = LockingConfig {
            node_prefix: "job-".to_string(),
            protected_nodes: false,
            ..LockingConfig::default()
        };
        let controller =
            LockController::from_config(Arc::new(coordinator.connect()), &config)
                .unwrap()
                .with_observer(metrics.clone());

        let handle = controller.acquire("/locks/jobs").unwrap();
        assert!(
            handle
                .owned_node()
                .unwrap()
                .starts_with("/locks/jobs/job-")
        );
        handle.release().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.acquired, 1);
        assert_eq!(snapshot.released, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn policy_is_forwarded_to_every_created_node() {
        let coordinator = MemoryCoordinator::new();
        let controller = controller(&coordinator).with_policy(AccessPolicy::creator_all());

        let handle = controller.acquire("/locks/private").unwrap();
        let node = handle.owned_node().unwrap();
        assert_eq!(handle.policy(), &AccessPolicy::creator_all());
        assert_eq!(
            coordinator.policy_of(&node),
            Some(AccessPolicy::creator_all())
        );
        assert_eq!(
            coordinator.policy_of("/locks"),
            Some(AccessPolicy::creator_all())
        );
    }

    #[test]
    fn invalid_root_is_rejected() {
        let coordinator = MemoryCoordinator::new();
        let controller = controller(&coordinator);
        assert!(matches!(
            controller.handle("/locks/").unwrap_err(),
            FairlockError::InvalidPath(_)
        ));
        assert!(matches!(
            controller.participants("relative").unwrap_err(),
            FairlockError::InvalidPath(_)
        ));
    }

    #[test]
    fn default_timeout_comes_from_config() {
        let coordinator = MemoryCoordinator::new();
        let config = LockingConfig {
            timeout: "250ms".to_string(),
            ..LockingConfig::default()
        };
        let controller =
            LockController::from_config(Arc::new(coordinator.connect()), &config).unwrap();
        assert_eq!(
            controller.default_timeout(),
            LockTimeoutValue::from_millis(250)
        );
    }

    #[test]
    fn acquire_honors_overridden_default_timeout() {
        let coordinator = MemoryCoordinator::new();
        let holder = controller(&coordinator);
        let _held = holder.acquire("/locks/busy").unwrap();

        let impatient = controller(&coordinator)
            .with_default_timeout(LockTimeoutValue::from_millis(30));
        assert_eq!(
            impatient.default_timeout(),
            LockTimeoutValue::from_millis(30)
        );
        let err = impatient.acquire("/locks/busy").unwrap_err();
        assert!(matches!(err, FairlockError::Timeout { .. }));
        assert_eq!(impatient.participants("/locks/busy").unwrap().len(), 1);
    }
}
