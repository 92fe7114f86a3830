use fairlock::coordination::AccessPolicy;
use fairlock::coordination::memory::{MemoryCoordinator, MemorySession};
use fairlock::locking::{LockHandle, LockSettings};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const ROOT: &str = "/locks/res1";

/// A shared in-memory service that hands out one session per participant.
#[derive(Default)]
pub struct Cluster {
    pub coordinator: MemoryCoordinator,
}

/// A handle together with the session it runs on.
pub struct Participant {
    pub session: Arc<MemorySession>,
    pub handle: Arc<LockHandle>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant(&self, root: &str) -> Participant {
        self.participant_with(root, fast_settings())
    }

    pub fn participant_with(&self, root: &str, settings: LockSettings) -> Participant {
        let session = Arc::new(self.coordinator.connect());
        let handle = LockHandle::new(session.clone(), root, AccessPolicy::open_unsafe())
            .unwrap()
            .with_settings(settings);
        Participant {
            session,
            handle: Arc::new(handle),
        }
    }

    pub fn queue_len(&self, root: &str) -> usize {
        self.coordinator.children_of(root).len()
    }
}

pub fn fast_settings() -> LockSettings {
    LockSettings {
        wait_slice: Duration::from_millis(5),
        ..LockSettings::default()
    }
}

/// Polls `condition` until it holds; panics after five seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
