mod common;

use common::Cluster;
use common::cluster::ROOT;
use fairlock::error::FairlockError;
use fairlock::locking::LockPhase;

#[test]
fn release_requires_holding() {
    let cluster = Cluster::new();
    let client = cluster.participant(ROOT);

    assert!(matches!(
        client.handle.release().unwrap_err(),
        FairlockError::NotLocked { .. }
    ));
    assert_eq!(client.session.stats().tree_calls(), 0);

    client.handle.acquire().unwrap();
    client.handle.release().unwrap();
    assert!(matches!(
        client.handle.release().unwrap_err(),
        FairlockError::NotLocked { .. }
    ));
    assert_eq!(client.session.stats().deletes, 1);
}

#[test]
fn reentrant_acquire_fails_without_touching_the_service() {
    let cluster = Cluster::new();
    let client = cluster.participant(ROOT);
    client.handle.acquire().unwrap();
    let node = client.handle.owned_node();
    let before = client.session.stats();

    assert!(matches!(
        client.handle.acquire().unwrap_err(),
        FairlockError::Deadlock { .. }
    ));
    assert!(matches!(
        client.handle.try_acquire().unwrap_err(),
        FairlockError::Deadlock { .. }
    ));
    assert_eq!(client.session.stats(), before);
    assert_eq!(client.handle.owned_node(), node);
    assert_eq!(cluster.queue_len(ROOT), 1);
}

#[test]
fn handle_can_be_reused_after_release() {
    let cluster = Cluster::new();
    let client = cluster.participant(ROOT);

    client.handle.acquire().unwrap();
    let first = client.handle.sequence().unwrap();
    client.handle.release().unwrap();
    assert_eq!(client.handle.phase(), LockPhase::Idle);
    assert_eq!(client.handle.sequence(), None);

    client.handle.acquire().unwrap();
    assert!(client.handle.sequence().unwrap() > first);
}

#[test]
fn dropping_a_held_handle_releases_it() {
    let cluster = Cluster::new();
    let client = cluster.participant(ROOT);
    client.handle.acquire().unwrap();
    assert_eq!(cluster.queue_len(ROOT), 1);

    let session = client.session.clone();
    drop(client);
    assert_eq!(cluster.queue_len(ROOT), 0);
    assert_eq!(session.stats().deletes, 1);
}

#[test]
fn acquire_without_session_fails_fast() {
    let cluster = Cluster::new();
    let client = cluster.participant(ROOT);
    client.session.close();

    assert!(matches!(
        client.handle.acquire().unwrap_err(),
        FairlockError::NoSession { .. }
    ));
    assert_eq!(client.handle.phase(), LockPhase::Idle);
    assert_eq!(client.session.stats().tree_calls(), 0);
    assert!(!cluster.coordinator.exists(ROOT));
}
