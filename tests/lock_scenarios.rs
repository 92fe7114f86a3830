mod common;

use common::cluster::ROOT;
use common::{Cluster, wait_until};
use fairlock::coordination::path;
use fairlock::locking::LockPhase;
use std::sync::Arc;
use std::thread;

#[test]
fn three_clients_are_served_in_arrival_order() {
    let cluster = Cluster::new();
    let a = cluster.participant(ROOT);
    let b = cluster.participant(ROOT);
    let c = cluster.participant(ROOT);

    // A creates the missing root and wins immediately.
    a.handle.acquire().unwrap();
    assert!(cluster.coordinator.exists("/locks"));
    assert!(cluster.coordinator.exists(ROOT));
    let a_node = a.handle.owned_node().unwrap();

    let b_handle = Arc::clone(&b.handle);
    let b_thread = thread::spawn(move || b_handle.acquire());
    wait_until("B to queue behind A", || {
        cluster.coordinator.armed_watches(&a_node) == 1
    });
    assert_eq!(b.handle.phase(), LockPhase::Waiting);
    let b_node = b.handle.owned_node().unwrap();

    let c_handle = Arc::clone(&c.handle);
    let c_thread = thread::spawn(move || c_handle.acquire());
    wait_until("C to queue behind B", || {
        cluster.coordinator.armed_watches(&b_node) == 1
    });
    let c_node = c.handle.owned_node().unwrap();

    let sequences = [
        a.handle.sequence().unwrap(),
        b.handle.sequence().unwrap(),
        c.handle.sequence().unwrap(),
    ];
    assert!(sequences[0] < sequences[1] && sequences[1] < sequences[2]);
    // C waits on B, never on A.
    assert_eq!(cluster.coordinator.armed_watches(&a_node), 1);
    assert_eq!(cluster.coordinator.armed_watches(&c_node), 0);

    a.handle.release().unwrap();
    b_thread.join().unwrap().unwrap();
    assert!(b.handle.is_held());
    assert_eq!(c.handle.phase(), LockPhase::Waiting);
    assert!(!cluster.coordinator.exists(&a_node));

    b.handle.release().unwrap();
    c_thread.join().unwrap().unwrap();
    assert!(c.handle.is_held());

    c.handle.release().unwrap();
    assert_eq!(cluster.queue_len(ROOT), 0);
    assert_eq!(cluster.coordinator.total_armed_watches(), 0);
}

#[test]
fn holder_is_the_lowest_queued_node() {
    let cluster = Cluster::new();
    let holder = cluster.participant(ROOT);
    holder.handle.acquire().unwrap();

    let waiters: Vec<_> = (0..3).map(|_| cluster.participant(ROOT)).collect();
    let threads: Vec<_> = waiters
        .iter()
        .map(|waiter| {
            let handle = Arc::clone(&waiter.handle);
            thread::spawn(move || {
                handle.acquire().unwrap();
                handle.release().unwrap();
            })
        })
        .collect();
    wait_until("all waiters to queue", || cluster.queue_len(ROOT) == 4);

    let order = fairlock::locking::queue_order(&cluster.coordinator.children_of(ROOT)).unwrap();
    assert_eq!(
        Some(path::join(ROOT, &order[0])),
        holder.handle.owned_node()
    );

    holder.handle.release().unwrap();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(cluster.queue_len(ROOT), 0);
}

#[test]
fn protected_nodes_carry_a_guid_and_plain_nodes_do_not() {
    let cluster = Cluster::new();
    let protected = cluster.participant(ROOT);
    protected.handle.acquire().unwrap();
    let name = protected.handle.owned_node().unwrap();
    let name = path::basename(&name);
    assert!(name.starts_with("_c_"));
    assert!(name.ends_with("-lock-0000000000"));
    protected.handle.release().unwrap();

    let plain = cluster.participant_with(
        ROOT,
        fairlock::locking::LockSettings {
            protected_nodes: false,
            ..common::cluster::fast_settings()
        },
    );
    plain.handle.acquire().unwrap();
    assert_eq!(
        plain.handle.owned_node().as_deref(),
        Some("/locks/res1/lock-0000000001")
    );
    assert_eq!(plain.handle.sequence(), Some(1));
}
