//! Integration tests for the priority command queue
//!
//! REQUIREMENTS:
//!   - THE SYSTEM SHALL dequeue by priority first, then by arrival
//!   - WHEN producers enqueue concurrently, sequence numbers SHALL be unique and gap-free
//!   - THE SYSTEM SHALL deliver each enqueued command exactly once to consumers

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::doc_markdown)]

use std::{collections::BTreeSet, thread};

use burrow_core::{
    queue::{entry_name, Priority},
    Burrow, Config,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Burrow {
    let mut config = Config::with_root(dir.path());
    config.lock.timeout_ms = 20_000;
    config.lock.retry_interval_ms = 2;
    Burrow::open(config).expect("open coordination root")
}

fn drain(burrow: &Burrow, agent: &str) -> Vec<String> {
    std::iter::from_fn(|| burrow.queue().dequeue(agent).unwrap())
        .map(|command| command.command)
        .collect()
}

/// GIVEN: commands enqueued as low, high, normal
/// WHEN: the queue is drained
/// THEN: they come out high, normal, low
#[test]
fn test_priority_order() {
    let dir = TempDir::new().unwrap();
    let burrow = open(&dir);
    let queue = burrow.queue();
    queue.enqueue("agent-1", "low", Priority::Low).unwrap();
    queue.enqueue("agent-1", "high", Priority::High).unwrap();
    queue.enqueue("agent-1", "normal", Priority::Normal).unwrap();

    assert_eq!(drain(&burrow, "agent-1"), vec!["high", "normal", "low"]);
    assert_eq!(queue.status("agent-1").unwrap().total, 0);
}

/// GIVEN: 10 producer threads
/// WHEN: each enqueues 10 commands to the same agent
/// THEN: the assigned sequences are exactly 1..=100
#[test]
fn test_concurrent_producers_get_gap_free_sequences() {
    let dir = TempDir::new().unwrap();
    let burrow = open(&dir);
    burrow.queue().init("busy-agent").unwrap();

    let handles: Vec<_> = (0..10)
        .map(|producer| {
            let queue = burrow.queue().clone();
            thread::spawn(move || {
                (0..10)
                    .map(|n| {
                        queue
                            .enqueue("busy-agent", format!("p{producer}-{n}"), Priority::Normal)
                            .unwrap()
                            .sequence
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let sequences: Vec<u64> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let unique: BTreeSet<u64> = sequences.iter().copied().collect();
    assert_eq!(sequences.len(), 100);
    assert_eq!(unique, (1..=100).collect::<BTreeSet<u64>>());
    assert_eq!(burrow.queue().sequence("busy-agent").unwrap(), 100);
    assert_eq!(burrow.queue().status("busy-agent").unwrap().normal, 100);
}

/// GIVEN: producers and consumers running at once
/// WHEN: all commands have been consumed
/// THEN: every command was delivered exactly once
#[test]
fn test_concurrent_consumers_receive_each_command_once() {
    let dir = TempDir::new().unwrap();
    let burrow = open(&dir);
    for n in 0..60 {
        burrow
            .queue()
            .enqueue("shared", format!("cmd-{n}"), Priority::Normal)
            .unwrap();
    }

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = burrow.queue().clone();
            thread::spawn(move || {
                std::iter::from_fn(|| queue.dequeue("shared").unwrap())
                    .map(|command| command.command)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let delivered: Vec<String> = consumers
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let unique: BTreeSet<&String> = delivered.iter().collect();
    assert_eq!(delivered.len(), 60);
    assert_eq!(unique.len(), 60);
}

/// GIVEN: queues for several agents
/// WHEN: listing agents
/// THEN: only initialised queues are reported, sorted
#[test]
fn test_agents_lists_initialised_queues() {
    let dir = TempDir::new().unwrap();
    let burrow = open(&dir);
    burrow.queue().init("zeta").unwrap();
    burrow
        .queue()
        .enqueue("alpha", "hello", Priority::Low)
        .unwrap();
    std::fs::create_dir_all(burrow.queue().queue_dir().join("stray")).unwrap();

    assert_eq!(burrow.queue().agents().unwrap(), vec!["alpha", "zeta"]);
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low)
    ]
}

proptest! {
    /// Entry names sort exactly like (priority, sequence).
    #[test]
    fn prop_entry_names_sort_in_dequeue_order(
        a in (priority(), 0u64..10_000_000_000),
        b in (priority(), 0u64..10_000_000_000),
    ) {
        let by_name = entry_name(a.0, a.1).cmp(&entry_name(b.0, b.1));
        prop_assert_eq!(by_name, a.cmp(&b));
    }

    /// Whatever the enqueue order, draining yields priority then arrival order.
    #[test]
    fn prop_drain_order_matches_stable_sort(
        priorities in proptest::collection::vec(priority(), 1..12)
    ) {
        let dir = TempDir::new().unwrap();
        let burrow = open(&dir);
        for (i, p) in priorities.iter().enumerate() {
            burrow.queue().enqueue("prop", format!("{i}"), *p).unwrap();
        }

        let mut expected: Vec<(Priority, usize)> =
            priorities.iter().copied().zip(0..).collect();
        expected.sort();
        let expected: Vec<String> = expected.into_iter().map(|(_, i)| i.to_string()).collect();
        prop_assert_eq!(drain(&burrow, "prop"), expected);
    }
}
