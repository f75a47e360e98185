//! Integration tests for replicas converging over the in-memory hub.

use std::sync::Arc;
use std::time::Duration;

use lapsync_core::board::Board;
use lapsync_core::clock::{ClockOffset, ManualClock};
use lapsync_core::events::{Event, WatchState, WatchValue};
use lapsync_core::inhibit::SuspendInhibitor;
use lapsync_core::transport::{CatchUpOutcome, HubConfig, MemoryHub, Multiplexer};

const SETTLE: Duration = Duration::from_secs(2);

fn replica(clock: &Arc<ManualClock>, count: usize) -> Board {
    Board::new(
        Multiplexer::new(),
        ClockOffset::new("session", clock.clone()),
        count,
        Arc::new(SuspendInhibitor::default()),
    )
    .unwrap()
}

/// Poll `check` until it holds. Watch values recompute on a background task
/// after remote merges, so a settled hub is not quite enough.
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

fn same_state(boards: &[&Board], count: usize) -> bool {
    (0..count).all(|i| {
        let first = boards[0].state(i).unwrap();
        boards.iter().all(|b| b.state(i).unwrap() == first)
    })
}

#[tokio::test]
async fn test_toggle_propagates_to_peer() {
    let clock = ManualClock::new(100.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 2);
    let b = replica(&clock, 2);
    hub.join(a.multiplexer()).unwrap();
    hub.join(b.multiplexer()).unwrap();
    assert!(hub.settle(SETTLE).await);

    a.toggle(0).unwrap();
    assert!(hub.settle(SETTLE).await);
    eventually(|| b.state(0).unwrap() == WatchValue::running(100.0)).await;

    clock.advance(3.0);
    b.toggle(0).unwrap();
    assert!(hub.settle(SETTLE).await);
    eventually(|| a.state(0).unwrap() == WatchValue::paused(3.0)).await;
    assert_eq!(b.state(1).unwrap().state, WatchState::Paused);
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let clock = ManualClock::new(10.0);
    let hub = MemoryHub::default();
    let boards: Vec<Board> = (0..3).map(|_| replica(&clock, 3)).collect();
    for board in &boards {
        hub.join(board.multiplexer()).unwrap();
    }
    assert!(hub.settle(SETTLE).await);

    boards[0].toggle(0).unwrap();
    clock.advance(0.5);
    boards[1].toggle(1).unwrap();
    boards[2].toggle(0).unwrap();
    boards[2].rename(2, "Third").unwrap();
    clock.advance(0.25);
    boards[1].rename(2, "Second").unwrap();
    boards[0].mark(0).unwrap();
    boards[1].mark(0).unwrap();

    assert!(hub.settle(SETTLE).await);
    let refs: Vec<&Board> = boards.iter().collect();
    eventually(|| same_state(&refs, 3)).await;

    for board in &boards {
        assert_eq!(board.name(2).unwrap(), "Second");
        assert_eq!(board.marks(0).unwrap(), boards[0].marks(0).unwrap());
        assert_eq!(board.watch(0).unwrap().events().len(), 2);
    }
}

#[tokio::test]
async fn test_duplicate_delivery_is_harmless() {
    let clock = ManualClock::new(0.0);
    let hub = MemoryHub::new(HubConfig {
        duplicate_delivery: true,
        ..HubConfig::default()
    });
    let a = replica(&clock, 1);
    let b = replica(&clock, 1);
    hub.join(a.multiplexer()).unwrap();
    hub.join(b.multiplexer()).unwrap();

    a.start(0).unwrap();
    clock.advance(2.0);
    a.mark(0).unwrap();
    clock.advance(1.0);
    a.stop(0).unwrap();
    assert!(hub.settle(SETTLE).await);

    eventually(|| b.state(0).unwrap() == WatchValue::paused(3.0)).await;
    assert_eq!(b.marks(0).unwrap(), vec![2.0]);
    assert_eq!(b.watch(0).unwrap().events().len(), 2);
}

#[tokio::test]
async fn test_partition_then_catch_up() {
    let clock = ManualClock::new(50.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 2);
    let b = replica(&clock, 2);
    hub.join(a.multiplexer()).unwrap();
    hub.join(b.multiplexer()).unwrap();
    assert!(hub.settle(SETTLE).await);

    let (pa, pb) = (a.multiplexer().peer_id(), b.multiplexer().peer_id());
    hub.partition(pa, pb);

    a.start(0).unwrap();
    b.rename(1, "Split").unwrap();
    assert!(hub.settle(SETTLE).await);
    assert_eq!(b.state(0).unwrap(), WatchValue::default());
    assert_eq!(a.name(1).unwrap(), "Stopwatch 2");
    assert!(hub.stats().blocked_by_partition > 0);

    hub.heal(pa, pb);
    assert_eq!(
        a.multiplexer().request_catch_up(SETTLE).await,
        CatchUpOutcome::Responded
    );
    assert_eq!(
        b.multiplexer().request_catch_up(SETTLE).await,
        CatchUpOutcome::Responded
    );
    assert!(hub.settle(SETTLE).await);

    eventually(|| same_state(&[&a, &b], 2)).await;
    assert_eq!(b.state(0).unwrap(), WatchValue::running(50.0));
    assert_eq!(a.name(1).unwrap(), "Split");
}

#[tokio::test]
async fn test_compacting_both_sides_of_a_partition_converges() {
    let clock = ManualClock::new(0.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 1);
    let b = replica(&clock, 1);
    hub.join(a.multiplexer()).unwrap();
    hub.join(b.multiplexer()).unwrap();
    assert!(hub.settle(SETTLE).await);

    let (pa, pb) = (a.multiplexer().peer_id(), b.multiplexer().peer_id());
    hub.partition(pa, pb);

    // Both sides fold up to the same last event but from different logs.
    let left = a.watch(0).unwrap();
    left.add_event(Event::run(10.0)).unwrap();
    left.add_event(Event::pause(20.0)).unwrap();
    let right = b.watch(0).unwrap();
    right.add_event(Event::pause(20.0)).unwrap();
    assert!(left.compact());
    assert!(right.compact());
    assert_eq!(left.base().score, right.base().score);
    assert_ne!(left.base().value, right.base().value);
    assert!(hub.settle(SETTLE).await);

    hub.heal(pa, pb);
    assert_eq!(
        a.multiplexer().request_catch_up(SETTLE).await,
        CatchUpOutcome::Responded
    );
    assert_eq!(
        b.multiplexer().request_catch_up(SETTLE).await,
        CatchUpOutcome::Responded
    );
    assert!(hub.settle(SETTLE).await);

    eventually(|| same_state(&[&a, &b], 1)).await;
    assert_eq!(left.events(), right.events());
    assert_eq!(left.base(), right.base());
    assert_eq!(a.state(0).unwrap(), WatchValue::paused(10.0));
}

#[tokio::test]
async fn test_late_joiner_receives_snapshots() {
    let clock = ManualClock::new(5.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 2);
    hub.join(a.multiplexer()).unwrap();

    a.start(1).unwrap();
    clock.advance(4.0);
    a.mark(1).unwrap();
    a.rename(0, "Early").unwrap();
    a.watch(1).unwrap().compact();
    assert!(hub.settle(SETTLE).await);

    let late = replica(&clock, 2);
    hub.join(late.multiplexer()).unwrap();
    assert!(hub.settle(SETTLE).await);

    eventually(|| same_state(&[&a, &late], 2)).await;
    assert_eq!(late.name(0).unwrap(), "Early");
    assert_eq!(late.marks(1).unwrap(), vec![4.0]);
    assert_eq!(late.elapsed(1).unwrap(), 4.0);
    assert_eq!(late.watch(1).unwrap().base(), a.watch(1).unwrap().base());
}

#[tokio::test]
async fn test_catch_up_alone_gets_no_response() {
    let clock = ManualClock::new(0.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 1);
    hub.join(a.multiplexer()).unwrap();

    let outcome = a
        .multiplexer()
        .request_catch_up(Duration::from_millis(50))
        .await;
    assert_eq!(outcome, CatchUpOutcome::NoResponse);

    let empty = Multiplexer::new();
    assert_eq!(
        empty.request_catch_up(Duration::from_millis(10)).await,
        CatchUpOutcome::NothingToSync
    );
}

#[tokio::test]
async fn test_left_replica_stops_receiving() {
    let clock = ManualClock::new(0.0);
    let hub = MemoryHub::default();
    let a = replica(&clock, 1);
    let b = replica(&clock, 1);
    hub.join(a.multiplexer()).unwrap();
    hub.join(b.multiplexer()).unwrap();
    assert!(hub.settle(SETTLE).await);

    assert!(hub.leave(b.multiplexer().peer_id()));
    assert!(!b.multiplexer().is_attached());
    a.rename(0, "Gone").unwrap();
    assert!(hub.settle(SETTLE).await);

    assert_eq!(b.name(0).unwrap(), "Stopwatch 1");
    assert_eq!(hub.members(), vec![a.multiplexer().peer_id()]);
}
