//! Integration tests for saving a board and bringing it back.

use std::sync::Arc;

use lapsync_core::board::Board;
use lapsync_core::clock::{ClockOffset, ManualClock};
use lapsync_core::events::WatchValue;
use lapsync_core::inhibit::SuspendInhibitor;
use lapsync_core::persistence::{JsonFilePersistence, Persistence};
use lapsync_core::transport::Multiplexer;

fn board(clock: &Arc<ManualClock>, count: usize) -> (Board, Arc<SuspendInhibitor>) {
    let inhibitor = Arc::new(SuspendInhibitor::default());
    let board = Board::new(
        Multiplexer::new(),
        ClockOffset::new("checkpoint", clock.clone()),
        count,
        inhibitor.clone(),
    )
    .unwrap();
    (board, inhibitor)
}

#[tokio::test]
async fn test_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFilePersistence::new(dir.path().join("lapsync.json"));
    let clock = ManualClock::new(1_000.0);

    let (original, _) = board(&clock, 3);
    original.rename(2, "Cooldown").unwrap();
    original.start(0).unwrap();
    clock.advance(12.5);
    original.mark(0).unwrap();
    original.start(2).unwrap();
    clock.advance(0.5);
    original.stop(2).unwrap();
    original.select(2).unwrap();
    store.save(&original.checkpoint()).await.unwrap();

    let loaded = store.load().await.unwrap().expect("checkpoint saved");
    let (restored, inhibitor) = board(&clock, 3);
    restored.restore(&loaded).unwrap();

    for i in 0..3 {
        assert_eq!(restored.state(i).unwrap(), original.state(i).unwrap());
        assert_eq!(restored.name(i).unwrap(), original.name(i).unwrap());
        assert_eq!(restored.marks(i).unwrap(), original.marks(i).unwrap());
    }
    assert_eq!(restored.selected(), 2);
    assert_eq!(restored.elapsed(0).unwrap(), 13.0);
    assert_eq!(restored.state(2).unwrap(), WatchValue::paused(0.5));
    assert_eq!(inhibitor.holders(), 1);
}

#[tokio::test]
async fn test_untouched_board_restores_to_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFilePersistence::new(dir.path().join("fresh.json"));
    let clock = ManualClock::new(0.0);

    let (fresh, _) = board(&clock, 2);
    store.save(&fresh.checkpoint()).await.unwrap();
    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded.states[0].last_update_time, f64::NEG_INFINITY);

    let (restored, inhibitor) = board(&clock, 2);
    restored.restore(&loaded).unwrap();
    assert_eq!(restored.state(0).unwrap(), WatchValue::default());
    assert!(!inhibitor.is_active());
}

#[tokio::test]
async fn test_restore_under_newer_local_events() {
    let clock = ManualClock::new(10.0);
    let (saved_from, _) = board(&clock, 1);
    saved_from.start(0).unwrap();
    let stale = saved_from.checkpoint();

    clock.advance(5.0);
    let (target, _) = board(&clock, 1);
    target.start(0).unwrap();
    clock.advance(1.0);
    target.stop(0).unwrap();

    target.restore(&stale).unwrap();
    // Events after the base's score still replay on top of it.
    assert_eq!(target.watch(0).unwrap().base().score, 10.0);
    assert_eq!(target.state(0).unwrap(), WatchValue::paused(6.0));
}

#[tokio::test]
async fn test_restore_into_smaller_board() {
    let clock = ManualClock::new(0.0);
    let (big, _) = board(&clock, 4);
    big.rename(0, "Kept").unwrap();
    big.rename(3, "Lost").unwrap();
    big.select(3).unwrap();
    let checkpoint = big.checkpoint();

    let (small, _) = board(&clock, 2);
    small.restore(&checkpoint).unwrap();
    assert_eq!(small.name(0).unwrap(), "Kept");
    assert_eq!(small.watch_count(), 2);
    assert_eq!(small.selected(), 0);
}
