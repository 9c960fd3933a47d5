//! Tests for terminal settlement and eviction of finished matches.

use staked_games::{
    MatchCoordinator, MatchStore, MoveRejection, RecordingPayout, SyncConfig, SyncGateway,
    TerminalNotice,
};
use std::sync::Arc;
use std::time::Duration;

const ALICE: &str = "0xAlice";
const BOB: &str = "0xBob";

struct Fixture {
    coordinator: MatchCoordinator,
    gateway: SyncGateway,
    payout: Arc<RecordingPayout>,
}

async fn started_match(id: &str) -> Fixture {
    let payout = Arc::new(RecordingPayout::new());
    let coordinator = MatchCoordinator::new(
        Arc::new(MatchStore::new()),
        payout.clone(),
        &SyncConfig::default(),
    );
    coordinator.create_match(id, ALICE).await.unwrap();
    coordinator.join_match(id, BOB).await.unwrap();
    Fixture {
        gateway: SyncGateway::new(coordinator.clone()),
        coordinator,
        payout,
    }
}

async fn play(gateway: &SyncGateway, id: &str, cells: &[i64]) {
    for (i, cell) in cells.iter().enumerate() {
        let who = if i % 2 == 0 { ALICE } else { BOB };
        gateway.submit(id, *cell, who, None).await.unwrap();
    }
}

#[tokio::test]
async fn test_win_reports_winner_once() {
    let f = started_match("m1").await;
    // O wins the middle column.
    play(&f.gateway, "m1", &[0, 4, 2, 1, 8, 7]).await;

    assert_eq!(
        f.payout.notices(),
        vec![TerminalNotice::new("m1".into(), Some("0xbob".into()))]
    );

    assert_eq!(
        f.gateway.submit("m1", 3, ALICE, None).await,
        Err(MoveRejection::GameAlreadyOver)
    );
    assert!(!f.coordinator.settle("m1").await);
    assert_eq!(f.payout.notices().len(), 1);
    assert!(f.coordinator.snapshot("m1").await.unwrap().reported);
}

#[tokio::test]
async fn test_draw_reports_no_winner() {
    let f = started_match("m1").await;
    play(&f.gateway, "m1", &[0, 1, 2, 3, 5, 4, 6, 8, 7]).await;
    assert_eq!(
        f.payout.notices(),
        vec![TerminalNotice::new("m1".into(), None)]
    );
}

#[tokio::test]
async fn test_unfinished_match_not_settled() {
    let f = started_match("m1").await;
    play(&f.gateway, "m1", &[0, 4]).await;
    assert!(!f.coordinator.settle("m1").await);
    assert!(!f.coordinator.settle("missing").await);
    assert!(f.payout.notices().is_empty());
}

#[tokio::test]
async fn test_concurrent_settle_notifies_once() {
    let f = started_match("m1").await;
    play(&f.gateway, "m1", &[0, 4, 1, 5, 2]).await;

    let attempts = (0..8).map(|_| {
        let coordinator = f.coordinator.clone();
        tokio::spawn(async move { coordinator.settle("m1").await })
    });
    let sent = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    // The winning submit already settled.
    assert_eq!(sent, 0);
    assert_eq!(f.payout.notices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settled_match_evicted_after_grace() {
    let f = started_match("m1").await;
    f.coordinator.create_match("m2", ALICE).await.unwrap();
    play(&f.gateway, "m1", &[0, 4, 1, 5, 2]).await;

    assert_eq!(f.coordinator.evict_settled().await, 0);
    assert_eq!(f.gateway.poll("m1", 0).await.unwrap().count, 5);

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(f.coordinator.evict_settled().await, 1);
    assert_eq!(
        f.gateway.poll("m1", 0).await.unwrap_err(),
        MoveRejection::MatchNotFound
    );
    // Unsettled matches stay.
    assert!(f.coordinator.snapshot("m2").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reaper_sweeps_in_background() {
    let f = started_match("m1").await;
    play(&f.gateway, "m1", &[0, 4, 1, 5, 2]).await;
    let reaper = f.coordinator.spawn_reaper(Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(400)).await;
    assert!(f.coordinator.store().is_empty().await);

    f.coordinator.shutdown();
    reaper.await.unwrap();
}

#[tokio::test]
async fn test_reset_does_not_pay_out_again() {
    let f = started_match("m1").await;
    play(&f.gateway, "m1", &[0, 4, 1, 5, 2]).await;
    f.gateway.reset("m1").await.unwrap();
    assert!(f.coordinator.snapshot("m1").await.unwrap().reported);

    // Replaying the same win on the same id settles nothing new.
    play(&f.gateway, "m1", &[0, 4, 1, 5, 2]).await;
    assert!(!f.coordinator.settle("m1").await);
    assert_eq!(
        f.payout.notices(),
        vec![TerminalNotice::new("m1".into(), Some("0xalice".into()))]
    );
}
