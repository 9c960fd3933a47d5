//! Tests for move submission and polling through the gateway.

use staked_games::{
    MatchCoordinator, MatchError, MatchStore, Mark, MoveRejection, Outcome, Position,
    RecordingPayout, Slot, SyncConfig, SyncGateway, resolve,
};
use std::sync::Arc;

const ALICE: &str = "0xAlice";
const BOB: &str = "0xBob";

async fn started_match(id: &str) -> SyncGateway {
    let coordinator = MatchCoordinator::new(
        Arc::new(MatchStore::new()),
        Arc::new(RecordingPayout::new()),
        &SyncConfig::default(),
    );
    coordinator.create_match(id, ALICE).await.unwrap();
    coordinator.join_match(id, BOB).await.unwrap();
    SyncGateway::new(coordinator)
}

async fn play(gateway: &SyncGateway, id: &str, cells: &[i64]) {
    for (i, cell) in cells.iter().enumerate() {
        let who = if i % 2 == 0 { ALICE } else { BOB };
        gateway.submit(id, *cell, who, None).await.unwrap();
    }
}

#[tokio::test]
async fn test_top_row_win_through_gateway() {
    let gateway = started_match("m1").await;
    play(&gateway, "m1", &[0, 4, 1, 5]).await;
    let receipt = gateway.submit("m1", 2, ALICE, Some(Mark::X)).await.unwrap();
    assert_eq!(receipt.ledger_length, 5);
    assert_eq!(receipt.mark, Mark::X);
    assert_eq!(
        receipt.outcome,
        Outcome::Won {
            mark: Mark::X,
            line: [Position::TopLeft, Position::TopCenter, Position::TopRight],
        }
    );

    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(poll.count, 5);
    assert_eq!(poll.next_mark, None);
    assert!(poll.deadline.is_none());
}

#[tokio::test]
async fn test_full_board_draw_through_gateway() {
    let gateway = started_match("m1").await;
    play(&gateway, "m1", &[0, 1, 2, 3, 5, 4, 6, 8, 7]).await;
    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(poll.outcome, Outcome::Draw);
    assert_eq!(poll.count, 9);
}

#[tokio::test]
async fn test_out_of_turn_move_rejected() {
    let gateway = started_match("m1").await;
    let err = gateway.submit("m1", 4, BOB, None).await.unwrap_err();
    assert_eq!(err, MoveRejection::WrongTurn);
    assert_eq!(err.reason(), "not your turn");
    assert_eq!(gateway.poll("m1", 0).await.unwrap().count, 0);
}

#[tokio::test]
async fn test_occupied_cell_rejected() {
    let gateway = started_match("m1").await;
    play(&gateway, "m1", &[4]).await;
    let err = gateway.submit("m1", 4, BOB, None).await.unwrap_err();
    assert_eq!(err.reason(), "cell taken");
    assert_eq!(gateway.poll("m1", 0).await.unwrap().count, 1);
}

#[tokio::test]
async fn test_out_of_range_rejected_before_lookup() {
    let gateway = started_match("m1").await;
    assert_eq!(
        gateway.submit("m1", 9, ALICE, None).await,
        Err(MoveRejection::InvalidPosition)
    );
    assert_eq!(
        gateway.submit("m1", -1, ALICE, None).await,
        Err(MoveRejection::InvalidPosition)
    );
    assert_eq!(
        gateway.submit("missing", 12, ALICE, None).await,
        Err(MoveRejection::InvalidPosition)
    );
}

#[tokio::test]
async fn test_unknown_player_and_missing_match() {
    let gateway = started_match("m1").await;
    assert_eq!(
        gateway.submit("m1", 0, "0xmallory", None).await,
        Err(MoveRejection::UnknownPlayer)
    );
    assert_eq!(
        gateway.submit("missing", 0, ALICE, None).await,
        Err(MoveRejection::MatchNotFound)
    );
    assert_eq!(
        gateway.poll("missing", 0).await.unwrap_err(),
        MoveRejection::MatchNotFound
    );
}

#[tokio::test]
async fn test_move_before_opponent_joins() {
    let coordinator = MatchCoordinator::new(
        Arc::new(MatchStore::new()),
        Arc::new(RecordingPayout::new()),
        &SyncConfig::default(),
    );
    coordinator.create_match("m1", ALICE).await.unwrap();
    let gateway = SyncGateway::new(coordinator);
    assert_eq!(
        gateway.submit("m1", 0, ALICE, None).await,
        Err(MoveRejection::MatchNotReady)
    );
}

#[tokio::test]
async fn test_address_comparison_ignores_case() {
    let gateway = started_match("m1").await;
    gateway.submit("m1", 0, "  0XALICE ", None).await.unwrap();
    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(poll.moves[0].address(), "0xalice");
}

#[tokio::test]
async fn test_client_hint_does_not_decide_mark() {
    let gateway = started_match("m1").await;
    let receipt = gateway.submit("m1", 0, ALICE, Some(Mark::O)).await.unwrap();
    assert_eq!(receipt.mark, Mark::X);
    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(*poll.moves[0].mark(), Mark::X);
}

#[tokio::test]
async fn test_poll_returns_tail_after_known_length() {
    let gateway = started_match("m1").await;
    play(&gateway, "m1", &[0, 4, 8]).await;

    let poll = gateway.poll("m1", 2).await.unwrap();
    assert_eq!(poll.count, 3);
    assert_eq!(poll.moves.len(), 1);
    assert_eq!(*poll.moves[0].slot(), Slot::Cell(Position::BottomRight));
    assert_eq!(poll.next_mark, Some(Mark::O));

    let caught_up = gateway.poll("m1", 3).await.unwrap();
    assert!(caught_up.moves.is_empty());

    // A client ahead of the server gets the whole ledger back.
    let ahead = gateway.poll("m1", 7).await.unwrap();
    assert_eq!(ahead.moves.len(), 3);
}

#[tokio::test]
async fn test_reset_clears_ledger() {
    let gateway = started_match("m1").await;
    play(&gateway, "m1", &[0, 4]).await;
    assert_eq!(gateway.poll("m1", 0).await.unwrap().epoch, 0);
    gateway.reset("m1").await.unwrap();
    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(poll.count, 0);
    assert_eq!(poll.epoch, 1);
    assert_eq!(poll.next_mark, Some(Mark::X));
    gateway.submit("m1", 4, ALICE, None).await.unwrap();
}

#[tokio::test]
async fn test_join_errors() {
    let coordinator = MatchCoordinator::new(
        Arc::new(MatchStore::new()),
        Arc::new(RecordingPayout::new()),
        &SyncConfig::default(),
    );
    coordinator.create_match("m1", ALICE).await.unwrap();
    assert_eq!(
        coordinator.create_match("m1", BOB).await.unwrap_err(),
        MatchError::MatchExists("m1".into())
    );
    assert_eq!(
        coordinator.join_match("m1", "0xalice").await.unwrap_err(),
        MatchError::SelfPlay
    );
    assert_eq!(
        coordinator.join_match("m1", " ").await.unwrap_err(),
        MatchError::EmptyAddress
    );
    assert_eq!(
        coordinator.join_match("nope", BOB).await.unwrap_err(),
        MatchError::MatchNotFound("nope".into())
    );
    coordinator.join_match("m1", BOB).await.unwrap();
    // Re-joining is harmless.
    coordinator.join_match("m1", BOB).await.unwrap();
    assert_eq!(
        coordinator.join_match("m1", "0xcarol").await.unwrap_err(),
        MatchError::MatchFull("m1".into())
    );
    assert_eq!(
        coordinator.mark_for("m1", "0xBOB").await.unwrap(),
        Some(Mark::O)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_submissions_for_same_slot() {
    for round in 0..50 {
        let id = format!("race-{}", round);
        let gateway = started_match(&id).await;

        let a = {
            let gateway = gateway.clone();
            let id = id.clone();
            tokio::spawn(async move { gateway.submit(&id, 4, ALICE, None).await })
        };
        let b = {
            let gateway = gateway.clone();
            let id = id.clone();
            tokio::spawn(async move { gateway.submit(&id, 0, ALICE, None).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1, "round {}", round);
        let rejected = results.iter().find_map(|r| r.clone().err());
        assert_eq!(rejected, Some(MoveRejection::WrongTurn));
        assert_eq!(gateway.poll(&id, 0).await.unwrap().count, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_ledger_stays_consistent() {
    let gateway = started_match("m1").await;

    let submissions = (0..9i64).flat_map(|cell| {
        [ALICE, BOB].into_iter().map(move |who| (cell, who))
    });
    let tasks = submissions.map(|(cell, who)| {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.submit("m1", cell, who, None).await })
    });
    let results = futures::future::join_all(tasks).await;
    let accepted = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    let poll = gateway.poll("m1", 0).await.unwrap();
    assert_eq!(poll.count, accepted);
    for (i, entry) in poll.moves.iter().enumerate() {
        assert_eq!(*entry.mark(), Mark::for_slot(i));
    }
    let replay = resolve(poll.moves.iter().map(|e| *e.slot())).unwrap();
    assert_eq!(replay.outcome(), poll.outcome);
}
