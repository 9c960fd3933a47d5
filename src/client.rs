//! HTTP client for the gateway and the client-side reconciliation view.
//!
//! [`LocalView`] holds what a client shows. A move the player just made is
//! kept as a provisional overlay until the next successful poll, which
//! replaces the view with the server's ledger. A rejected submission drops
//! the overlay and forces a full re-fetch. The server is always right.

use reqwest::StatusCode;
use staked_tictactoe::{Board, Mark, Outcome, Position, Square, resolve};
use std::time::Duration;
use strum::IntoEnumIterator;
use tracing::{debug, info, instrument, warn};

use crate::error::{ClientError, MoveRejection};
use crate::gateway::PollResponse;
use crate::ledger::LedgerEntry;
use crate::server::{JoinMatchRequest, SubmitMoveRequest, SubmitMoveResponse};
use crate::store::MatchSummary;

impl MoveRejection {
    /// Parses a reason string produced by [`MoveRejection::reason`].
    pub fn from_reason(reason: &str) -> Option<Self> {
        MoveRejection::iter().find(|r| r.reason() == reason)
    }
}

/// HTTP client bound to one match and one address.
#[derive(Debug, Clone)]
pub struct MatchClient {
    base_url: String,
    client: reqwest::Client,
    match_id: String,
    address: String,
}

impl MatchClient {
    /// Creates a client.
    pub fn new(base_url: impl Into<String>, match_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            match_id: match_id.into(),
            address: address.into(),
        }
    }

    fn match_url(&self) -> String {
        format!("{}/api/matches/{}", self.base_url, self.match_id)
    }

    /// Fetches the match snapshot.
    #[instrument(skip(self), fields(match_id = %self.match_id))]
    pub async fn summary(&self) -> Result<MatchSummary, ClientError> {
        let response = self.client.get(self.match_url()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::Rejected(MoveRejection::MatchNotFound)),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(ClientError::Status(status.as_u16())),
        }
    }

    /// Joins the match as the opponent.
    #[instrument(skip(self), fields(match_id = %self.match_id, address = %self.address))]
    pub async fn join(&self) -> Result<MatchSummary, ClientError> {
        let response = self
            .client
            .post(format!("{}/join", self.match_url()))
            .json(&JoinMatchRequest {
                address: self.address.clone(),
            })
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::Rejected(MoveRejection::MatchNotFound)),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(ClientError::Status(status.as_u16())),
        }
    }

    /// Polls entries after `known_length`.
    #[instrument(skip(self), fields(match_id = %self.match_id), level = "debug")]
    pub async fn poll(&self, known_length: usize) -> Result<PollResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/moves?known_length={}", self.match_url(), known_length))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::Rejected(MoveRejection::MatchNotFound)),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(ClientError::Status(status.as_u16())),
        }
    }

    /// Submits a move. Rejections come back as [`ClientError::Rejected`].
    #[instrument(skip(self), fields(match_id = %self.match_id, address = %self.address))]
    pub async fn submit(&self, cell_index: i64, hint: Option<Mark>) -> Result<usize, ClientError> {
        let response = self
            .client
            .post(format!("{}/moves", self.match_url()))
            .json(&SubmitMoveRequest {
                cell_index: cell_index.into(),
                address: self.address.clone(),
                player: hint,
            })
            .send()
            .await?;
        let status = response.status();
        let body: SubmitMoveResponse = response.json().await.map_err(|e| {
            warn!(%status, error = %e, "Unreadable submit response");
            ClientError::Status(status.as_u16())
        })?;
        match (body.accepted, body.ledger_length) {
            (true, Some(len)) => Ok(len),
            _ => {
                let reason = body.reason.unwrap_or_default();
                let rejection = MoveRejection::from_reason(&reason)
                    .ok_or(ClientError::Status(status.as_u16()))?;
                Err(ClientError::Rejected(rejection))
            }
        }
    }
}

/// Lists matches on `base_url` still waiting for an opponent.
#[instrument]
pub async fn fetch_open_matches(base_url: &str) -> Result<Vec<MatchSummary>, ClientError> {
    let url = format!("{}/api/matches", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    match response.status() {
        status if status.is_success() => Ok(response.json().await?),
        status => Err(ClientError::Status(status.as_u16())),
    }
}

/// A client's view of one match.
#[derive(Debug, Clone)]
pub struct LocalView {
    my_mark: Mark,
    entries: Vec<LedgerEntry>,
    board: Board,
    outcome: Outcome,
    next_mark: Mark,
    epoch: u64,
    pending: Option<Position>,
    stale: bool,
}

impl LocalView {
    /// Empty view for the participant playing `my_mark`.
    pub fn new(my_mark: Mark) -> Self {
        Self {
            my_mark,
            entries: Vec::new(),
            board: Board::new(),
            outcome: Outcome::InProgress,
            next_mark: Mark::X,
            epoch: 0,
            pending: None,
            stale: false,
        }
    }

    /// Length to send as `known_length` on the next poll.
    ///
    /// Zero after a rollback or a desync, asking for the whole ledger.
    pub fn known_length(&self) -> usize {
        if self.stale { 0 } else { self.entries.len() }
    }

    /// Whether the local player owns the current turn, counting the
    /// provisional move.
    pub fn is_my_turn(&self) -> bool {
        self.pending.is_none() && !self.outcome.is_terminal() && self.next_mark == self.my_mark
    }

    /// Applies the player's own move provisionally.
    ///
    /// Fails with the rejection the server would give when the local view
    /// already rules the move out.
    #[instrument(skip(self))]
    pub fn apply_optimistic(&mut self, pos: Position) -> Result<(), MoveRejection> {
        let refused = if self.outcome.is_terminal() {
            Some(MoveRejection::GameAlreadyOver)
        } else if !self.board.is_empty(pos) {
            Some(MoveRejection::PositionTaken)
        } else if !self.is_my_turn() {
            Some(MoveRejection::WrongTurn)
        } else {
            None
        };
        if let Some(rejection) = refused {
            debug!(%rejection, "Optimistic move refused locally");
            return Err(rejection);
        }
        self.pending = Some(pos);
        Ok(())
    }

    /// Drops the provisional move after a rejected submission.
    pub fn rollback(&mut self) {
        if let Some(pos) = self.pending.take() {
            info!(position = %pos, "Provisional move rolled back");
        }
        self.stale = true;
    }

    /// Replaces the view with the server's ledger.
    ///
    /// `requested_from` is the `known_length` the poll was sent with. A
    /// partial response only extends the view when it comes from the same
    /// ledger epoch; after a server reset the view asks for a full copy.
    /// Returns `true` if the authoritative state changed what is shown.
    #[instrument(skip(self, response), fields(count = response.count, epoch = response.epoch))]
    pub fn reconcile(&mut self, requested_from: usize, response: &PollResponse) -> bool {
        let before = (self.board(), self.outcome);

        let mut entries = if response.moves.len() == response.count {
            Vec::new()
        } else if response.epoch == self.epoch
            && requested_from <= self.entries.len()
            && requested_from + response.moves.len() == response.count
        {
            self.entries[..requested_from].to_vec()
        } else {
            warn!("Poll does not extend local ledger, requesting full copy");
            self.pending = None;
            self.stale = true;
            return true;
        };
        entries.extend(response.moves.iter().cloned());

        match resolve(entries.iter().map(|e| *e.slot())) {
            Ok(resolution) => {
                self.board = resolution.board().clone();
                self.outcome = resolution.outcome();
                self.next_mark = resolution.next_mark();
                self.entries = entries;
                self.epoch = response.epoch;
                self.stale = false;
            }
            Err(e) => {
                warn!(error = %e, "Server ledger did not resolve, requesting full copy");
                self.stale = true;
            }
        }
        self.pending = None;

        before != (self.board(), self.outcome)
    }

    /// Board to render: authoritative squares plus any provisional move.
    pub fn board(&self) -> Board {
        let mut board = self.board.clone();
        if let Some(pos) = self.pending {
            board.set(pos, Square::Occupied(self.my_mark));
        }
        board
    }

    /// Authoritative outcome as of the last poll.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The provisional move, if any.
    pub fn pending(&self) -> Option<Position> {
        self.pending
    }

    /// Entries confirmed by the server.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

/// Polls one round and folds the response into `view`.
pub async fn sync_once(client: &MatchClient, view: &mut LocalView) -> Result<bool, ClientError> {
    let from = view.known_length();
    let response = client.poll(from).await?;
    Ok(view.reconcile(from, &response))
}

/// Submits a move with an optimistic local update.
///
/// A move the local view refuses is checked again after one poll and never
/// submitted if it is still refused. On a server rejection the provisional
/// move is rolled back and the view is re-fetched before the rejection is
/// returned.
#[instrument(skip(client, view))]
pub async fn play_move(
    client: &MatchClient,
    view: &mut LocalView,
    pos: Position,
) -> Result<usize, ClientError> {
    if view.apply_optimistic(pos).is_err() {
        sync_once(client, view).await?;
        view.apply_optimistic(pos).map_err(|rejection| {
            warn!(%rejection, "Move refused locally, not submitted");
            ClientError::Rejected(rejection)
        })?;
    }
    match client.submit(pos.to_index() as i64, Some(view.my_mark)).await {
        Ok(len) => {
            sync_once(client, view).await?;
            Ok(len)
        }
        Err(e) => {
            warn!(error = %e, "Move not accepted");
            view.rollback();
            sync_once(client, view).await?;
            Err(e)
        }
    }
}

/// Polls until the match ends, printing the board on each change.
///
/// Returns the final outcome, or `MatchNotFound` when the match is gone.
#[instrument(skip(client, view))]
pub async fn watch(
    client: &MatchClient,
    view: &mut LocalView,
    interval: Duration,
) -> Result<Outcome, ClientError> {
    loop {
        match sync_once(client, view).await {
            Ok(changed) => {
                if changed {
                    println!("{}\n", view.board().display());
                }
                if view.outcome().is_terminal() {
                    return Ok(view.outcome());
                }
            }
            Err(ClientError::Rejected(MoveRejection::MatchNotFound)) => {
                warn!("Match unavailable");
                return Err(ClientError::Rejected(MoveRejection::MatchNotFound));
            }
            Err(e) => warn!(error = %e, "Poll failed, retrying"),
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MoveLedger, Seats};
    use chrono::Utc;

    fn fill(ledger: &mut MoveLedger, cells: &[i64]) {
        let mut seats = Seats::new("0xa");
        seats.bind_opponent("0xb");
        for (i, cell) in cells.iter().enumerate() {
            let who = if i % 2 == 0 { "0xa" } else { "0xb" };
            ledger
                .propose(Position::from_index(*cell).unwrap(), who, &seats, Utc::now())
                .unwrap();
        }
    }

    fn server_ledger(cells: &[i64]) -> MoveLedger {
        let mut ledger = MoveLedger::new();
        fill(&mut ledger, cells);
        ledger
    }

    fn poll_from(ledger: &MoveLedger, known: usize) -> PollResponse {
        let res = ledger.resolution();
        PollResponse {
            moves: ledger.tail(known).to_vec(),
            count: ledger.len(),
            epoch: ledger.epoch(),
            outcome: res.outcome(),
            next_mark: Some(res.next_mark()),
            deadline: None,
        }
    }

    #[test]
    fn test_optimistic_move_is_overlaid_until_poll() {
        let mut view = LocalView::new(Mark::X);
        assert!(view.apply_optimistic(Position::Center).is_ok());
        assert_eq!(view.board().get(Position::Center), Square::Occupied(Mark::X));
        assert!(!view.is_my_turn());

        let ledger = server_ledger(&[4]);
        view.reconcile(0, &poll_from(&ledger, 0));
        assert_eq!(view.pending(), None);
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.board().get(Position::Center), Square::Occupied(Mark::X));
    }

    #[test]
    fn test_server_truth_discards_disagreeing_guess() {
        let mut view = LocalView::new(Mark::X);
        view.apply_optimistic(Position::Center).unwrap();
        // The server recorded a different cell for X.
        let ledger = server_ledger(&[0]);
        assert!(view.reconcile(0, &poll_from(&ledger, 0)));
        assert!(view.board().is_empty(Position::Center));
        assert_eq!(view.board().get(Position::TopLeft), Square::Occupied(Mark::X));
    }

    #[test]
    fn test_rollback_forces_full_refetch() {
        let mut view = LocalView::new(Mark::O);
        let ledger = server_ledger(&[0]);
        view.reconcile(0, &poll_from(&ledger, 0));
        assert!(view.apply_optimistic(Position::Center).is_ok());
        view.rollback();
        assert_eq!(view.pending(), None);
        assert_eq!(view.known_length(), 0);
        assert!(view.board().is_empty(Position::Center));
    }

    #[test]
    fn test_incremental_poll_extends_entries() {
        let mut view = LocalView::new(Mark::O);
        let ledger = server_ledger(&[0, 4, 8]);
        view.reconcile(0, &poll_from(&server_ledger(&[0]), 0));
        assert_eq!(view.known_length(), 1);
        view.reconcile(1, &poll_from(&ledger, 1));
        assert_eq!(view.entries().len(), 3);
        assert!(view.is_my_turn());
    }

    #[test]
    fn test_gap_marks_view_stale() {
        let mut view = LocalView::new(Mark::O);
        let ledger = server_ledger(&[0, 4, 8]);
        // Claims to start at 2 while the view holds nothing.
        view.reconcile(2, &poll_from(&ledger, 2));
        assert_eq!(view.known_length(), 0);
    }

    #[test]
    fn test_reset_to_same_length_converges() {
        let mut view = LocalView::new(Mark::X);
        let mut ledger = server_ledger(&[0, 4, 8]);
        view.reconcile(0, &poll_from(&ledger, 0));

        ledger.reset();
        fill(&mut ledger, &[1, 2, 3]);

        // Same length, empty tail, new epoch: the view must not keep its copy.
        let from = view.known_length();
        view.reconcile(from, &poll_from(&ledger, from));
        assert_eq!(view.known_length(), 0);

        view.reconcile(0, &poll_from(&ledger, 0));
        assert_eq!(view.board(), ledger.resolution().board().clone());
        assert_eq!(view.known_length(), 3);
    }

    #[test]
    fn test_local_refusals_match_server_reasons() {
        let mut view = LocalView::new(Mark::O);
        assert_eq!(
            view.apply_optimistic(Position::Center),
            Err(MoveRejection::WrongTurn)
        );

        view.reconcile(0, &poll_from(&server_ledger(&[4]), 0));
        assert_eq!(
            view.apply_optimistic(Position::Center),
            Err(MoveRejection::PositionTaken)
        );

        let won = server_ledger(&[0, 4, 1, 5, 2]);
        view.reconcile(0, &poll_from(&won, 0));
        assert_eq!(
            view.apply_optimistic(Position::BottomRight),
            Err(MoveRejection::GameAlreadyOver)
        );
        assert_eq!(view.pending(), None);
    }

    #[test]
    fn test_reason_parsing() {
        assert_eq!(
            MoveRejection::from_reason("not your turn"),
            Some(MoveRejection::WrongTurn)
        );
        assert_eq!(MoveRejection::from_reason("nope"), None);
    }
}
