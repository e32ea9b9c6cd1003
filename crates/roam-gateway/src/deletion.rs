//! Board deletion by owner quorum.
//!
//! The first owner vote on a board opens a vote with a frozen threshold of
//! `ceil(0.75 * owners)`. A background task ticks once per `VoteConfig::tick`
//! and also wakes on every admitted vote. When the distinct voter count
//! reaches the threshold the task broadcasts `BOARD_DELETE` and runs the
//! cascade; after `budget_ticks` without quorum the vote is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use roam_db::Database;
use roam_types::events::GatewayEvent;
use roam_types::models::Snowflake;

use crate::blocking;
use crate::config::VoteConfig;
use crate::registry::SessionRegistry;

/// Votes needed out of `owners`: ceil(0.75 * owners).
pub fn threshold(owners: usize) -> usize {
    (3 * owners).div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteProgress {
    pub votes: usize,
    pub required: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Executed,
    Expired,
}

struct VoteState {
    voters: HashSet<Snowflake>,
    required: usize,
    ticks: u32,
    phase: Phase,
}

impl VoteState {
    fn progress(&self) -> VoteProgress {
        VoteProgress {
            votes: self.voters.len(),
            required: self.required,
        }
    }
}

struct VoteTimer {
    state: Mutex<VoteState>,
    wake: Notify,
}

impl VoteTimer {
    /// Add `voter` while the vote is open. A vote that reached quorum keeps
    /// reporting its final tally until the cascade is done; `None` once it
    /// expired.
    async fn admit(&self, voter: Snowflake) -> Option<VoteProgress> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Collecting => {
                if state.voters.insert(voter) {
                    self.wake.notify_one();
                }
                Some(state.progress())
            }
            Phase::Executed => Some(state.progress()),
            Phase::Expired => None,
        }
    }
}

/// Open deletion votes, one per board.
#[derive(Clone)]
pub struct DeletionVotes {
    inner: Arc<VotesInner>,
}

struct VotesInner {
    timers: Mutex<HashMap<Snowflake, Arc<VoteTimer>>>,
    db: Arc<Database>,
    registry: SessionRegistry,
    config: VoteConfig,
}

impl DeletionVotes {
    pub fn new(db: Arc<Database>, registry: SessionRegistry, config: VoteConfig) -> Self {
        Self {
            inner: Arc::new(VotesInner {
                timers: Mutex::new(HashMap::new()),
                db,
                registry,
                config,
            }),
        }
    }

    /// Record `voter`'s vote to delete `board_id`. The caller has already
    /// checked that `voter` holds the Owner role.
    pub async fn vote(&self, board_id: Snowflake, voter: Snowflake) -> anyhow::Result<VoteProgress> {
        let owners = blocking(&self.inner.db, move |db| db.owner_ids(board_id)).await?.len();
        let mut timers = self.inner.timers.lock().await;

        if let Some(timer) = timers.get(&board_id) {
            if let Some(progress) = timer.admit(voter).await {
                debug!("Delete vote for board {}: {}/{}", board_id, progress.votes, progress.required);
                return Ok(progress);
            }
        }

        let state = VoteState {
            voters: HashSet::from([voter]),
            required: threshold(owners).max(1),
            ticks: 0,
            phase: Phase::Collecting,
        };
        let progress = state.progress();
        let timer = Arc::new(VoteTimer {
            state: Mutex::new(state),
            wake: Notify::new(),
        });
        timer.wake.notify_one();
        timers.insert(board_id, timer.clone());

        info!(
            "Delete vote opened for board {} by {} ({} of {} owners needed)",
            board_id, voter, progress.required, owners
        );
        tokio::spawn(self.inner.clone().run(board_id, timer));
        Ok(progress)
    }

    /// Progress of the open vote on `board_id`, if any.
    pub async fn progress(&self, board_id: Snowflake) -> Option<VoteProgress> {
        let timer = self.inner.timers.lock().await.get(&board_id).cloned()?;
        let state = timer.state.lock().await;
        (state.phase == Phase::Collecting).then(|| state.progress())
    }
}

impl VotesInner {
    /// The only place a vote ends. Votes only ever get admitted while
    /// `Collecting`, so deciding under the state lock serializes the cascade.
    async fn run(self: Arc<Self>, board_id: Snowflake, timer: Arc<VoteTimer>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let phase = loop {
            let ticked = tokio::select! {
                _ = ticker.tick() => true,
                _ = timer.wake.notified() => false,
            };

            let mut state = timer.state.lock().await;
            if ticked {
                state.ticks += 1;
            }
            if state.voters.len() >= state.required {
                state.phase = Phase::Executed;
                break Phase::Executed;
            }
            if state.ticks >= self.config.budget_ticks {
                state.phase = Phase::Expired;
                break Phase::Expired;
            }
        };

        match phase {
            Phase::Executed => self.execute(board_id).await,
            _ => info!("Delete vote for board {} expired without quorum", board_id),
        }

        // An executed vote stays registered until the cascade is done.
        let mut timers = self.timers.lock().await;
        if timers.get(&board_id).is_some_and(|t| Arc::ptr_eq(t, &timer)) {
            timers.remove(&board_id);
        }
    }

    async fn execute(&self, board_id: Snowflake) {
        let subscribers = match blocking(&self.db, move |db| db.subscribers(board_id)).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!("Could not load subscribers of board {}: {}", board_id, e);
                return;
            }
        };

        self.registry
            .publish(GatewayEvent::BoardDelete { board_id }, &subscribers)
            .await;

        match blocking(&self.db, move |db| db.delete_board_cascade(board_id)).await {
            Ok(true) => info!("Board {} deleted by owner vote", board_id),
            Ok(false) => debug!("Board {} was already gone", board_id),
            Err(e) => error!("Cascade delete of board {} failed: {}", board_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_db::NewBoard;
    use std::time::Duration;

    const BOARD: Snowflake = 100;
    const OWNER_ROLE: Snowflake = 101;

    /// A board with `owners` owners (ids 1..=owners) and one regular member (99).
    fn setup(owners: i64) -> (Arc<Database>, SessionRegistry, DeletionVotes) {
        let db = Database::open_in_memory().unwrap();
        for id in 1..=owners {
            db.ensure_user(id, &format!("owner{}", id), "0001").unwrap();
        }
        db.ensure_user(99, "member", "0001").unwrap();
        db.create_board(&NewBoard {
            id: BOARD,
            name: "b".into(),
            creator_id: 1,
            owner_role_id: OWNER_ROLE,
            everyone_role_id: 102,
            general_channel_id: 103,
        })
        .unwrap();
        for id in 2..=owners {
            db.subscribe(id, BOARD, OWNER_ROLE, None).unwrap();
        }
        db.subscribe(99, BOARD, 102, None).unwrap();

        let db = Arc::new(db);
        let registry = SessionRegistry::new();
        let votes = DeletionVotes::new(db.clone(), registry.clone(), VoteConfig::default());
        (db, registry, votes)
    }

    /// Let vote tasks and their storage calls on the blocking pool finish.
    async fn settle() {
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_threshold_is_ceiling_of_three_quarters() {
        assert_eq!(threshold(1), 1);
        assert_eq!(threshold(2), 2);
        assert_eq!(threshold(3), 3);
        assert_eq!(threshold(4), 3);
        assert_eq!(threshold(5), 4);
        assert_eq!(threshold(8), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_owner_deletes_without_waiting_for_tick() {
        let (db, registry, votes) = setup(1);
        let (_, mut member) = registry.register(99).await;

        let progress = votes.vote(BOARD, 1).await.unwrap();
        assert_eq!(progress, VoteProgress { votes: 1, required: 1 });
        settle().await;

        assert!(db.get_board(BOARD).unwrap().is_none());
        assert!(db.channels_of_board(BOARD).unwrap().is_empty());
        assert!(db.roles_of_board(BOARD).unwrap().is_empty());
        assert_eq!(
            *member.recv().await.unwrap(),
            GatewayEvent::BoardDelete { board_id: BOARD }
        );
        assert!(votes.progress(BOARD).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quorum_reached_by_distinct_owners() {
        let (db, _registry, votes) = setup(4);

        assert_eq!(votes.vote(BOARD, 1).await.unwrap(), VoteProgress { votes: 1, required: 3 });
        // Repeat vote is a no-op.
        assert_eq!(votes.vote(BOARD, 1).await.unwrap(), VoteProgress { votes: 1, required: 3 });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(votes.vote(BOARD, 2).await.unwrap(), VoteProgress { votes: 2, required: 3 });
        settle().await;
        assert!(db.get_board(BOARD).unwrap().is_some());

        votes.vote(BOARD, 3).await.unwrap();
        settle().await;
        assert!(db.get_board(BOARD).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_frozen_at_creation() {
        let (db, _registry, votes) = setup(2);
        assert_eq!(votes.vote(BOARD, 1).await.unwrap().required, 2);

        // A new owner joining mid-vote does not raise the bar.
        db.ensure_user(3, "late", "0001").unwrap();
        db.subscribe(3, BOARD, OWNER_ROLE, None).unwrap();
        assert_eq!(votes.progress(BOARD).await.unwrap().required, 2);

        votes.vote(BOARD, 2).await.unwrap();
        settle().await;
        assert!(db.get_board(BOARD).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_during_cascade_reports_final_tally() {
        let (db, registry, votes) = setup(2);
        let (_, mut member) = registry.register(99).await;

        let executed = Arc::new(VoteTimer {
            state: Mutex::new(VoteState {
                voters: HashSet::from([1, 2]),
                required: 2,
                ticks: 3,
                phase: Phase::Executed,
            }),
            wake: Notify::new(),
        });
        votes.inner.timers.lock().await.insert(BOARD, executed.clone());

        let progress = votes.vote(BOARD, 1).await.unwrap();
        assert_eq!(progress, VoteProgress { votes: 2, required: 2 });
        settle().await;

        // No second vote was opened behind the one being executed.
        let timers = votes.inner.timers.lock().await;
        assert!(Arc::ptr_eq(&timers[&BOARD], &executed));
        assert!(db.get_board(BOARD).unwrap().is_some());
        assert!(member.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_vote_after_quorum_deletes_once() {
        let (db, registry, votes) = setup(1);
        let (_, mut member) = registry.register(99).await;

        assert_eq!(votes.vote(BOARD, 1).await.unwrap(), VoteProgress { votes: 1, required: 1 });
        assert_eq!(votes.vote(BOARD, 1).await.unwrap(), VoteProgress { votes: 1, required: 1 });
        settle().await;

        assert!(db.get_board(BOARD).unwrap().is_none());
        assert_eq!(
            *member.recv().await.unwrap(),
            GatewayEvent::BoardDelete { board_id: BOARD }
        );
        assert!(member.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_expires_and_restarts_fresh() {
        let (db, _registry, votes) = setup(4);
        votes.vote(BOARD, 1).await.unwrap();
        votes.vote(BOARD, 2).await.unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(votes.progress(BOARD).await.unwrap().votes, 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(votes.progress(BOARD).await.is_none());
        assert!(db.get_board(BOARD).unwrap().is_some());

        // Earlier voters are not carried over.
        assert_eq!(votes.vote(BOARD, 3).await.unwrap(), VoteProgress { votes: 1, required: 3 });
    }
}
