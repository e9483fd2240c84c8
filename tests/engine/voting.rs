//! Vote recording and outcome effects.

use std::sync::Arc;
use std::time::Duration;

use spin_pair::{
    Engine, EngineConfig, EngineError, Gender, InMemoryStore, ManualClock, MatchId, MatchStatus,
    Outcome, PairKey, Profile, StateStore, StoreError, UserId, UserStatus, VoteChoice,
};

use crate::support::{start, FailingSink, Harness};

fn voting_pair(h: &Harness) -> (UserId, UserId, MatchId) {
    let (x, y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    (x, y, match_id)
}

fn in_history(h: &Harness, a: &UserId, b: &UserId) -> bool {
    let pair = PairKey::new(a, b);
    h.engine.store().read(|t| t.in_history(&pair)).unwrap()
}

#[test]
fn both_yes_sends_pair_to_their_date() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    let first = h.engine.record_vote(&x, &match_id, VoteChoice::Yes).unwrap();
    assert_eq!(first.outcome, None);
    let second = h.engine.record_vote(&y, &match_id, VoteChoice::Yes).unwrap();
    assert_eq!(second.outcome, Some(Outcome::BothYes));

    for user in [&x, &y] {
        let status = h.status(user);
        assert_eq!(status.state, UserStatus::Idle);
        assert_eq!(status.match_id, None);
        assert_eq!(status.last_outcome, Some(Outcome::BothYes));
    }
    assert!(in_history(&h, &x, &y));

    let m = h.engine.store().get_match(&match_id).unwrap().unwrap();
    assert_eq!(m.status, MatchStatus::Completed);
    assert_eq!(m.outcome, Some(Outcome::BothYes));

    let resolved = h.events_of("outcome_resolved");
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].contains("both_yes"));
}

#[test]
fn yes_pass_boosts_the_yes_voter() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    h.engine.record_vote(&x, &match_id, VoteChoice::Yes).unwrap();
    let receipt = h.engine.record_vote(&y, &match_id, VoteChoice::Pass).unwrap();
    assert_eq!(receipt.outcome, Some(Outcome::YesPass));

    let status_x = h.status(&x);
    let status_y = h.status(&y);
    assert_eq!(status_x.state, UserStatus::Waiting);
    assert_eq!(status_y.state, UserStatus::Waiting);
    assert_eq!(status_x.fairness, 10);
    assert_eq!(status_y.fairness, 0);
    assert!(in_history(&h, &x, &y));
}

#[test]
fn fairness_never_passes_the_cap() {
    let h = Harness::new();
    let x = h.man("x");
    h.engine.join_queue(&x).unwrap();

    for round in 0..3 {
        let w = h.woman(&format!("w{}", round));
        h.engine.join_queue(&w).unwrap();
        let match_id = h.engine.spin(&x).unwrap().unwrap();
        h.engine.record_vote(&x, &match_id, VoteChoice::Yes).unwrap();
        h.engine.record_vote(&w, &match_id, VoteChoice::Pass).unwrap();
    }
    assert_eq!(h.status(&x).fairness, 20);
}

#[test]
fn pass_and_silence_resolve_at_expiry() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    h.engine.record_vote(&x, &match_id, VoteChoice::Pass).unwrap();
    h.advance(9);
    assert!(h.engine.resolve_expired_votes().unwrap().is_empty());

    h.advance(1);
    let resolved = h.engine.resolve_expired_votes().unwrap();
    assert_eq!(resolved, vec![(match_id, Outcome::PassIdle)]);

    assert_eq!(h.status(&x).state, UserStatus::Waiting);
    assert_eq!(h.status(&y).state, UserStatus::Idle);
    assert_eq!(h.status(&y).last_outcome, Some(Outcome::PassIdle));

    // The silent side stays idle until they come back on their own.
    assert_eq!(h.engine.join_queue(&y).unwrap().state, UserStatus::Waiting);
}

#[test]
fn yes_and_silence_rejoins_yes_voter_with_boost() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    h.engine.record_vote(&y, &match_id, VoteChoice::Yes).unwrap();
    h.advance(10);
    let resolved = h.engine.resolve_expired_votes().unwrap();
    assert_eq!(resolved, vec![(match_id, Outcome::YesIdle)]);

    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_eq!(h.status(&y).state, UserStatus::Waiting);
    assert_eq!(h.status(&y).fairness, 10);
}

#[test]
fn nobody_voting_idles_both_and_records_history() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    h.advance(10);
    let resolved = h.engine.resolve_expired_votes().unwrap();
    assert_eq!(resolved, vec![(match_id, Outcome::IdleIdle)]);
    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_eq!(h.status(&y).state, UserStatus::Idle);
    assert!(in_history(&h, &x, &y));

    // Expiry is handled once.
    assert!(h.engine.resolve_expired_votes().unwrap().is_empty());
}

#[test]
fn vote_on_the_deadline_is_rejected() {
    let h = Harness::new();
    let (x, _y, match_id) = voting_pair(&h);
    let deadline = h.status(&x).vote_window_expires_at.unwrap();

    h.advance(10);
    let err = h
        .engine
        .record_vote(&x, &match_id, VoteChoice::Yes)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::ExpiredWindow {
            match_id,
            expired_at: deadline
        }
    );

    let vote = h
        .engine
        .store()
        .read(|t| t.vote(&match_id).cloned())
        .unwrap()
        .unwrap();
    assert_eq!(vote.user1_vote, None);
    assert_eq!(vote.user2_vote, None);
}

#[test]
fn vote_just_before_the_deadline_counts() {
    let h = Harness::new();
    let (x, _y, match_id) = voting_pair(&h);

    h.advance_millis(9_999);
    h.engine.record_vote(&x, &match_id, VoteChoice::Pass).unwrap();
    h.advance_millis(1);
    let resolved = h.engine.resolve_expired_votes().unwrap();
    assert_eq!(resolved, vec![(match_id, Outcome::PassIdle)]);
}

#[test]
fn later_vote_overwrites_earlier_one() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);

    h.engine.record_vote(&x, &match_id, VoteChoice::Yes).unwrap();
    h.engine.record_vote(&x, &match_id, VoteChoice::Pass).unwrap();
    let receipt = h.engine.record_vote(&y, &match_id, VoteChoice::Yes).unwrap();

    assert_eq!(receipt.outcome, Some(Outcome::YesPass));
    assert_eq!(h.status(&y).fairness, 10);
    assert_eq!(h.status(&x).fairness, 0);
}

#[test]
fn completed_match_rejects_further_votes() {
    let h = Harness::new();
    let (x, y, match_id) = voting_pair(&h);
    h.engine.record_vote(&x, &match_id, VoteChoice::Pass).unwrap();
    h.engine.record_vote(&y, &match_id, VoteChoice::Pass).unwrap();

    let err = h
        .engine
        .record_vote(&x, &match_id, VoteChoice::Yes)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::MatchNotActive {
            match_id,
            status: MatchStatus::Completed
        }
    );
}

#[test]
fn outsiders_and_unknown_matches_are_rejected() {
    let h = Harness::new();
    let (_x, _y, match_id) = voting_pair(&h);
    let z = h.woman("z");

    let err = h
        .engine
        .record_vote(&z, &match_id, VoteChoice::Yes)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::NotParticipant {
            user_id: z.clone(),
            match_id
        }
    );

    let missing = MatchId::new();
    let err = h
        .engine
        .record_vote(&z, &missing, VoteChoice::Yes)
        .unwrap_err();
    assert_eq!(err, EngineError::UnknownMatch(missing));
}

#[test]
fn acknowledgement_opens_the_window() {
    let h = Harness::with_config(EngineConfig::default().with_require_ready(true));
    let (x, y, match_id) = voting_pair(&h);

    assert_eq!(h.status(&x).state, UserStatus::Paired);
    assert_eq!(h.status(&x).vote_window_expires_at, None);
    let err = h
        .engine
        .record_vote(&x, &match_id, VoteChoice::Yes)
        .unwrap_err();
    assert!(matches!(err, EngineError::MatchNotActive { .. }));

    h.advance(2);
    assert_eq!(h.engine.mark_ready(&x, &match_id).unwrap(), MatchStatus::Paired);
    assert_eq!(h.engine.mark_ready(&y, &match_id).unwrap(), MatchStatus::Voting);
    assert_eq!(h.engine.mark_ready(&y, &match_id).unwrap(), MatchStatus::Voting);

    let status = h.status(&x);
    assert_eq!(status.state, UserStatus::Voting);
    assert_eq!(
        status.vote_window_expires_at,
        Some(h.engine.now() + chrono::TimeDelta::seconds(10))
    );
    assert_eq!(h.events_of("voting_started").len(), 1);
}

#[test]
fn unacknowledged_pairing_times_out() {
    let h = Harness::with_config(EngineConfig::default().with_require_ready(true));
    let (x, y, match_id) = voting_pair(&h);
    h.engine.mark_ready(&x, &match_id).unwrap();

    h.advance(14);
    h.heartbeat(&[&x, &y]);
    assert!(h.engine.expire_unready().unwrap().is_empty());

    h.advance(1);
    assert_eq!(h.engine.expire_unready().unwrap(), vec![match_id]);
    assert_eq!(h.status(&x).state, UserStatus::Waiting);
    assert_eq!(h.status(&y).state, UserStatus::Waiting);
    assert_eq!(h.status(&x).last_outcome, Some(Outcome::Cancelled));
    assert!(!in_history(&h, &x, &y));

    let m = h.engine.store().get_match(&match_id).unwrap().unwrap();
    assert_eq!(m.status, MatchStatus::Cancelled);
}

#[test]
fn sink_failure_does_not_undo_the_vote() {
    let clock = ManualClock::new(start());
    let engine = Arc::new(
        Engine::builder(InMemoryStore::new())
            .with_clock(clock)
            .with_sink(FailingSink)
            .build(),
    );
    let x = UserId::from("x");
    let y = UserId::from("y");
    engine
        .register_user(Profile::new("x", Gender::Male, 30))
        .unwrap();
    engine
        .register_user(Profile::new("y", Gender::Female, 30))
        .unwrap();
    engine.join_queue(&y).unwrap();
    let match_id = engine.spin(&x).unwrap().unwrap();

    engine.record_vote(&x, &match_id, VoteChoice::Yes).unwrap();
    let receipt = engine.record_vote(&y, &match_id, VoteChoice::Yes).unwrap();
    assert_eq!(receipt.outcome, Some(Outcome::BothYes));
    assert_eq!(engine.get_status(&x).unwrap().state, UserStatus::Idle);
}

#[test]
fn failed_transaction_changes_nothing() {
    let h = Harness::new();
    let (x, _y, _match_id) = voting_pair(&h);

    let result: Result<(), StoreError> = h.engine.store().transact(|tx| {
        let mut state = tx.user(&x).cloned().unwrap();
        state.fairness = 20;
        tx.put_user(state);
        Err(StoreError::Snapshot("abort".into()))
    });
    assert!(result.is_err());
    assert_eq!(h.status(&x).fairness, 0);
}

#[test]
fn unrepresentable_window_fails_without_pairing() {
    let h = Harness::with_config(
        EngineConfig::default().with_vote_window(Duration::from_millis(u64::MAX)),
    );
    let (x, y) = h.waiting_pair("x", "y");

    let err = h.engine.spin(&x).unwrap_err();
    assert!(matches!(err, EngineError::DeadlineOverflow { .. }));
    assert!(!err.is_validation());

    // Nothing was half-written and the store still serves requests.
    for user in [&x, &y] {
        let status = h.status(user);
        assert_eq!(status.state, UserStatus::Waiting);
        assert_eq!(status.match_id, None);
    }
    assert_eq!(h.engine.candidates().unwrap().len(), 2);
    assert!(h.events_of("match_created").is_empty());
}
