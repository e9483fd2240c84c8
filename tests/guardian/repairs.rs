//! One test per repair the guardian makes.

use std::thread;
use std::time::Duration;

use spin_pair::{
    acquire_blocking, try_acquire_ordered, Backoff, Correction, EngineConfig, Match, MatchId,
    MatchStatus, Outcome, StateStore, StoreError, SweepReport, Tier, Transaction, UserId,
    UserStatus, VoteChoice,
};

use crate::support::Harness;

fn inject<F>(h: &Harness, f: F)
where
    F: FnOnce(&mut Transaction<'_>),
{
    h.engine
        .store()
        .transact(|tx| {
            f(tx);
            Ok::<_, StoreError>(())
        })
        .unwrap();
}

fn sweep(h: &Harness) -> SweepReport {
    let report = h.engine.guardian().sweep().unwrap();
    assert!(!report.skipped);
    report
}

/// A second sweep right after a repair must find nothing.
fn assert_settled(h: &Harness) {
    let again = sweep(h);
    assert!(again.is_clean(), "second sweep corrected {:?}", again.corrections);
}

#[test]
fn consistent_state_needs_no_repair() {
    let h = Harness::new();
    let (x, _y) = h.waiting_pair("x", "y");
    h.engine.spin(&x).unwrap().unwrap();
    let idle = h.woman("idle");
    h.heartbeat(&[&idle]);

    assert!(sweep(&h).is_clean());
    assert_settled(&h);
    assert!(h.events_of("guardian_correction").is_empty());
}

#[test]
fn orphaned_voter_rejoins_queue() {
    let h = Harness::new();
    let x = h.man("x");
    inject(&h, |tx| {
        let mut state = tx.user(&x).cloned().unwrap();
        state.attach(MatchId::new(), UserId::from("ghost"), UserStatus::Voting);
        tx.put_user(state);
    });

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::StateRealigned {
            user_id: x.clone(),
            before: UserStatus::Voting,
            after: UserStatus::Waiting,
        }]
    );
    let status = h.status(&x);
    assert_eq!(status.state, UserStatus::Waiting);
    assert_eq!(status.match_id, None);
    assert_eq!(h.events_of("guardian_correction").len(), 1);
    assert_settled(&h);
}

#[test]
fn offline_orphan_goes_idle() {
    let h = Harness::new();
    let x = h.man("x");
    inject(&h, |tx| {
        let mut state = tx.user(&x).cloned().unwrap();
        state.attach(MatchId::new(), UserId::from("ghost"), UserStatus::Paired);
        tx.put_user(state);
    });
    h.advance(20);

    let report = sweep(&h);
    assert_eq!(report.count("state_realigned"), 1);
    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_settled(&h);
}

#[test]
fn waiting_user_lets_go_of_dangling_match() {
    let h = Harness::new();
    let x = h.man("x");
    h.engine.join_queue(&x).unwrap();
    let dangling = MatchId::new();
    inject(&h, |tx| {
        let mut state = tx.user(&x).cloned().unwrap();
        state.match_id = Some(dangling);
        tx.put_user(state);
    });

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::DanglingMatchCleared {
            user_id: x.clone(),
            match_id: dangling,
        }]
    );
    assert_eq!(h.status(&x).state, UserStatus::Waiting);
    assert_eq!(h.status(&x).match_id, None);
    assert_settled(&h);
}

#[test]
fn participant_missing_from_match_is_reattached() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    inject(&h, |tx| {
        let mut state = tx.user(&x).cloned().unwrap();
        state.rejoin(h.engine.now());
        tx.put_user(state);
    });

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::StateRealigned {
            user_id: x.clone(),
            before: UserStatus::Waiting,
            after: UserStatus::Voting,
        }]
    );
    let status = h.status(&x);
    assert_eq!(status.match_id, Some(match_id));
    assert_eq!(status.partner_id, Some(y));
    assert!(h.engine.candidates().unwrap().is_empty());
    assert_settled(&h);
}

#[test]
fn duplicate_matches_collapse_to_oldest() {
    let h = Harness::new();
    let x = h.man("x");
    let y = h.woman("y");
    let z = h.woman("z");

    let older = Match::new(&x, &y, Tier::Exact, h.engine.now());
    h.advance(1);
    let newer = Match::new(&x, &z, Tier::Exact, h.engine.now());
    inject(&h, |tx| {
        for (user, m, partner) in [(&x, &newer, &z), (&y, &older, &x), (&z, &newer, &x)] {
            let mut state = tx.user(user).cloned().unwrap();
            state.attach(m.match_id, partner.clone(), UserStatus::Paired);
            tx.put_user(state);
        }
        tx.put_match(older.clone());
        tx.put_match(newer.clone());
    });

    let report = sweep(&h);
    assert_eq!(report.count("duplicate_match_cancelled"), 1);
    assert!(report.corrections.contains(&Correction::DuplicateMatchCancelled {
        match_id: newer.match_id,
        user_id: x.clone(),
        kept: older.match_id,
    }));
    assert!(report.corrections.contains(&Correction::StateRealigned {
        user_id: x.clone(),
        before: UserStatus::Waiting,
        after: UserStatus::Paired,
    }));

    let cancelled = h.engine.store().get_match(&newer.match_id).unwrap().unwrap();
    assert_eq!(cancelled.status, MatchStatus::Cancelled);
    assert_eq!(h.status(&x).match_id, Some(older.match_id));
    assert_eq!(h.status(&y).match_id, Some(older.match_id));
    assert_eq!(h.status(&z).state, UserStatus::Waiting);
    assert_settled(&h);
}

#[test]
fn offline_pair_is_broken() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    h.advance(10);
    h.heartbeat(&[&x]);
    h.advance(6);

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::OfflinePairBroken {
            match_id,
            offline: vec![y.clone()],
            outcome: Outcome::IdleIdle,
        }]
    );
    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_eq!(h.status(&y).state, UserStatus::Idle);
    assert_settled(&h);
}

#[test]
fn offline_voter_loses_their_vote() {
    let h = Harness::with_config(
        EngineConfig::default().with_liveness_window(Duration::from_secs(5)),
    );
    let (x, y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    h.engine.record_vote(&y, &match_id, VoteChoice::Yes).unwrap();
    h.advance(3);
    h.heartbeat(&[&x]);
    h.advance(3);

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::OfflinePairBroken {
            match_id,
            offline: vec![y.clone()],
            outcome: Outcome::IdleIdle,
        }]
    );
    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_eq!(h.status(&y).state, UserStatus::Idle);
    assert_eq!(h.status(&y).fairness, 0);
    assert_settled(&h);
}

#[test]
fn abandoned_hold_is_released() {
    let h = Harness::with_config(
        EngineConfig::default()
            .with_stale_lock_after(Duration::from_millis(20))
            .with_pair_retries(1),
    );
    let (x, y) = h.waiting_pair("x", "y");

    // A worker that died mid-pairing never drops its guard.
    let abandoned = acquire_blocking(h.engine.locks(), &format!("user:{}", x)).unwrap();
    assert_eq!(h.engine.spin(&x).unwrap(), None);
    thread::sleep(Duration::from_millis(30));

    let report = h.engine.guardian().sweep().unwrap();
    assert!(report.corrections.contains(&Correction::StaleLockReleased {
        key: format!("user:{}", x),
    }));
    assert_eq!(report.count("stale_lock_released"), 1);

    let match_id = h.engine.spin(&x).unwrap().unwrap();
    assert_eq!(h.status(&y).match_id, Some(match_id));

    // The late drop must not free a hold someone else took since.
    let current = acquire_blocking(h.engine.locks(), &format!("user:{}", x)).unwrap();
    drop(abandoned);
    let once = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 0);
    let contender = try_acquire_ordered(h.engine.locks(), &[current.key()], &once).unwrap();
    assert!(contender.is_none());
    assert_eq!(h.events_of("guardian_correction").len(), 1);
}

#[test]
fn expired_windows_are_resolved() {
    let h = Harness::new();
    let (x, _y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    h.advance(10);

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::ExpiredVoteResolved {
            match_id,
            outcome: Outcome::IdleIdle,
        }]
    );
    assert_settled(&h);
}

#[test]
fn longest_waiter_gets_one_boost_per_session() {
    let h = Harness::new();
    let first = h.woman("a");
    let second = h.woman("b");
    let third = h.woman("c");
    h.engine.join_queue(&first).unwrap();
    h.advance(5);
    h.engine.join_queue(&second).unwrap();
    h.advance(5);
    h.engine.join_queue(&third).unwrap();
    h.advance(2);

    let report = sweep(&h);
    assert_eq!(
        report.corrections,
        vec![Correction::StarvationBoost {
            user_id: first.clone(),
            before: 0,
            after: 1,
        }]
    );
    assert_eq!(h.status(&first).fairness, 1);
    assert_settled(&h);
    assert_eq!(h.status(&first).fairness, 1);
}

#[test]
fn long_waiter_is_force_matched() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");
    for _ in 0..3 {
        h.advance(10);
        h.heartbeat(&[&x, &y]);
    }
    h.advance(1);

    let report = sweep(&h);
    assert_eq!(report.count("forced_match"), 1);
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(h.status(&x).state, UserStatus::Voting);
    assert_eq!(h.status(&y).state, UserStatus::Voting);
    assert_settled(&h);
}

#[test]
fn several_faults_heal_in_one_pass() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");
    h.engine.spin(&x).unwrap().unwrap();
    let lost = h.man("lost");
    let waiting = h.man("waiting");
    h.engine.join_queue(&waiting).unwrap();
    inject(&h, |tx| {
        let mut state = tx.user(&lost).cloned().unwrap();
        state.attach(MatchId::new(), y.clone(), UserStatus::Voting);
        tx.put_user(state);
        let mut state = tx.user(&waiting).cloned().unwrap();
        state.match_id = Some(MatchId::new());
        tx.put_user(state);
    });

    let report = sweep(&h);
    assert_eq!(report.corrections.len(), 2);
    assert_eq!(h.events_of("guardian_correction").len(), 2);
    assert_settled(&h);
    assert_settled(&h);
}
