//! Concurrent spins, pairings and votes against one engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;

use spin_pair::{Gender, Match, Outcome, StateStore, Tier, UserId, UserStatus, VoteChoice};

use crate::support::Harness;

fn assert_consistent(h: &Harness) {
    h.engine
        .store()
        .read(|tables| {
            let mut seen: HashSet<&UserId> = HashSet::new();
            let mut pairs = HashSet::new();
            let active: Vec<&Match> = tables.active_matches().collect();
            for m in &active {
                assert!(pairs.insert(m.pair()), "duplicate active pair {}", m.pair());
                let genders: Vec<Gender> = m
                    .participants()
                    .iter()
                    .map(|id| tables.profile(id).unwrap().gender)
                    .collect();
                assert_ne!(genders[0], genders[1]);
                for id in m.participants() {
                    assert!(seen.insert(id), "{} is in two active matches", id);
                    let user = tables.user(id).unwrap();
                    assert_eq!(user.match_id, Some(m.match_id));
                    assert!(user.state.is_matched());
                }
            }
            for user in tables.users() {
                if user.state.is_matched() {
                    assert!(seen.contains(&user.user_id));
                } else {
                    assert_eq!(user.match_id, None);
                }
            }
        })
        .unwrap();
}

#[test]
fn concurrent_spins_never_double_book() {
    let h = Harness::new();
    let mut users = Vec::new();
    for i in 0..10 {
        users.push(h.man(&format!("m{:02}", i)));
        users.push(h.woman(&format!("w{:02}", i)));
    }

    let barrier = Arc::new(Barrier::new(users.len()));
    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.spin(&user)
            })
        })
        .collect();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => {}
            Err(err) => assert!(err.is_validation(), "unexpected error {}", err),
        }
    }
    assert_consistent(&h);

    // Whoever lost every race is still waiting and gets paired on the next cycle.
    h.engine.run_matching_cycle().unwrap();
    assert_consistent(&h);
    let matched = users
        .iter()
        .filter(|u| h.status(u).state == UserStatus::Voting)
        .count();
    assert_eq!(matched, users.len());
}

#[test]
fn racing_pairings_of_one_pair_create_one_match() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            let (a, b) = if i % 2 == 0 {
                (x.clone(), y.clone())
            } else {
                (y.clone(), x.clone())
            };
            thread::spawn(move || {
                barrier.wait();
                engine.create_pair(&a, &b, Tier::Exact).unwrap()
            })
        })
        .collect();
    let created: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(created.len(), 1);
    assert_eq!(h.events_of("match_created").len(), 1);
    assert_consistent(&h);
}

#[test]
fn competing_pairings_for_one_user_pick_one() {
    let h = Harness::new();
    let x = h.man("x");
    let women: Vec<UserId> = (0..6).map(|i| h.woman(&format!("w{}", i))).collect();
    h.engine.join_queue(&x).unwrap();
    for w in &women {
        h.engine.join_queue(w).unwrap();
    }

    let barrier = Arc::new(Barrier::new(women.len()));
    let handles: Vec<_> = women
        .iter()
        .cloned()
        .map(|w| {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            let x = x.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.create_pair(&w, &x, Tier::Exact).unwrap()
            })
        })
        .collect();
    let created = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .count();

    assert_eq!(created, 1);
    assert_eq!(h.status(&x).state, UserStatus::Voting);
    assert_consistent(&h);
}

#[test]
fn simultaneous_votes_resolve_once() {
    let h = Harness::new();
    let (x, y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [x.clone(), y.clone()]
        .into_iter()
        .map(|user| {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.record_vote(&user, &match_id, VoteChoice::Yes).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<Option<Outcome>> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().outcome)
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
    assert!(outcomes.contains(&Some(Outcome::BothYes)));
    assert_eq!(h.events_of("outcome_resolved").len(), 1);
    assert_eq!(h.status(&x).state, UserStatus::Idle);
    assert_eq!(h.status(&y).state, UserStatus::Idle);
}

#[test]
fn votes_and_expiry_race_to_one_outcome() {
    let h = Harness::new();
    let (x, _y) = h.waiting_pair("x", "y");
    let match_id = h.engine.spin(&x).unwrap().unwrap();
    h.advance(10);

    let voter = {
        let engine = h.engine.clone();
        let x = x.clone();
        thread::spawn(move || engine.record_vote(&x, &match_id, VoteChoice::Yes))
    };
    let sweeper = {
        let engine = h.engine.clone();
        thread::spawn(move || engine.resolve_expired_votes().unwrap())
    };
    assert!(voter.join().unwrap().is_err());
    let resolved: HashMap<_, _> = sweeper.join().unwrap().into_iter().collect();
    assert_eq!(resolved.get(&match_id), Some(&Outcome::IdleIdle));
    assert_eq!(h.events_of("outcome_resolved").len(), 1);
}
