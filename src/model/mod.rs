//! Records held by the state store.

mod ids;
mod match_record;
mod user;
mod vote;

pub use ids::{MatchId, PairKey, UserId};
pub use match_record::{HistoryEntry, Match, MatchStatus, Outcome, Tier};
pub use user::{Gender, Location, Preferences, Profile, UserState, UserStatus};
pub use vote::{Vote, VoteChoice};
