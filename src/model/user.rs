use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MatchId, Outcome, UserId};
use crate::clock::elapsed;

/// Hard ceiling on fairness regardless of configuration.
pub const FAIRNESS_MAX: u8 = 20;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn complements(self, other: Gender) -> bool {
        self != other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// What a user asks of a partner. Only consulted in tiers 1 and 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub min_age: u8,
    pub max_age: u8,
    pub max_distance_km: Option<f64>,
    pub same_city_only: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            min_age: 18,
            max_age: 99,
            max_distance_km: None,
            same_city_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub gender: Gender,
    pub age: u8,
    pub city: Option<String>,
    pub location: Option<Location>,
    pub preferences: Preferences,
    pub blocked: BTreeSet<UserId>,
}

impl Profile {
    pub fn new(user_id: impl Into<UserId>, gender: Gender, age: u8) -> Self {
        Self {
            user_id: user_id.into(),
            gender,
            age,
            city: None,
            location: None,
            preferences: Preferences::default(),
            blocked: BTreeSet::new(),
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// True if either side has blocked the other.
    pub fn blocks(&self, other: &Profile) -> bool {
        self.blocked.contains(&other.user_id) || other.blocked.contains(&self.user_id)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.as_str().is_empty() {
            return Err("user id must not be empty".into());
        }
        if self.age < 18 {
            return Err(format!("user {} is under 18", self.user_id));
        }
        if self.preferences.min_age > self.preferences.max_age {
            return Err(format!(
                "user {} has min_age {} above max_age {}",
                self.user_id, self.preferences.min_age, self.preferences.max_age
            ));
        }
        if let Some(km) = self.preferences.max_distance_km {
            if !km.is_finite() || km < 0.0 {
                return Err(format!("user {} has invalid max distance {}", self.user_id, km));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Idle,
    Waiting,
    Paired,
    Voting,
}

impl UserStatus {
    pub fn is_matched(self) -> bool {
        matches!(self, UserStatus::Paired | UserStatus::Voting)
    }
}

/// Per-user state row. Authoritative for queue membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: UserId,
    pub state: UserStatus,
    pub match_id: Option<MatchId>,
    pub partner_id: Option<UserId>,
    pub fairness: u8,
    pub waiting_since: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub ready: bool,
    pub last_outcome: Option<Outcome>,
    pub starvation_boosted_for: Option<DateTime<Utc>>,
}

impl UserState {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            state: UserStatus::Idle,
            match_id: None,
            partner_id: None,
            fairness: 0,
            waiting_since: now,
            last_active: now,
            ready: false,
            last_outcome: None,
            starvation_boosted_for: None,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        elapsed(self.last_active, now) <= window
    }

    pub fn wait_time(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.waiting_since, now)
    }

    /// A user-initiated queue join: counts as activity.
    pub fn enter_queue(&mut self, now: DateTime<Utc>) {
        self.rejoin(now);
        self.last_active = now;
    }

    /// A system-initiated return to the queue after a match ends.
    pub fn rejoin(&mut self, now: DateTime<Utc>) {
        self.state = UserStatus::Waiting;
        self.waiting_since = now;
        self.detach();
    }

    pub fn go_idle(&mut self) {
        self.state = UserStatus::Idle;
        self.detach();
    }

    pub fn attach(&mut self, match_id: MatchId, partner_id: UserId, state: UserStatus) {
        self.state = state;
        self.match_id = Some(match_id);
        self.partner_id = Some(partner_id);
        self.ready = false;
    }

    /// Raise fairness by `amount`, never above `cap` or `FAIRNESS_MAX`.
    pub fn boost(&mut self, amount: u8, cap: u8) -> u8 {
        let ceiling = cap.min(FAIRNESS_MAX);
        self.fairness = self.fairness.saturating_add(amount).min(ceiling);
        self.fairness
    }

    fn detach(&mut self) {
        self.match_id = None;
        self.partner_id = None;
        self.ready = false;
    }
}
