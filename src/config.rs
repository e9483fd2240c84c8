use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::Backoff;

/// Upper bound for any duration read from the environment: one week.
const MAX_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: String, value: String },
}

/// How far preference bounds loosen as a requester keeps waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxationSchedule {
    /// Wait after which age bounds widen.
    pub widen_age_after: Duration,
    /// Years added on each side of the age range once widened.
    pub age_widen_years: u8,
    /// Wait after which the distance limit grows and the same-city filter drops.
    pub widen_distance_after: Duration,
    /// Multiplier applied to the distance limit once widened.
    pub distance_factor: f64,
    /// Wait after which preferences are ignored altogether.
    pub full_relaxation_after: Duration,
}

impl Default for RelaxationSchedule {
    fn default() -> Self {
        Self {
            widen_age_after: Duration::from_secs(10),
            age_widen_years: 5,
            widen_distance_after: Duration::from_secs(15),
            distance_factor: 2.0,
            full_relaxation_after: Duration::from_secs(20),
        }
    }
}

/// Engine tuning. Every field has a default; `from_env` overrides from
/// `SPIN_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heartbeat age beyond which a user is treated as offline.
    pub liveness_window: Duration,
    /// Length of the voting window.
    pub vote_window: Duration,
    /// When set, the window opens only after both users call `mark_ready`.
    pub require_ready: bool,
    /// How long a pair may sit unacknowledged before it is cancelled.
    pub ready_timeout: Duration,
    /// Fairness granted to a yes-voter who did not get a mutual yes.
    pub fairness_boost: u8,
    /// Upper bound on fairness.
    pub fairness_cap: u8,
    /// Fairness granted once per waiting session to users waiting longer than average.
    pub starvation_boost: u8,
    pub relaxation: RelaxationSchedule,
    /// Retries after the first try-lock round when pairing.
    pub pair_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Candidate re-selections per spin before reporting "still waiting".
    pub spin_attempts: u32,
    pub guardian_interval: Duration,
    /// Wait after which the guardian forces a matching attempt.
    pub starvation_ceiling: Duration,
    /// Holds older than this are released by the guardian.
    pub stale_lock_after: Duration,
    /// Cadence of the engine worker (expiry, disconnects, matching cycle).
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(15),
            vote_window: Duration::from_secs(10),
            require_ready: false,
            ready_timeout: Duration::from_secs(15),
            fairness_boost: 10,
            fairness_cap: 20,
            starvation_boost: 1,
            relaxation: RelaxationSchedule::default(),
            pair_retries: 5,
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(80),
            spin_attempts: 3,
            guardian_interval: Duration::from_secs(10),
            starvation_ceiling: Duration::from_secs(30),
            stale_lock_after: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Load overrides from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let millis = |key: &str| -> Result<Option<Duration>, ConfigError> {
            match parse::<u64>(&lookup, key)? {
                Some(ms) if ms > MAX_DURATION_MS => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value: ms.to_string(),
                }),
                v => Ok(v.map(Duration::from_millis)),
            }
        };

        if let Some(v) = millis("SPIN_LIVENESS_WINDOW_MS")? {
            config.liveness_window = v;
        }
        if let Some(v) = millis("SPIN_VOTE_WINDOW_MS")? {
            config.vote_window = v;
        }
        if let Some(v) = parse::<bool>(&lookup, "SPIN_REQUIRE_READY")? {
            config.require_ready = v;
        }
        if let Some(v) = millis("SPIN_READY_TIMEOUT_MS")? {
            config.ready_timeout = v;
        }
        if let Some(v) = parse::<u8>(&lookup, "SPIN_FAIRNESS_BOOST")? {
            config.fairness_boost = v;
        }
        if let Some(v) = parse::<u8>(&lookup, "SPIN_FAIRNESS_CAP")? {
            config.fairness_cap = v;
        }
        if let Some(v) = parse::<u32>(&lookup, "SPIN_PAIR_RETRIES")? {
            config.pair_retries = v;
        }
        if let Some(v) = parse::<u32>(&lookup, "SPIN_SPIN_ATTEMPTS")? {
            config.spin_attempts = v;
        }
        if let Some(v) = millis("SPIN_GUARDIAN_INTERVAL_MS")? {
            config.guardian_interval = v;
        }
        if let Some(v) = millis("SPIN_STARVATION_CEILING_MS")? {
            config.starvation_ceiling = v;
        }
        if let Some(v) = millis("SPIN_STALE_LOCK_MS")? {
            config.stale_lock_after = v;
        }
        if let Some(v) = millis("SPIN_TICK_INTERVAL_MS")? {
            config.tick_interval = v;
        }
        Ok(config)
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn with_vote_window(mut self, window: Duration) -> Self {
        self.vote_window = window;
        self
    }

    pub fn with_require_ready(mut self, require: bool) -> Self {
        self.require_ready = require;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_pair_retries(mut self, retries: u32) -> Self {
        self.pair_retries = retries;
        self
    }

    pub fn with_starvation_ceiling(mut self, ceiling: Duration) -> Self {
        self.starvation_ceiling = ceiling;
        self
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_guardian_interval(mut self, interval: Duration) -> Self {
        self.guardian_interval = interval;
        self
    }

    pub fn with_relaxation(mut self, relaxation: RelaxationSchedule) -> Self {
        self.relaxation = relaxation;
        self
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap, self.pair_retries)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}
