use std::time::Duration;

use crate::config::RelaxationSchedule;

/// How much preference bounds are loosened for one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Widening {
    pub age_years: u8,
    pub distance_factor: f64,
    pub ignore_city: bool,
    pub ignore_preferences: bool,
}

impl Widening {
    pub const NONE: Widening = Widening {
        age_years: 0,
        distance_factor: 1.0,
        ignore_city: false,
        ignore_preferences: false,
    };

    pub const ANY: Widening = Widening {
        age_years: 0,
        distance_factor: 1.0,
        ignore_city: true,
        ignore_preferences: true,
    };

    pub fn for_wait(schedule: &RelaxationSchedule, waited: Duration) -> Widening {
        if waited >= schedule.full_relaxation_after {
            return Widening::ANY;
        }
        let mut widening = Widening::NONE;
        if waited >= schedule.widen_age_after {
            widening.age_years = schedule.age_widen_years;
        }
        if waited >= schedule.widen_distance_after {
            widening.distance_factor = schedule.distance_factor;
            widening.ignore_city = true;
        }
        widening
    }
}
