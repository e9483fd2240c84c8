use super::Widening;
use crate::model::Profile;

/// Constraints no tier relaxes: distinct users, complementary genders,
/// no block in either direction, never matched before.
pub fn hard_eligible(a: &Profile, b: &Profile, in_history: bool) -> bool {
    a.user_id != b.user_id && a.gender.complements(b.gender) && !a.blocks(b) && !in_history
}

/// Whether `seeker`'s preferences, loosened by `widening`, admit `other`.
///
/// A distance limit only applies when both locations are known.
pub fn accepts(seeker: &Profile, other: &Profile, widening: Widening) -> bool {
    if widening.ignore_preferences {
        return true;
    }
    let prefs = &seeker.preferences;

    let min_age = prefs.min_age.saturating_sub(widening.age_years);
    let max_age = prefs.max_age.saturating_add(widening.age_years);
    if other.age < min_age || other.age > max_age {
        return false;
    }

    if prefs.same_city_only && !widening.ignore_city {
        let same_city = match (&seeker.city, &other.city) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        if !same_city {
            return false;
        }
    }

    if let (Some(limit), Some(here), Some(there)) =
        (prefs.max_distance_km, seeker.location, other.location)
    {
        if here.distance_km(&there) > limit * widening.distance_factor {
            return false;
        }
    }
    true
}

pub fn mutually_accept(a: &Profile, b: &Profile, widening: Widening) -> bool {
    accepts(a, b, widening) && accepts(b, a, widening)
}
