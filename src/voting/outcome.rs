use crate::model::{Outcome, VoteChoice};

/// Where a participant goes once their match resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Both said yes; the pair leaves for their date.
    VideoDate,
    /// Back into the queue, boosted if they said yes to someone who did not.
    Rejoin { boost: bool },
    Idle,
}

/// Outcome for a pair of vote slots. Slot order does not matter.
pub fn resolve(first: Option<VoteChoice>, second: Option<VoteChoice>) -> Outcome {
    use VoteChoice::{Pass, Yes};
    match (first, second) {
        (Some(Yes), Some(Yes)) => Outcome::BothYes,
        (Some(Yes), Some(Pass)) | (Some(Pass), Some(Yes)) => Outcome::YesPass,
        (Some(Pass), Some(Pass)) => Outcome::PassPass,
        (Some(Pass), None) | (None, Some(Pass)) => Outcome::PassIdle,
        (Some(Yes), None) | (None, Some(Yes)) => Outcome::YesIdle,
        (None, None) => Outcome::IdleIdle,
    }
}

/// What happens to one participant given the match outcome and their own
/// slot.
pub fn disposition(outcome: Outcome, own: Option<VoteChoice>) -> Disposition {
    match (outcome, own) {
        (Outcome::BothYes, _) => Disposition::VideoDate,
        (Outcome::Cancelled, _) => Disposition::Rejoin { boost: false },
        (Outcome::IdleIdle, _) | (_, None) => Disposition::Idle,
        (Outcome::YesPass | Outcome::YesIdle, Some(VoteChoice::Yes)) => {
            Disposition::Rejoin { boost: true }
        }
        (_, Some(_)) => Disposition::Rejoin { boost: false },
    }
}
