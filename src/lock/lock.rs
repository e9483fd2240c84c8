use std::time::Duration;

use super::LockError;

/// Identifies one acquisition of a lock. Only the current hold's token can
/// release it, so a holder whose hold was force-released cannot free a
/// later holder's hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HoldToken(pub u64);

/// One exclusive hold over a key.
///
/// Pairing only ever calls `try_lock`; vote recording blocks in `lock`.
pub trait Lock: Send + Sync {
    fn lock(&self) -> Result<HoldToken, LockError>;

    /// `Ok(None)` when someone else holds the key.
    fn try_lock(&self) -> Result<Option<HoldToken>, LockError>;

    /// Release the hold `token` was issued for. `Ok(false)` if that hold is
    /// no longer current.
    fn unlock(&self, token: HoldToken) -> Result<bool, LockError>;

    /// Age of the current hold, `None` when free.
    fn held_for(&self) -> Result<Option<Duration>, LockError>;
}
