use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::WorkerId;

/// A time-bounded exclusive claim on a step execution slot.
///
/// Exactly one worker may hold a live lease for a given step key. An
/// expired lease is treated as absent: any worker may take over, and the
/// renewal counter restarts at 1 for the new holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The step slot this lease guards (see `StepId::lease_key`).
    pub step_key: String,
    /// The worker currently holding the lease.
    pub owner: WorkerId,
    /// Number of consecutive acquisitions by the current owner, starting at 1.
    pub renew_count: u32,
    /// Instant after which the lease no longer grants exclusivity.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has lapsed at `now`.
    ///
    /// Expiry is inclusive: a lease whose `expires_at` equals `now` is
    /// already up for grabs.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
