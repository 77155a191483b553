use basalt_primitives::{AccountId, VoteId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a worker's pay is routed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum WorkerKind {
    /// Pay is burned back into the reserve.
    Refund,
    /// Pay lands directly on the owning account's balance.
    Balance,
    /// Pay accrues to the owning account's vesting cashback.
    Vesting,
}

/// An on-chain proposal drawing daily pay from the per-interval worker
/// budget while active and approved by stake.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Worker {
    pub id: WorkerId,
    pub worker_account: AccountId,
    pub daily_pay: i64,
    pub work_begin: DateTime<Utc>,
    pub work_end: DateTime<Utc>,
    pub vote_id: VoteId,
    pub kind: WorkerKind,
    pub total_paid: i64,
}

impl Worker {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.work_begin <= now && now < self.work_end
    }
}
