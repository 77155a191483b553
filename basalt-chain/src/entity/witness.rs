use basalt_primitives::{AccountId, DelegateId, SignerKey, VoteId, WitnessId};
use serde::{Deserialize, Serialize};

/// A block-producer candidate. Whether it is currently active is recorded in
/// [`GlobalProperties`](crate::entity::GlobalProperties).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Witness {
    pub id: WitnessId,
    pub witness_account: AccountId,
    pub signing_key: SignerKey,
    pub vote_id: VoteId,
    /// Number of the last block this witness produced.
    pub last_block: u64,
    pub total_missed: u64,
}

/// A committee candidate. Elected delegates form the council authority and
/// approve parameter changes.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Delegate {
    pub id: DelegateId,
    pub delegate_account: AccountId,
    pub vote_id: VoteId,
}
