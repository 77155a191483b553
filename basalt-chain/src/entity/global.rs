use basalt_primitives::{AccountId, DelegateId, TxRecordId, WitnessId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    block::{BlockId, TransactionId},
    config::ChainParameters,
};

/// Singleton: consensus parameters and the elected active sets.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct GlobalProperties {
    pub parameters: ChainParameters,
    /// Council-approved parameters awaiting the next maintenance boundary.
    pub pending_parameters: Option<ChainParameters>,
    pub next_available_vote_id: u32,
    pub active_witnesses: Vec<WitnessId>,
    pub witness_accounts: BTreeSet<AccountId>,
    pub active_delegates: Vec<DelegateId>,
}

/// Singleton: everything that changes block to block.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct DynamicProperties {
    pub head_block_num: u64,
    pub head_block_id: BlockId,
    pub head_block_time: DateTime<Utc>,
    pub genesis_time: DateTime<Utc>,
    pub current_witness: WitnessId,
    pub next_maintenance_time: DateTime<Utc>,
    /// `None` until the first budget has been computed.
    pub last_budget_time: Option<DateTime<Utc>>,
    /// Native units minted at the last maintenance for per-block witness pay.
    pub witness_budget: i64,
    /// Absolute slot of the head block since genesis.
    pub current_aslot: u64,
}

/// Singleton: the shuffled producer rotation and slot participation history.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WitnessSchedule {
    pub sequence: Vec<WitnessId>,
    /// Bit per recent slot, newest slots in the low bits; 1 = block produced.
    pub recent_slots_filled: u128,
}

/// Dedup record of an applied transaction, retained until its expiration
/// leaves the head time window.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TransactionRecord {
    pub id: TxRecordId,
    pub tx_id: TransactionId,
    pub expiration: DateTime<Utc>,
}
