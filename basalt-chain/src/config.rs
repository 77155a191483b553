use crate::error::{LedgerError, ValidationError};
use basalt_primitives::HUNDRED_PERCENT;
use serde::{Deserialize, Serialize};

/// Symbol of the native asset created at genesis.
pub const CORE_SYMBOL: &str = "CORE";

/// Base units per whole native coin.
pub const CORE_PRECISION: u8 = 5;
pub const CORE_UNIT: i64 = 100_000;

/// Minimum sizes of the elected active sets.
pub const MIN_WITNESS_COUNT: usize = 10;
pub const MIN_DELEGATE_COUNT: usize = 10;

/// Sealed block frames retained for fork rollback before coalescing into the
/// durable baseline.
pub const MAX_UNDO_HISTORY: usize = 1024;

/// Per second, the fraction of the reserve which cycles back into the budget
/// is `CORE_ASSET_CYCLE_RATE / 2^CORE_ASSET_CYCLE_RATE_BITS`.
pub const CORE_ASSET_CYCLE_RATE: u64 = 17;
pub const CORE_ASSET_CYCLE_RATE_BITS: u32 = 32;

/// Collateral ratios are expressed in thousandths.
pub const COLLATERAL_RATIO_DENOM: u16 = 1000;
pub const MIN_COLLATERAL_RATIO: u16 = 1001;
pub const MAX_COLLATERAL_RATIO: u16 = 32000;
pub const DEFAULT_MAINTENANCE_COLLATERAL_RATIO: u16 = 1750;

/// Fractional bits of sqrt(2), seeding the near witness-shuffle stream.
pub const NEAR_SCHEDULE_IV: u64 = 0x6a09_e667_f3bc_c908;
/// Fractional bits of sqrt(3), seeding the far witness-shuffle stream.
pub const FAR_SCHEDULE_IV: u64 = 0xbb67_ae85_84ca_a73b;

/// Width of the recent-slot participation bitfield.
pub const RECENT_SLOT_WINDOW: u32 = 128;

const DAY_SECONDS: u32 = 60 * 60 * 24;

/// Flat per-operation fees, denominated in native base units. Adjustable by
/// the council through [`ParametersUpdate`](crate::operation::ParametersUpdate).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct FeeSchedule {
    pub transfer: i64,
    pub limit_order: i64,
    pub short_order: i64,
    pub call_order: i64,
    pub order_cancel: i64,
    pub settle: i64,
    pub account_create: i64,
    pub account_update: i64,
    pub membership_lifetime: i64,
    pub asset_create: i64,
    pub asset_issue: i64,
    pub publish_feed: i64,
    pub witness_create: i64,
    pub delegate_create: i64,
    pub worker_create: i64,
    pub parameters_update: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            transfer: CORE_UNIT,
            limit_order: CORE_UNIT / 10,
            short_order: CORE_UNIT / 10,
            call_order: CORE_UNIT / 10,
            order_cancel: CORE_UNIT / 100,
            settle: CORE_UNIT / 10,
            account_create: 5 * CORE_UNIT,
            account_update: CORE_UNIT / 10,
            membership_lifetime: 10_000 * CORE_UNIT,
            asset_create: 500 * CORE_UNIT,
            asset_issue: CORE_UNIT / 10,
            publish_feed: CORE_UNIT / 100,
            witness_create: 100 * CORE_UNIT,
            delegate_create: 100 * CORE_UNIT,
            worker_create: 100 * CORE_UNIT,
            parameters_update: 0,
        }
    }
}

impl FeeSchedule {
    /// A schedule with every fee zeroed; convenient for fixtures.
    pub fn zeroed() -> Self {
        Self {
            transfer: 0,
            limit_order: 0,
            short_order: 0,
            call_order: 0,
            order_cancel: 0,
            settle: 0,
            account_create: 0,
            account_update: 0,
            membership_lifetime: 0,
            asset_create: 0,
            asset_issue: 0,
            publish_feed: 0,
            witness_create: 0,
            delegate_create: 0,
            worker_create: 0,
            parameters_update: 0,
        }
    }
}

/// Tunable consensus parameters, replaced atomically at a maintenance
/// boundary when the council has approved a pending set.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ChainParameters {
    pub fee_schedule: FeeSchedule,
    /// Seconds between blocks; every timestamp is a multiple of this.
    pub block_interval: u32,
    /// Seconds between maintenance cycles.
    pub maintenance_interval: u32,
    pub max_transaction_size: u32,
    pub max_block_size: u32,
    /// Longest permitted distance between head time and a transaction's
    /// expiration.
    pub max_time_until_expiration: u32,
    pub witness_pay_per_block: i64,
    pub worker_budget_per_day: i64,
    /// Basis points of each fee routed to the network before referral splits.
    pub network_percent_of_fee: u16,
    pub lifetime_referrer_percent_of_fee: u16,
    /// Basis points of the network cut burned outright.
    pub burn_percent_of_fee: u16,
    pub max_bulk_discount_percent: u16,
    pub bulk_discount_threshold_min: i64,
    pub bulk_discount_threshold_max: i64,
    pub cashback_vesting_period_sec: u32,
    pub cashback_vesting_threshold: i64,
    pub count_non_member_votes: bool,
    pub maximum_witness_count: u16,
    pub maximum_committee_count: u16,
    pub max_authority_membership: u16,
    pub force_settlement_delay_sec: u32,
    pub force_settlement_offset_percent: u16,
    /// Basis points of a pegged asset's supply settleable per maintenance
    /// period.
    pub force_settlement_max_volume: u16,
    pub price_feed_lifetime_sec: u32,
}

impl Default for ChainParameters {
    fn default() -> Self {
        Self {
            fee_schedule: FeeSchedule::default(),
            block_interval: 5,
            maintenance_interval: DAY_SECONDS,
            max_transaction_size: 2048,
            max_block_size: 2048 * 5 * 200_000,
            max_time_until_expiration: DAY_SECONDS,
            witness_pay_per_block: 10 * CORE_UNIT,
            worker_budget_per_day: 500_000 * CORE_UNIT,
            network_percent_of_fee: 2000,
            lifetime_referrer_percent_of_fee: 3000,
            burn_percent_of_fee: 2000,
            max_bulk_discount_percent: 5000,
            bulk_discount_threshold_min: 1000 * CORE_UNIT,
            bulk_discount_threshold_max: 100_000 * CORE_UNIT,
            cashback_vesting_period_sec: 365 * DAY_SECONDS,
            cashback_vesting_threshold: 100 * CORE_UNIT,
            count_non_member_votes: true,
            maximum_witness_count: 1001,
            maximum_committee_count: 1001,
            max_authority_membership: 10,
            force_settlement_delay_sec: DAY_SECONDS,
            force_settlement_offset_percent: 0,
            force_settlement_max_volume: 2000,
            price_feed_lifetime_sec: DAY_SECONDS,
        }
    }
}

impl ChainParameters {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.block_interval == 0 {
            return Err(ValidationError::ParameterOutOfBounds("block_interval").into());
        }
        if self.maintenance_interval == 0
            || self.maintenance_interval % self.block_interval != 0
        {
            return Err(ValidationError::ParameterOutOfBounds("maintenance_interval").into());
        }
        for (name, percent) in [
            ("network_percent_of_fee", self.network_percent_of_fee),
            ("lifetime_referrer_percent_of_fee", self.lifetime_referrer_percent_of_fee),
            ("burn_percent_of_fee", self.burn_percent_of_fee),
            ("max_bulk_discount_percent", self.max_bulk_discount_percent),
            ("force_settlement_offset_percent", self.force_settlement_offset_percent),
            ("force_settlement_max_volume", self.force_settlement_max_volume),
        ] {
            if percent > HUNDRED_PERCENT {
                return Err(ValidationError::ParameterOutOfBounds(name).into());
            }
        }
        if self.network_percent_of_fee + self.lifetime_referrer_percent_of_fee > HUNDRED_PERCENT {
            return Err(ValidationError::ParameterOutOfBounds("network_percent_of_fee").into());
        }
        if self.bulk_discount_threshold_min <= 0
            || self.bulk_discount_threshold_max <= self.bulk_discount_threshold_min
        {
            return Err(ValidationError::ParameterOutOfBounds("bulk_discount_threshold_min").into());
        }
        if self.maximum_witness_count == 0 || self.maximum_committee_count == 0 {
            return Err(ValidationError::ParameterOutOfBounds("maximum_witness_count").into());
        }
        if self.max_authority_membership == 0 {
            return Err(ValidationError::ParameterOutOfBounds("max_authority_membership").into());
        }
        if self.witness_pay_per_block < 0 || self.worker_budget_per_day < 0 {
            return Err(ValidationError::ParameterOutOfBounds("witness_pay_per_block").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters_validate() {
        assert!(ChainParameters::default().validate().is_ok());
    }

    #[test]
    fn test_maintenance_must_align_with_block_interval() {
        let params = ChainParameters { maintenance_interval: 7, ..ChainParameters::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_fee_split_bounded() {
        let params = ChainParameters {
            network_percent_of_fee: 6000,
            lifetime_referrer_percent_of_fee: 6000,
            ..ChainParameters::default()
        };
        assert!(params.validate().is_err());
    }
}
