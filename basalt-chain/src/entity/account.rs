use basalt_primitives::{AccountId, Authority, StatsId, VoteId, cut_percent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeSet;

use crate::config::ChainParameters;

/// The voting preferences an account expresses. When `voting_account` is set
/// the referenced account's options are tallied in place of these.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct AccountOptions {
    pub voting_account: Option<AccountId>,
    /// Preferred size of the active witness set.
    pub num_witness: u16,
    /// Preferred size of the active committee.
    pub num_committee: u16,
    pub votes: BTreeSet<VoteId>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub name: SmolStr,
    pub registrar: AccountId,
    pub referrer: AccountId,
    pub lifetime_referrer: AccountId,
    /// Basis points of this account's fees routed to the network.
    pub network_fee_percentage: u16,
    /// Basis points routed to the lifetime referrer.
    pub lifetime_referrer_fee_percentage: u16,
    /// Referrer's share of the referral split, in basis points.
    pub referrer_rewards_percentage: u16,
    /// `None`: never a member. `MAX_UTC`: lifetime member.
    pub membership_expiration: Option<DateTime<Utc>>,
    pub owner: Authority,
    pub active: Authority,
    pub statistics: StatsId,
    pub options: AccountOptions,
}

impl Account {
    pub fn is_member(&self, now: DateTime<Utc>) -> bool {
        self.membership_expiration.is_some_and(|expiration| expiration > now)
    }

    pub fn is_lifetime_member(&self) -> bool {
        self.membership_expiration == Some(DateTime::<Utc>::MAX_UTC)
    }
}

/// Fee and order bookkeeping, 1:1 with an account.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AccountStats {
    pub id: StatsId,
    pub account: AccountId,
    /// Native units locked in this account's open orders and collateral.
    pub total_core_in_orders: i64,
    pub lifetime_fees_paid: i64,
    /// Fees awaiting disbursement whose cashback must vest.
    pub pending_fees: i64,
    /// Fees awaiting disbursement whose cashback pays out immediately.
    pub pending_vested_fees: i64,
    pub cashback_vested: i64,
    pub cashback_vesting: i64,
}

impl AccountStats {
    pub fn new(id: StatsId, account: AccountId) -> Self {
        Self {
            id,
            account,
            total_core_in_orders: 0,
            lifetime_fees_paid: 0,
            pending_fees: 0,
            pending_vested_fees: 0,
            cashback_vested: 0,
            cashback_vesting: 0,
        }
    }

    pub fn cashback_total(&self) -> i64 {
        self.cashback_vested + self.cashback_vesting
    }

    /// Linear interpolation of the bulk fee discount across the configured
    /// lifetime-fee thresholds, clamped to the maximum.
    pub fn bulk_discount_percent(&self, parameters: &ChainParameters) -> u16 {
        if self.lifetime_fees_paid <= parameters.bulk_discount_threshold_min {
            return 0;
        }
        if self.lifetime_fees_paid >= parameters.bulk_discount_threshold_max {
            return parameters.max_bulk_discount_percent;
        }
        let span = parameters.bulk_discount_threshold_max - parameters.bulk_discount_threshold_min;
        let progress = self.lifetime_fees_paid - parameters.bulk_discount_threshold_min;
        let scaled = i128::from(parameters.max_bulk_discount_percent) * i128::from(progress)
            / i128::from(span);
        scaled as u16
    }
}

/// Split a pending fee subtotal by the discount rate computed for `stats`.
pub fn bulk_discount_cut(stats: &AccountStats, parameters: &ChainParameters, subtotal: i64) -> i64 {
    cut_percent(subtotal, stats.bulk_discount_percent(parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_primitives::SignerKey;

    fn stats_with_lifetime_fees(paid: i64) -> AccountStats {
        AccountStats { lifetime_fees_paid: paid, ..AccountStats::new(StatsId(1), AccountId(1)) }
    }

    #[test]
    fn test_bulk_discount_interpolation() {
        struct TestCase {
            lifetime_fees_paid: i64,
            expected: u16,
        }

        let params = ChainParameters {
            bulk_discount_threshold_min: 1_000,
            bulk_discount_threshold_max: 11_000,
            max_bulk_discount_percent: 5000,
            ..ChainParameters::default()
        };

        let tests = vec![
            TestCase { lifetime_fees_paid: 0, expected: 0 },
            TestCase { lifetime_fees_paid: 1_000, expected: 0 },
            TestCase { lifetime_fees_paid: 6_000, expected: 2500 },
            TestCase { lifetime_fees_paid: 11_000, expected: 5000 },
            TestCase { lifetime_fees_paid: 50_000, expected: 5000 },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let stats = stats_with_lifetime_fees(test.lifetime_fees_paid);
            assert_eq!(stats.bulk_discount_percent(&params), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_membership() {
        let now = Utc::now();
        let mut account = Account {
            id: AccountId(1),
            name: SmolStr::new("alice"),
            registrar: AccountId(0),
            referrer: AccountId(0),
            lifetime_referrer: AccountId(0),
            network_fee_percentage: 2000,
            lifetime_referrer_fee_percentage: 3000,
            referrer_rewards_percentage: 0,
            membership_expiration: None,
            owner: Authority::single_key(SignerKey::from_name("alice-owner")),
            active: Authority::single_key(SignerKey::from_name("alice-active")),
            statistics: StatsId(1),
            options: AccountOptions::default(),
        };
        assert!(!account.is_member(now));

        account.membership_expiration = Some(DateTime::<Utc>::MAX_UTC);
        assert!(account.is_member(now));
        assert!(account.is_lifetime_member());
    }
}
