use basalt_primitives::{
    AccountId, AssetId, BalanceId, CallOrderId, LimitOrderId, Price, SettlementId, ShortOrderId,
    TxRecordId,
    price::cross_cmp,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::{block::TransactionId, entity::Entity, store::StoreError};

/// Book key for limit orders: grouped by market, best price first (sell
/// price descending), identity breaking ties. Raw price legs participate in
/// the ordering after the cross-multiplied comparison so `Ord` stays
/// consistent with `Eq` for distinct representations of the same rate.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LimitOrderKey {
    pub market: (AssetId, AssetId),
    pub price: Price,
    pub id: LimitOrderId,
}

impl LimitOrderKey {
    pub fn new(price: Price, id: LimitOrderId) -> Self {
        Self { market: (price.base.asset, price.quote.asset), price, id }
    }

    /// First key of the market scan: at or above every real price.
    pub fn market_start(base: AssetId, quote: AssetId) -> Self {
        Self {
            market: (base, quote),
            price: Price::market_max(base, quote),
            id: LimitOrderId(0),
        }
    }

    /// Last key of the market scan: at or below every real price.
    pub fn market_end(base: AssetId, quote: AssetId) -> Self {
        Self {
            market: (base, quote),
            price: Price::market_min(base, quote),
            id: LimitOrderId(u64::MAX),
        }
    }

    /// Last key still priced at-or-better than `floor`.
    pub fn price_floor(floor: Price) -> Self {
        Self {
            market: (floor.base.asset, floor.quote.asset),
            price: floor,
            id: LimitOrderId(u64::MAX),
        }
    }
}

impl Ord for LimitOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.market
            .cmp(&other.market)
            // Descending price: the best offer sorts first within its market.
            .then_with(|| cross_cmp(&other.price, &self.price))
            .then_with(|| {
                (self.price.base.amount, self.price.quote.amount)
                    .cmp(&(other.price.base.amount, other.price.quote.amount))
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for LimitOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Book key for short orders; same shape and ordering as the limit book.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ShortOrderKey {
    pub market: (AssetId, AssetId),
    pub price: Price,
    pub id: ShortOrderId,
}

impl ShortOrderKey {
    pub fn new(price: Price, id: ShortOrderId) -> Self {
        Self { market: (price.base.asset, price.quote.asset), price, id }
    }

    pub fn market_start(base: AssetId, quote: AssetId) -> Self {
        Self {
            market: (base, quote),
            price: Price::market_max(base, quote),
            id: ShortOrderId(0),
        }
    }

    pub fn market_end(base: AssetId, quote: AssetId) -> Self {
        Self {
            market: (base, quote),
            price: Price::market_min(base, quote),
            id: ShortOrderId(u64::MAX),
        }
    }

    pub fn price_floor(floor: Price) -> Self {
        Self {
            market: (floor.base.asset, floor.quote.asset),
            price: floor,
            id: ShortOrderId(u64::MAX),
        }
    }
}

impl Ord for ShortOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.market
            .cmp(&other.market)
            .then_with(|| cross_cmp(&other.price, &self.price))
            .then_with(|| {
                (self.price.base.amount, self.price.quote.amount)
                    .cmp(&(other.price.base.amount, other.price.quote.amount))
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ShortOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Book key for call orders: grouped by `(collateral asset, debt asset)`,
/// least-collateralized (lowest call price) first.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct CallOrderKey {
    pub market: (AssetId, AssetId),
    pub price: Price,
    pub id: CallOrderId,
}

impl CallOrderKey {
    pub fn new(price: Price, id: CallOrderId) -> Self {
        Self { market: (price.base.asset, price.quote.asset), price, id }
    }

    pub fn market_start(collateral: AssetId, debt: AssetId) -> Self {
        Self {
            market: (collateral, debt),
            price: Price::market_min(collateral, debt),
            id: CallOrderId(0),
        }
    }

    pub fn market_end(collateral: AssetId, debt: AssetId) -> Self {
        Self {
            market: (collateral, debt),
            price: Price::market_max(collateral, debt),
            id: CallOrderId(u64::MAX),
        }
    }
}

impl Ord for CallOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.market
            .cmp(&other.market)
            // Ascending call price: the most at-risk position sorts first.
            .then_with(|| cross_cmp(&self.price, &other.price))
            .then_with(|| {
                (self.price.base.amount, self.price.quote.amount)
                    .cmp(&(other.price.base.amount, other.price.quote.amount))
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for CallOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All secondary orderings, maintained incrementally on every store write.
/// Everything that is ever iterated is a `BTree` collection; the transaction
/// dedup map is point-lookup only.
#[derive(Debug, Default)]
pub struct Indexes {
    pub account_by_name: BTreeMap<SmolStr, AccountId>,
    pub asset_by_symbol: BTreeMap<SmolStr, AssetId>,
    pub balance_by_owner: BTreeMap<(AccountId, AssetId), BalanceId>,
    pub balance_by_asset: BTreeMap<(AssetId, AccountId), BalanceId>,
    pub limit_by_price: BTreeSet<LimitOrderKey>,
    pub limit_by_expiry: BTreeSet<(DateTime<Utc>, LimitOrderId)>,
    pub short_by_price: BTreeSet<ShortOrderKey>,
    pub short_by_expiry: BTreeSet<(DateTime<Utc>, ShortOrderId)>,
    pub call_by_price: BTreeSet<CallOrderKey>,
    pub call_by_borrower: BTreeMap<(AccountId, AssetId), CallOrderId>,
    pub settlement_by_date: BTreeSet<(AssetId, DateTime<Utc>, SettlementId)>,
    pub tx_by_id: FnvHashMap<TransactionId, TxRecordId>,
    pub tx_by_expiry: BTreeSet<(DateTime<Utc>, TxRecordId)>,
}

impl Indexes {
    /// Uniqueness pre-check, run before any mutation so a rejected insert
    /// leaves every index untouched.
    pub fn check_insert(&self, entity: &Entity) -> Result<(), StoreError> {
        match entity {
            Entity::Account(account) => {
                if self.account_by_name.contains_key(&account.name) {
                    return Err(StoreError::DuplicateAccountName(account.name.clone()));
                }
            }
            Entity::Asset(asset) => {
                if self.asset_by_symbol.contains_key(&asset.symbol) {
                    return Err(StoreError::DuplicateAssetSymbol(asset.symbol.clone()));
                }
            }
            Entity::Balance(balance) => {
                if self.balance_by_owner.contains_key(&(balance.owner, balance.asset)) {
                    return Err(StoreError::DuplicateBalance(balance.owner, balance.asset));
                }
            }
            Entity::CallOrder(call) => {
                if self.call_by_borrower.contains_key(&(call.borrower, call.debt_asset())) {
                    return Err(StoreError::DuplicateCallOrder(call.borrower, call.debt_asset()));
                }
            }
            Entity::Transaction(record) => {
                if self.tx_by_id.contains_key(&record.tx_id) {
                    return Err(StoreError::DuplicateTransaction(record.tx_id));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn insert(&mut self, entity: &Entity) {
        match entity {
            Entity::Account(account) => {
                self.account_by_name.insert(account.name.clone(), account.id);
            }
            Entity::Asset(asset) => {
                self.asset_by_symbol.insert(asset.symbol.clone(), asset.id);
            }
            Entity::Balance(balance) => {
                self.balance_by_owner.insert((balance.owner, balance.asset), balance.id);
                self.balance_by_asset.insert((balance.asset, balance.owner), balance.id);
            }
            Entity::LimitOrder(order) => {
                self.limit_by_price.insert(LimitOrderKey::new(order.sell_price, order.id));
                self.limit_by_expiry.insert((order.expiration, order.id));
            }
            Entity::ShortOrder(order) => {
                self.short_by_price.insert(ShortOrderKey::new(order.sell_price, order.id));
                self.short_by_expiry.insert((order.expiration, order.id));
            }
            Entity::CallOrder(call) => {
                self.call_by_price.insert(CallOrderKey::new(call.call_price, call.id));
                self.call_by_borrower.insert((call.borrower, call.debt_asset()), call.id);
            }
            Entity::ForceSettlement(settlement) => {
                self.settlement_by_date.insert((
                    settlement.balance.asset,
                    settlement.settlement_date,
                    settlement.id,
                ));
            }
            Entity::Transaction(record) => {
                self.tx_by_id.insert(record.tx_id, record.id);
                self.tx_by_expiry.insert((record.expiration, record.id));
            }
            _ => {}
        }
    }

    pub fn remove(&mut self, entity: &Entity) {
        match entity {
            Entity::Account(account) => {
                self.account_by_name.remove(&account.name);
            }
            Entity::Asset(asset) => {
                self.asset_by_symbol.remove(&asset.symbol);
            }
            Entity::Balance(balance) => {
                self.balance_by_owner.remove(&(balance.owner, balance.asset));
                self.balance_by_asset.remove(&(balance.asset, balance.owner));
            }
            Entity::LimitOrder(order) => {
                self.limit_by_price.remove(&LimitOrderKey::new(order.sell_price, order.id));
                self.limit_by_expiry.remove(&(order.expiration, order.id));
            }
            Entity::ShortOrder(order) => {
                self.short_by_price.remove(&ShortOrderKey::new(order.sell_price, order.id));
                self.short_by_expiry.remove(&(order.expiration, order.id));
            }
            Entity::CallOrder(call) => {
                self.call_by_price.remove(&CallOrderKey::new(call.call_price, call.id));
                self.call_by_borrower.remove(&(call.borrower, call.debt_asset()));
            }
            Entity::ForceSettlement(settlement) => {
                self.settlement_by_date.remove(&(
                    settlement.balance.asset,
                    settlement.settlement_date,
                    settlement.id,
                ));
            }
            Entity::Transaction(record) => {
                self.tx_by_id.remove(&record.tx_id);
                self.tx_by_expiry.remove(&(record.expiration, record.id));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_primitives::AssetAmount;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn key(base: i64, quote: i64, id: u64) -> LimitOrderKey {
        LimitOrderKey::new(
            Price::new(AssetAmount::new(base, USD), AssetAmount::new(quote, CORE)),
            LimitOrderId(id),
        )
    }

    #[test]
    fn test_limit_book_orders_best_first() {
        let mut book = BTreeSet::new();
        book.insert(key(1, 2, 10)); // 0.5 USD/CORE
        book.insert(key(2, 1, 11)); // 2.0 USD/CORE (best offer of USD)
        book.insert(key(1, 1, 12)); // 1.0 USD/CORE

        let ids: Vec<u64> = book
            .range(LimitOrderKey::market_start(USD, CORE)..=LimitOrderKey::market_end(USD, CORE))
            .map(|k| k.id.0)
            .collect();
        assert_eq!(ids, vec![11, 12, 10]);
    }

    #[test]
    fn test_equal_prices_tie_break_by_identity() {
        let mut book = BTreeSet::new();
        book.insert(key(1, 1, 20));
        book.insert(key(1, 1, 7));
        // Same rate written differently still groups with the raw legs as a
        // secondary key, identity last.
        book.insert(key(2, 2, 9));

        let ids: Vec<u64> = book.iter().map(|k| k.id.0).collect();
        assert_eq!(ids, vec![7, 20, 9]);
    }

    #[test]
    fn test_price_floor_bounds_scan() {
        let mut book = BTreeSet::new();
        book.insert(key(3, 1, 1)); // 3.0
        book.insert(key(1, 1, 2)); // 1.0
        book.insert(key(1, 2, 3)); // 0.5

        let floor = Price::new(AssetAmount::new(1, USD), AssetAmount::new(1, CORE));
        let ids: Vec<u64> = book
            .range(LimitOrderKey::market_start(USD, CORE)..=LimitOrderKey::price_floor(floor))
            .map(|k| k.id.0)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_call_book_orders_most_at_risk_first() {
        let mut book = BTreeSet::new();
        let call_key = |collateral: i64, debt: i64, id: u64| {
            CallOrderKey::new(
                Price::new(AssetAmount::new(collateral, CORE), AssetAmount::new(debt, USD)),
                CallOrderId(id),
            )
        };
        book.insert(call_key(1000, 1, 1));
        book.insert(call_key(100, 1, 2));
        book.insert(call_key(500, 1, 3));

        let ids: Vec<u64> = book.iter().map(|k| k.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
