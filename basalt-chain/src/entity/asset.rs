use basalt_primitives::{AccountId, AssetId, MAX_SHARE_SUPPLY, Price};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Issuer-chosen asset parameters.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AssetOptions {
    pub max_supply: i64,
    /// Basis points charged on the receiving side of every fill.
    pub market_fee_percent: u16,
    pub min_market_fee: i64,
    pub max_market_fee: i64,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            max_supply: MAX_SHARE_SUPPLY,
            market_fee_percent: 0,
            min_market_fee: 0,
            max_market_fee: MAX_SHARE_SUPPLY,
        }
    }
}

/// A producer-published view of a pegged asset's market.
///
/// `call_limit` is quoted backing-per-pegged (the collateralization price at
/// which margin calls engage); `settlement_price` is quoted pegged-to-backing
/// and converts pegged amounts into backing for settlement.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PriceFeed {
    pub call_limit: Price,
    pub settlement_price: Price,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct FeedEntry {
    pub published: DateTime<Utc>,
    pub feed: PriceFeed,
}

/// State specific to market-pegged assets.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PeggedData {
    pub backing_asset: AssetId,
    pub feeds: BTreeMap<AccountId, FeedEntry>,
    pub current_feed: Option<PriceFeed>,
    /// Pegged units force-settled during the current maintenance period.
    pub force_settled_volume: i64,
}

impl PeggedData {
    pub fn new(backing_asset: AssetId) -> Self {
        Self {
            backing_asset,
            feeds: BTreeMap::new(),
            current_feed: None,
            force_settled_volume: 0,
        }
    }

    /// Re-derive `current_feed` as the per-field median of all feeds still
    /// inside their lifetime. Expired feeds are dropped.
    pub fn update_median_feed(&mut self, now: DateTime<Utc>, lifetime_sec: u32) {
        let cutoff = now - Duration::seconds(i64::from(lifetime_sec));
        self.feeds.retain(|_, entry| entry.published > cutoff);

        if self.feeds.is_empty() {
            self.current_feed = None;
            return;
        }

        let mut call_limits: Vec<Price> =
            self.feeds.values().map(|entry| entry.feed.call_limit).collect();
        let mut settlement_prices: Vec<Price> =
            self.feeds.values().map(|entry| entry.feed.settlement_price).collect();
        call_limits.sort_by(basalt_primitives::price::cross_cmp);
        settlement_prices.sort_by(basalt_primitives::price::cross_cmp);

        self.current_feed = Some(PriceFeed {
            call_limit: call_limits[call_limits.len() / 2],
            settlement_price: settlement_prices[settlement_prices.len() / 2],
        });
    }
}

/// An asset together with its supply accounting and optional pegged-market
/// state.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: SmolStr,
    pub issuer: AccountId,
    pub precision: u8,
    pub options: AssetOptions,
    pub current_supply: i64,
    /// Market and network fees collected in this asset, awaiting the next
    /// maintenance burn (native asset) or issuer claim.
    pub accumulated_fees: i64,
    pub pegged: Option<PeggedData>,
}

impl Asset {
    pub fn is_pegged(&self) -> bool {
        self.pegged.is_some()
    }

    pub fn charges_market_fees(&self) -> bool {
        self.options.market_fee_percent > 0 || self.options.min_market_fee > 0
    }

    /// Native-asset units that have left circulation.
    pub fn burned(&self) -> i64 {
        MAX_SHARE_SUPPLY - self.current_supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_primitives::AssetAmount;
    use chrono::TimeZone;

    const CORE: AssetId = AssetId(0);
    const USD: AssetId = AssetId(1);

    fn feed(call_core: i64, settle_core: i64) -> PriceFeed {
        PriceFeed {
            call_limit: Price::new(AssetAmount::new(call_core, CORE), AssetAmount::new(1, USD)),
            settlement_price: Price::new(
                AssetAmount::new(1, USD),
                AssetAmount::new(settle_core, CORE),
            ),
        }
    }

    #[test]
    fn test_median_feed_selection() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let mut pegged = PeggedData::new(CORE);
        for (publisher, call_core) in [(1u64, 400), (2, 500), (3, 600)] {
            pegged.feeds.insert(
                AccountId(publisher),
                FeedEntry { published: now, feed: feed(call_core, call_core) },
            );
        }

        pegged.update_median_feed(now, 3600);
        let current = pegged.current_feed.expect("three live feeds");
        assert_eq!(current.call_limit.base.amount, 500);
    }

    #[test]
    fn test_expired_feeds_dropped() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let mut pegged = PeggedData::new(CORE);
        pegged.feeds.insert(
            AccountId(1),
            FeedEntry { published: now - Duration::seconds(7200), feed: feed(500, 500) },
        );

        pegged.update_median_feed(now, 3600);
        assert!(pegged.current_feed.is_none());
        assert!(pegged.feeds.is_empty());
    }
}
