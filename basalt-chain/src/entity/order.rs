use basalt_primitives::{
    AccountId, ArithmeticError, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price,
    SettlementId, ShortOrderId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::COLLATERAL_RATIO_DENOM;

/// An offer to sell `for_sale` units of `sell_price.base.asset` at
/// `sell_price`. The sold units are locked while the order is open.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LimitOrder {
    pub id: LimitOrderId,
    pub seller: AccountId,
    pub for_sale: i64,
    pub sell_price: Price,
    pub expiration: DateTime<Utc>,
}

impl LimitOrder {
    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sell_price.base.asset)
    }

    pub fn amount_to_receive(&self) -> Result<AssetAmount, ArithmeticError> {
        self.sell_price.convert(&self.amount_for_sale())
    }
}

/// An offer to mint and sell `for_sale` units of a pegged asset against
/// pledged backing collateral. Filling a short creates or grows the seller's
/// call order.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ShortOrder {
    pub id: ShortOrderId,
    pub seller: AccountId,
    /// Pegged units still offered; quoted by `sell_price.base`.
    pub for_sale: i64,
    pub sell_price: Price,
    /// Backing units still pledged behind the unfilled remainder.
    pub available_collateral: i64,
    pub maintenance_collateral_ratio: u16,
    pub expiration: DateTime<Utc>,
}

impl ShortOrder {
    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sell_price.base.asset)
    }

    pub fn amount_to_receive(&self) -> Result<AssetAmount, ArithmeticError> {
        self.sell_price.convert(&self.amount_for_sale())
    }

    pub fn collateral_asset(&self) -> AssetId {
        self.sell_price.quote.asset
    }

    pub fn amount_of_collateral(&self) -> AssetAmount {
        AssetAmount::new(self.available_collateral, self.collateral_asset())
    }
}

/// A collateralized debt position in a pegged asset. `call_price` is the
/// derived margin trigger, backing-per-pegged, refreshed on every mutation.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct CallOrder {
    pub id: CallOrderId,
    pub borrower: AccountId,
    /// Backing units held as collateral.
    pub collateral: i64,
    /// Pegged units owed.
    pub debt: i64,
    pub maintenance_collateral_ratio: u16,
    pub call_price: Price,
}

impl CallOrder {
    pub fn collateral_asset(&self) -> AssetId {
        self.call_price.base.asset
    }

    pub fn debt_asset(&self) -> AssetId {
        self.call_price.quote.asset
    }

    pub fn amount_of_collateral(&self) -> AssetAmount {
        AssetAmount::new(self.collateral, self.collateral_asset())
    }

    pub fn amount_of_debt(&self) -> AssetAmount {
        AssetAmount::new(self.debt, self.debt_asset())
    }

    /// Recompute the margin trigger:
    /// `collateral / (debt * mcr / 1000)` backing-per-pegged. Legs are kept
    /// at a minimum of one unit so the price stays valid while the position
    /// is being torn down.
    pub fn update_call_price(&mut self) {
        let scaled_debt = i128::from(self.debt) * i128::from(self.maintenance_collateral_ratio)
            / i128::from(COLLATERAL_RATIO_DENOM);
        self.call_price = Price::new(
            AssetAmount::new(self.collateral.max(1), self.collateral_asset()),
            AssetAmount::new((scaled_debt as i64).max(1), self.debt_asset()),
        );
    }
}

/// A queued redemption of pegged units at the feed price, eligible once
/// `settlement_date` is reached. The balance is locked on creation.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ForceSettlement {
    pub id: SettlementId,
    pub owner: AccountId,
    pub balance: AssetAmount,
    pub settlement_date: DateTime<Utc>,
}
