use crate::{
    amount::{AssetAmount, HUNDRED_PERCENT, MAX_SHARE_SUPPLY},
    error::{ArithmeticError, PriceError},
    id::AssetId,
};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An exact rational exchange rate between two assets, expressed as
/// `base / quote`. A price never loses precision; conversions truncate toward
/// zero only at the final step.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    /// Both legs positive, distinct assets.
    pub fn validate(&self) -> Result<(), PriceError> {
        if self.base.amount <= 0 || self.quote.amount <= 0 {
            return Err(PriceError::NonPositiveLeg);
        }
        if self.base.asset == self.quote.asset {
            return Err(PriceError::SameAsset);
        }
        Ok(())
    }

    /// The same rate quoted in the opposite direction.
    pub fn invert(&self) -> Price {
        Price::new(self.quote, self.base)
    }

    /// True if `other` quotes the same market in the same orientation.
    pub fn same_market(&self, other: &Price) -> bool {
        self.base.asset == other.base.asset && self.quote.asset == other.quote.asset
    }

    /// Convert `amount` across this price, truncating toward zero. The amount
    /// must be denominated in one of the two legs; the result is in the other.
    pub fn convert(&self, amount: &AssetAmount) -> Result<AssetAmount, ArithmeticError> {
        debug_assert!(self.validate().is_ok());
        if amount.asset == self.base.asset {
            if self.base.amount == 0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            let wide =
                i128::from(amount.amount) * i128::from(self.quote.amount) / i128::from(self.base.amount);
            Ok(AssetAmount::new(clamp_share(wide)?, self.quote.asset))
        } else if amount.asset == self.quote.asset {
            if self.quote.amount == 0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            let wide =
                i128::from(amount.amount) * i128::from(self.base.amount) / i128::from(self.quote.amount);
            Ok(AssetAmount::new(clamp_share(wide)?, self.base.asset))
        } else {
            Err(ArithmeticError::AssetMismatch(amount.asset.0, self.base.asset.0))
        }
    }

    /// Compare two prices quoting the same market by cross-multiplication.
    pub fn cmp_in_market(&self, other: &Price) -> Result<Ordering, PriceError> {
        if !self.same_market(other) {
            return Err(PriceError::MarketMismatch);
        }
        Ok(cross_cmp(self, other))
    }

    /// This price with its quote leg reduced by `offset` basis points; used to
    /// apply the forced-settlement discount without losing exactness.
    pub fn discount_quote(&self, offset: u16) -> Price {
        let keep = i64::from(HUNDRED_PERCENT.saturating_sub(offset).max(1));
        Price::new(
            AssetAmount::new(self.base.amount * i64::from(HUNDRED_PERCENT), self.base.asset),
            AssetAmount::new(self.quote.amount * keep, self.quote.asset),
        )
    }

    /// The smallest representable price in the `base / quote` market; used as
    /// a range-scan bound, never as a tradable rate.
    pub fn market_min(base: AssetId, quote: AssetId) -> Price {
        Price::new(AssetAmount::new(1, base), AssetAmount::new(MAX_SHARE_SUPPLY, quote))
    }

    /// The largest representable price in the `base / quote` market.
    pub fn market_max(base: AssetId, quote: AssetId) -> Price {
        Price::new(AssetAmount::new(MAX_SHARE_SUPPLY, base), AssetAmount::new(1, quote))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.base, self.quote)
    }
}

/// Cross-multiplied comparison of two prices in the same market orientation.
/// Amounts are capped at [`MAX_SHARE_SUPPLY`], so the 128-bit products are
/// exact.
pub fn cross_cmp(a: &Price, b: &Price) -> Ordering {
    debug_assert!(a.same_market(b));
    let lhs = i128::from(a.base.amount) * i128::from(b.quote.amount);
    let rhs = i128::from(b.base.amount) * i128::from(a.quote.amount);
    lhs.cmp(&rhs)
}

fn clamp_share(wide: i128) -> Result<i64, ArithmeticError> {
    if wide > i128::from(MAX_SHARE_SUPPLY) {
        return Err(ArithmeticError::SupplyExceeded);
    }
    if wide < 0 {
        return Err(ArithmeticError::Underflow);
    }
    Ok(wide as i64)
}
