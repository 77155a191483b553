use crate::{error::ArithmeticError, id::AssetId};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Hard cap on the circulating supply of any asset, in base units.
pub const MAX_SHARE_SUPPLY: i64 = 1_000_000_000_000;

/// Percentages are expressed in basis points; 10 000 = 100%.
pub const HUNDRED_PERCENT: u16 = 10_000;

/// A share quantity denominated in a specific asset.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset: AssetId,
}

impl AssetAmount {
    /// Checked same-asset addition, bounded by [`MAX_SHARE_SUPPLY`].
    pub fn checked_add(&self, other: &AssetAmount) -> Result<AssetAmount, ArithmeticError> {
        self.require_same_asset(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(ArithmeticError::Overflow)?;
        if amount > MAX_SHARE_SUPPLY {
            return Err(ArithmeticError::SupplyExceeded);
        }
        Ok(AssetAmount::new(amount, self.asset))
    }

    /// Checked same-asset subtraction; the result must remain non-negative.
    pub fn checked_sub(&self, other: &AssetAmount) -> Result<AssetAmount, ArithmeticError> {
        self.require_same_asset(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(ArithmeticError::Overflow)?;
        if amount < 0 {
            return Err(ArithmeticError::Underflow);
        }
        Ok(AssetAmount::new(amount, self.asset))
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    fn require_same_asset(&self, other: &AssetAmount) -> Result<(), ArithmeticError> {
        if self.asset != other.asset {
            return Err(ArithmeticError::AssetMismatch(self.asset.0, other.asset.0));
        }
        Ok(())
    }
}

impl std::fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.amount, self.asset)
    }
}

/// Cut `basis_points` out of `amount`, widening to 128 bits for the scaling so
/// the intermediate product cannot overflow. Truncates toward zero; the result
/// never exceeds `amount`.
pub fn cut_percent(amount: i64, basis_points: u16) -> i64 {
    debug_assert!(amount >= 0);
    if amount == 0 || basis_points == 0 {
        return 0;
    }
    if basis_points >= HUNDRED_PERCENT {
        return amount;
    }
    let wide = i128::from(amount) * i128::from(basis_points) / i128::from(HUNDRED_PERCENT);
    wide as i64
}
