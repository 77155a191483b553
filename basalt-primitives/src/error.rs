use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by checked share arithmetic.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum ArithmeticError {
    /// A checked operation overflowed the 64-bit share range.
    #[error("share amount overflow")]
    Overflow,

    /// A result exceeded the maximum share supply of the ledger.
    #[error("amount exceeds maximum share supply")]
    SupplyExceeded,

    /// A share amount went below zero where only non-negative values are valid.
    #[error("share amount underflow")]
    Underflow,

    /// Division or price conversion with a zero denominator.
    #[error("division by zero")]
    DivisionByZero,

    /// Two amounts denominated in different assets were combined.
    #[error("asset mismatch: {0} vs {1}")]
    AssetMismatch(u64, u64),
}

/// Failures raised when validating a [`Price`](crate::Price).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum PriceError {
    #[error("price leg amount must be positive")]
    NonPositiveLeg,

    #[error("price base and quote must be distinct assets")]
    SameAsset,

    /// Two prices quoting different markets were compared or combined.
    #[error("prices quote different markets")]
    MarketMismatch,
}

/// Failures raised when validating an [`Authority`](crate::Authority).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum AuthorityError {
    #[error("weight threshold must be non-zero")]
    ZeroThreshold,

    #[error("authority member weight must be non-zero")]
    ZeroWeight,

    #[error("authority has {got} members, at most {max} permitted")]
    TooManyMembers { got: usize, max: usize },

    /// The combined member weights can never reach the threshold.
    #[error("authority is impossible to satisfy")]
    Unsatisfiable,
}

/// Failures raised when validating an asset symbol.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol exceeds {0} characters")]
    TooLong(usize),

    #[error("symbol contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("symbol must start with a letter")]
    InvalidLeadingCharacter,
}
