//! Value types shared across the basalt ledger.
//!
//! Everything here is plain data with exact arithmetic: signed 64-bit share
//! amounts widened to 128 bits for intermediate scaling, rational prices
//! compared by cross-multiplication, compact `(kind, instance)` object
//! identities, dense vote ids, and weighted-threshold authorities.

pub mod amount;
pub mod authority;
pub mod error;
pub mod id;
pub mod price;
pub mod symbol;
pub mod vote;

pub use amount::{AssetAmount, HUNDRED_PERCENT, MAX_SHARE_SUPPLY, cut_percent};
pub use authority::{Authority, SignerKey};
pub use error::{ArithmeticError, AuthorityError, PriceError, SymbolError};
pub use id::{
    AccountId, AssetId, BalanceId, CallOrderId, DelegateId, LimitOrderId, MAX_INSTANCE, ObjectId,
    ObjectKind, SettlementId, ShortOrderId, StatsId, TxRecordId, WitnessId, WorkerId,
};
pub use price::Price;
pub use symbol::validate_symbol;
pub use vote::VoteId;
