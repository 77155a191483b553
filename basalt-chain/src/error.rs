use basalt_primitives::{
    ArithmeticError, AuthorityError, ObjectId, PriceError, SymbolError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Top-level failure taxonomy of ledger state transitions. The kind decides
/// how far the failure unwinds: validation, authorization, precondition and
/// scheduling errors reject the offending input; invariant violations reject
/// the whole block and refuse to advance state.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Error)]
pub enum LedgerError {
    /// Malformed input, rejected before any state change.
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    /// The provided signer set does not satisfy the required authority.
    #[error("authorization: account {account} authority not satisfied")]
    Authorization { account: ObjectId },

    /// Referenced state is absent or in a state that forbids the operation.
    #[error("precondition: {0}")]
    Precondition(#[from] PreconditionError),

    /// An internal consistency check tripped; fatal for the block.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Block-level scheduling rules were broken.
    #[error("scheduling: {0}")]
    Scheduling(#[from] SchedulingError),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Error)]
pub enum ValidationError {
    #[error("symbol: {0}")]
    Symbol(#[from] SymbolError),

    #[error("price: {0}")]
    Price(#[from] PriceError),

    #[error("authority: {0}")]
    Authority(#[from] AuthorityError),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("fee {got} below required {required}")]
    InsufficientFee { got: i64, required: i64 },

    #[error("fee must be paid in the native asset")]
    FeeAssetNotNative,

    #[error("account name {0:?} is invalid")]
    BadAccountName(SmolStr),

    #[error("transaction expired at {expiration}, head time {now}")]
    TransactionExpired { expiration: DateTime<Utc>, now: DateTime<Utc> },

    #[error("transaction expiration {expiration} too far past head time {now}")]
    TransactionExpirationTooFar { expiration: DateTime<Utc>, now: DateTime<Utc> },

    #[error("duplicate transaction within its expiration window")]
    DuplicateTransaction,

    #[error("transaction size {got} exceeds maximum {max}")]
    TransactionTooLarge { got: usize, max: usize },

    #[error("transaction contains no operations")]
    EmptyTransaction,

    #[error("block size {got} exceeds maximum {max}")]
    BlockTooLarge { got: usize, max: usize },

    #[error("order expiration must be after head time")]
    OrderExpirationInPast,

    #[error("collateral ratio {0} outside permitted bounds")]
    CollateralRatioOutOfBounds(u16),

    #[error("percentage {0} exceeds 100%")]
    PercentageOutOfBounds(u16),

    #[error("parameter {0} is out of bounds")]
    ParameterOutOfBounds(&'static str),
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum PreconditionError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("object kind mismatch at {0}")]
    KindMismatch(ObjectId),

    #[error("account name {0:?} already registered")]
    DuplicateAccountName(SmolStr),

    #[error("asset symbol {0:?} already registered")]
    DuplicateAssetSymbol(SmolStr),

    #[error("no account named {0:?}")]
    NoSuchAccountName(SmolStr),

    #[error("insufficient balance: account {account} has {available}, needs {required}")]
    InsufficientBalance { account: ObjectId, available: i64, required: i64 },

    #[error("asset {0} is not market-pegged")]
    NotMarketPegged(ObjectId),

    #[error("asset {0} is market-pegged")]
    MarketPegged(ObjectId),

    #[error("asset {0} has no valid price feed")]
    NoPriceFeed(ObjectId),

    #[error("account {0} is not an active feed producer")]
    NotFeedProducer(ObjectId),

    #[error("registrar {0} is not a member")]
    RegistrarNotMember(ObjectId),

    #[error("account {0} is already a lifetime member")]
    AlreadyLifetimeMember(ObjectId),

    #[error("order {0} not owned by fee payer")]
    NotOrderOwner(ObjectId),

    #[error("position would be undercollateralized")]
    Undercollateralized,

    #[error("issuer mismatch for asset {0}")]
    IssuerMismatch(ObjectId),

    #[error("arithmetic: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum SchedulingError {
    #[error("block parent mismatch")]
    BadParent,

    #[error("block timestamp {0} is not after head time")]
    TimestampNotAfterHead(DateTime<Utc>),

    #[error("block timestamp {0} is not a multiple of the block interval")]
    TimestampOffGrid(DateTime<Utc>),

    #[error("block produced out of slot: got witness {got}, scheduled {scheduled}")]
    WrongWitness { got: ObjectId, scheduled: ObjectId },

    #[error("block signature does not match the witness signing key")]
    BadProducerKey,

    #[error("no witnesses are scheduled")]
    EmptySchedule,
}

impl From<ArithmeticError> for LedgerError {
    fn from(value: ArithmeticError) -> Self {
        LedgerError::Precondition(PreconditionError::Arithmetic(value))
    }
}

impl From<SymbolError> for LedgerError {
    fn from(value: SymbolError) -> Self {
        LedgerError::Validation(ValidationError::Symbol(value))
    }
}

impl From<PriceError> for LedgerError {
    fn from(value: PriceError) -> Self {
        LedgerError::Validation(ValidationError::Price(value))
    }
}

impl From<AuthorityError> for LedgerError {
    fn from(value: AuthorityError) -> Self {
        LedgerError::Validation(ValidationError::Authority(value))
    }
}
