//! The closed set of ledger operations and the applied-operation stream.
//!
//! Every operation names its fee and fee payer explicitly; evaluation lives
//! in [`apply`]. Synthetic [`FillOrder`] records are produced by the market
//! engine and appear only in the applied stream, never inside transactions.

pub mod apply;

use basalt_primitives::{
    AccountId, AssetAmount, AssetId, Authority, LimitOrderId, ObjectId, ShortOrderId, SignerKey,
};
use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
    config::ChainParameters,
    entity::{AccountOptions, AssetOptions, PriceFeed, WorkerKind},
};

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Transfer {
    pub fee: AssetAmount,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AccountCreate {
    pub fee: AssetAmount,
    pub registrar: AccountId,
    pub referrer: AccountId,
    /// Referrer's share of the referral fee split, in basis points.
    pub referrer_rewards_percentage: u16,
    pub name: SmolStr,
    pub owner: Authority,
    pub active: Authority,
    pub options: AccountOptions,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AccountUpdate {
    pub fee: AssetAmount,
    pub account: AccountId,
    /// Changing the owner authority requires owner-level authorization.
    pub new_owner: Option<Authority>,
    pub new_active: Option<Authority>,
    pub new_options: Option<AccountOptions>,
}

/// Upgrade to lifetime membership.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AccountUpgrade {
    pub fee: AssetAmount,
    pub account: AccountId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AssetCreate {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub symbol: SmolStr,
    pub precision: u8,
    pub options: AssetOptions,
    /// `Some` creates a market-pegged asset collateralized by this backing.
    pub backing_asset: Option<AssetId>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AssetIssue {
    pub fee: AssetAmount,
    pub issuer: AccountId,
    pub amount: AssetAmount,
    pub issue_to: AccountId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PublishFeed {
    pub fee: AssetAmount,
    pub publisher: AccountId,
    pub asset: AssetId,
    pub feed: PriceFeed,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LimitOrderCreate {
    pub fee: AssetAmount,
    pub seller: AccountId,
    pub amount_to_sell: AssetAmount,
    pub min_to_receive: AssetAmount,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LimitOrderCancel {
    pub fee: AssetAmount,
    pub fee_paying_account: AccountId,
    pub order: LimitOrderId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ShortOrderCreate {
    pub fee: AssetAmount,
    pub seller: AccountId,
    /// Pegged units to mint and sell when matched.
    pub amount_to_sell: AssetAmount,
    /// Backing units wanted for the full sale; fixes the sell price.
    pub min_to_receive: AssetAmount,
    /// Backing units pledged behind the short.
    pub collateral: AssetAmount,
    /// Zero selects the chain default.
    pub maintenance_collateral_ratio: u16,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ShortOrderCancel {
    pub fee: AssetAmount,
    pub fee_paying_account: AccountId,
    pub order: ShortOrderId,
}

/// Adjust a margin position: positive deltas deposit collateral / borrow
/// more (minting), negative deltas withdraw / repay (burning).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct CallOrderUpdate {
    pub fee: AssetAmount,
    pub funding_account: AccountId,
    pub delta_collateral: AssetAmount,
    pub delta_debt: AssetAmount,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ForceSettle {
    pub fee: AssetAmount,
    pub account: AccountId,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WitnessCreate {
    pub fee: AssetAmount,
    pub witness_account: AccountId,
    pub signing_key: SignerKey,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct DelegateCreate {
    pub fee: AssetAmount,
    pub delegate_account: AccountId,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WorkerCreate {
    pub fee: AssetAmount,
    pub owner: AccountId,
    pub daily_pay: i64,
    pub work_begin: DateTime<Utc>,
    pub work_end: DateTime<Utc>,
    pub kind: WorkerKind,
}

/// Council-authorized replacement parameters; activate at the next
/// maintenance boundary.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ParametersUpdate {
    pub fee: AssetAmount,
    pub new_parameters: ChainParameters,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, From)]
pub enum Operation {
    Transfer(Transfer),
    AccountCreate(AccountCreate),
    AccountUpdate(AccountUpdate),
    AccountUpgrade(AccountUpgrade),
    AssetCreate(AssetCreate),
    AssetIssue(AssetIssue),
    PublishFeed(PublishFeed),
    LimitOrderCreate(LimitOrderCreate),
    LimitOrderCancel(LimitOrderCancel),
    ShortOrderCreate(ShortOrderCreate),
    ShortOrderCancel(ShortOrderCancel),
    CallOrderUpdate(CallOrderUpdate),
    ForceSettle(ForceSettle),
    WitnessCreate(WitnessCreate),
    DelegateCreate(DelegateCreate),
    WorkerCreate(WorkerCreate),
    ParametersUpdate(ParametersUpdate),
}

impl Operation {
    pub fn fee(&self) -> AssetAmount {
        match self {
            Operation::Transfer(op) => op.fee,
            Operation::AccountCreate(op) => op.fee,
            Operation::AccountUpdate(op) => op.fee,
            Operation::AccountUpgrade(op) => op.fee,
            Operation::AssetCreate(op) => op.fee,
            Operation::AssetIssue(op) => op.fee,
            Operation::PublishFeed(op) => op.fee,
            Operation::LimitOrderCreate(op) => op.fee,
            Operation::LimitOrderCancel(op) => op.fee,
            Operation::ShortOrderCreate(op) => op.fee,
            Operation::ShortOrderCancel(op) => op.fee,
            Operation::CallOrderUpdate(op) => op.fee,
            Operation::ForceSettle(op) => op.fee,
            Operation::WitnessCreate(op) => op.fee,
            Operation::DelegateCreate(op) => op.fee,
            Operation::WorkerCreate(op) => op.fee,
            Operation::ParametersUpdate(op) => op.fee,
        }
    }

    /// Account charged the fee; also the account whose authority must be
    /// satisfied.
    pub fn fee_payer(&self) -> AccountId {
        match self {
            Operation::Transfer(op) => op.from,
            Operation::AccountCreate(op) => op.registrar,
            Operation::AccountUpdate(op) => op.account,
            Operation::AccountUpgrade(op) => op.account,
            Operation::AssetCreate(op) => op.issuer,
            Operation::AssetIssue(op) => op.issuer,
            Operation::PublishFeed(op) => op.publisher,
            Operation::LimitOrderCreate(op) => op.seller,
            Operation::LimitOrderCancel(op) => op.fee_paying_account,
            Operation::ShortOrderCreate(op) => op.seller,
            Operation::ShortOrderCancel(op) => op.fee_paying_account,
            Operation::CallOrderUpdate(op) => op.funding_account,
            Operation::ForceSettle(op) => op.account,
            Operation::WitnessCreate(op) => op.witness_account,
            Operation::DelegateCreate(op) => op.delegate_account,
            Operation::WorkerCreate(op) => op.owner,
            // The council account authorizes parameter changes.
            Operation::ParametersUpdate(_) => AccountId(0),
        }
    }

    /// Whether owner-level authorization is required instead of active.
    pub fn requires_owner_authority(&self) -> bool {
        matches!(self, Operation::AccountUpdate(op) if op.new_owner.is_some())
    }

    pub fn required_fee(&self, parameters: &ChainParameters) -> i64 {
        let schedule = &parameters.fee_schedule;
        match self {
            Operation::Transfer(_) => schedule.transfer,
            Operation::AccountCreate(_) => schedule.account_create,
            Operation::AccountUpdate(_) => schedule.account_update,
            Operation::AccountUpgrade(_) => schedule.membership_lifetime,
            Operation::AssetCreate(_) => schedule.asset_create,
            Operation::AssetIssue(_) => schedule.asset_issue,
            Operation::PublishFeed(_) => schedule.publish_feed,
            Operation::LimitOrderCreate(_) => schedule.limit_order,
            Operation::LimitOrderCancel(_) => schedule.order_cancel,
            Operation::ShortOrderCreate(_) => schedule.short_order,
            Operation::ShortOrderCancel(_) => schedule.order_cancel,
            Operation::CallOrderUpdate(_) => schedule.call_order,
            Operation::ForceSettle(_) => schedule.settle,
            Operation::WitnessCreate(_) => schedule.witness_create,
            Operation::DelegateCreate(_) => schedule.delegate_create,
            Operation::WorkerCreate(_) => schedule.worker_create,
            Operation::ParametersUpdate(_) => schedule.parameters_update,
        }
    }
}

/// Synthetic record of one side of a fill, emitted by the market engine.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct FillOrder {
    pub order: ObjectId,
    pub account: AccountId,
    pub pays: AssetAmount,
    pub receives: AssetAmount,
    pub fee: AssetAmount,
}

/// One entry of the applied-operation stream consumed by history and bridge
/// collaborators.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, From)]
pub enum AppliedOperation {
    User(Operation),
    Fill(FillOrder),
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OperationRecord {
    pub block_num: u64,
    pub operation: AppliedOperation,
}
