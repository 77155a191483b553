//! The flattened entity model: every on-chain object is one variant of
//! [`Entity`], stored and indexed by its `(kind, instance)` identity.

pub mod account;
pub mod asset;
pub mod balance;
pub mod global;
pub mod order;
pub mod witness;
pub mod worker;

pub use account::{Account, AccountOptions, AccountStats};
pub use asset::{Asset, AssetOptions, FeedEntry, PeggedData, PriceFeed};
pub use balance::Balance;
pub use global::{DynamicProperties, GlobalProperties, TransactionRecord, WitnessSchedule};
pub use order::{CallOrder, ForceSettlement, LimitOrder, ShortOrder};
pub use witness::{Delegate, Witness};
pub use worker::{Worker, WorkerKind};

use basalt_primitives::ObjectKind;
use derive_more::From;
use serde::{Deserialize, Serialize};

/// Sum of all entity families. Kept flat so per-kind tables need no dynamic
/// dispatch and the canonical encoding stays explicit.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum Entity {
    Asset(Asset),
    Account(Account),
    AccountStats(AccountStats),
    Balance(Balance),
    LimitOrder(LimitOrder),
    ShortOrder(ShortOrder),
    CallOrder(CallOrder),
    ForceSettlement(ForceSettlement),
    Witness(Witness),
    Delegate(Delegate),
    Worker(Worker),
    Transaction(TransactionRecord),
    GlobalProperties(GlobalProperties),
    DynamicProperties(DynamicProperties),
    WitnessSchedule(WitnessSchedule),
}

impl Entity {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Entity::Asset(_) => ObjectKind::Asset,
            Entity::Account(_) => ObjectKind::Account,
            Entity::AccountStats(_) => ObjectKind::AccountStats,
            Entity::Balance(_) => ObjectKind::Balance,
            Entity::LimitOrder(_) => ObjectKind::LimitOrder,
            Entity::ShortOrder(_) => ObjectKind::ShortOrder,
            Entity::CallOrder(_) => ObjectKind::CallOrder,
            Entity::ForceSettlement(_) => ObjectKind::ForceSettlement,
            Entity::Witness(_) => ObjectKind::Witness,
            Entity::Delegate(_) => ObjectKind::Delegate,
            Entity::Worker(_) => ObjectKind::Worker,
            Entity::Transaction(_) => ObjectKind::Transaction,
            Entity::GlobalProperties(_) => ObjectKind::GlobalProperties,
            Entity::DynamicProperties(_) => ObjectKind::DynamicProperties,
            Entity::WitnessSchedule(_) => ObjectKind::WitnessSchedule,
        }
    }

    pub fn instance(&self) -> u64 {
        match self {
            Entity::Asset(e) => e.id.0,
            Entity::Account(e) => e.id.0,
            Entity::AccountStats(e) => e.id.0,
            Entity::Balance(e) => e.id.0,
            Entity::LimitOrder(e) => e.id.0,
            Entity::ShortOrder(e) => e.id.0,
            Entity::CallOrder(e) => e.id.0,
            Entity::ForceSettlement(e) => e.id.0,
            Entity::Witness(e) => e.id.0,
            Entity::Delegate(e) => e.id.0,
            Entity::Worker(e) => e.id.0,
            Entity::Transaction(e) => e.id.0,
            // Singletons always live at instance zero.
            Entity::GlobalProperties(_) => 0,
            Entity::DynamicProperties(_) => 0,
            Entity::WitnessSchedule(_) => 0,
        }
    }

    pub(crate) fn set_instance(&mut self, instance: u64) {
        match self {
            Entity::Asset(e) => e.id.0 = instance,
            Entity::Account(e) => e.id.0 = instance,
            Entity::AccountStats(e) => e.id.0 = instance,
            Entity::Balance(e) => e.id.0 = instance,
            Entity::LimitOrder(e) => e.id.0 = instance,
            Entity::ShortOrder(e) => e.id.0 = instance,
            Entity::CallOrder(e) => e.id.0 = instance,
            Entity::ForceSettlement(e) => e.id.0 = instance,
            Entity::Witness(e) => e.id.0 = instance,
            Entity::Delegate(e) => e.id.0 = instance,
            Entity::Worker(e) => e.id.0 = instance,
            Entity::Transaction(e) => e.id.0 = instance,
            Entity::GlobalProperties(_)
            | Entity::DynamicProperties(_)
            | Entity::WitnessSchedule(_) => debug_assert_eq!(instance, 0),
        }
    }
}
