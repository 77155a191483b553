//! Transactional, indexed entity store with a savepoint stack.
//!
//! Every write records its inverse in the innermost open savepoint frame.
//! Committing the outermost frame seals it as a block frame; sealed frames
//! are bounded by [`MAX_UNDO_HISTORY`](crate::config::MAX_UNDO_HISTORY) and
//! the oldest coalesce into the durable baseline. Undo replays inverses
//! through the same write path, so secondary indexes can never drift from
//! the primary tables.

pub mod digest;
pub mod index;

use basalt_primitives::{
    AccountId, AssetId, BalanceId, CallOrderId, DelegateId, LimitOrderId, MAX_INSTANCE, ObjectId,
    ObjectKind, SettlementId, ShortOrderId, StatsId, TxRecordId, WitnessId, WorkerId,
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

use crate::{
    block::TransactionId,
    config::MAX_UNDO_HISTORY,
    entity::{
        Account, AccountStats, Asset, Balance, CallOrder, Delegate, DynamicProperties, Entity,
        ForceSettlement, GlobalProperties, LimitOrder, ShortOrder, TransactionRecord, Witness,
        WitnessSchedule, Worker,
    },
};

pub use index::{CallOrderKey, Indexes, LimitOrderKey, ShortOrderKey};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("unknown object {0}")]
    Unknown(ObjectId),

    #[error("object {0} has an unexpected kind")]
    KindMismatch(ObjectId),

    #[error("account name {0:?} already exists")]
    DuplicateAccountName(SmolStr),

    #[error("asset symbol {0:?} already exists")]
    DuplicateAssetSymbol(SmolStr),

    #[error("balance for ({0}, {1}) already exists")]
    DuplicateBalance(AccountId, AssetId),

    #[error("call order for ({0}, {1}) already exists")]
    DuplicateCallOrder(AccountId, AssetId),

    #[error("transaction {0} already recorded")]
    DuplicateTransaction(TransactionId),

    #[error("no open savepoint")]
    NoOpenSavepoint,

    #[error("no sealed frame to pop")]
    NothingToPop,

    #[error("cannot pop sealed frames while savepoints are open")]
    SavepointsOpen,

    #[error("instance counter exhausted for kind {0}")]
    InstanceExhausted(ObjectKind),
}

/// Inverse of one store write, replayed on undo.
#[derive(Debug, Clone)]
enum Revert {
    Remove(ObjectId),
    Rewrite(Entity),
    Recreate(Entity),
}

#[derive(Debug, Default)]
struct Frame {
    reverts: Vec<Revert>,
    counters: BTreeMap<ObjectKind, u64>,
}

/// Serialized store state: the versioned envelope handed to the external
/// persistence provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    pub version: u32,
    pub next_instance: BTreeMap<ObjectKind, u64>,
    pub entities: Vec<Entity>,
}

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct Store {
    tables: BTreeMap<ObjectKind, BTreeMap<u64, Entity>>,
    next_instance: BTreeMap<ObjectKind, u64>,
    pub index: Indexes,
    open: Vec<Frame>,
    sealed: VecDeque<Frame>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity and insert `entity`. Fails, mutating nothing, on
    /// a uniqueness violation or counter exhaustion.
    pub fn create(&mut self, mut entity: Entity) -> Result<ObjectId, StoreError> {
        let kind = entity.kind();
        let instance = *self.next_instance.get(&kind).unwrap_or(&0);
        if instance > MAX_INSTANCE {
            return Err(StoreError::InstanceExhausted(kind));
        }
        entity.set_instance(instance);
        self.index.check_insert(&entity)?;

        self.index.insert(&entity);
        self.tables.entry(kind).or_default().insert(instance, entity);
        self.next_instance.insert(kind, instance + 1);

        let id = ObjectId::new(kind, instance);
        if let Some(frame) = self.open.last_mut() {
            frame.reverts.push(Revert::Remove(id));
        }
        Ok(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.tables.get(&id.kind).is_some_and(|table| table.contains_key(&id.instance))
    }

    pub fn get(&self, id: ObjectId) -> Result<&Entity, StoreError> {
        self.tables
            .get(&id.kind)
            .and_then(|table| table.get(&id.instance))
            .ok_or(StoreError::Unknown(id))
    }

    /// Apply `mutate` to the entity under an undo record. The closure must
    /// not change the entity's kind or identity.
    pub fn modify<R>(
        &mut self,
        id: ObjectId,
        mutate: impl FnOnce(&mut Entity) -> R,
    ) -> Result<R, StoreError> {
        let table = self.tables.get_mut(&id.kind).ok_or(StoreError::Unknown(id))?;
        let entity = table.get_mut(&id.instance).ok_or(StoreError::Unknown(id))?;
        let old = entity.clone();
        let result = mutate(entity);
        debug_assert_eq!(entity.kind(), id.kind);
        debug_assert_eq!(entity.instance(), id.instance);

        let new = entity.clone();
        self.index.remove(&old);
        self.index.insert(&new);
        if let Some(frame) = self.open.last_mut() {
            frame.reverts.push(Revert::Rewrite(old));
        }
        Ok(result)
    }

    pub fn remove(&mut self, id: ObjectId) -> Result<Entity, StoreError> {
        let table = self.tables.get_mut(&id.kind).ok_or(StoreError::Unknown(id))?;
        let entity = table.remove(&id.instance).ok_or(StoreError::Unknown(id))?;
        self.index.remove(&entity);
        if let Some(frame) = self.open.last_mut() {
            frame.reverts.push(Revert::Recreate(entity.clone()));
        }
        Ok(entity)
    }

    /// Push a savepoint frame.
    pub fn begin(&mut self) {
        self.open.push(Frame { reverts: Vec::new(), counters: self.next_instance.clone() });
    }

    /// Merge the innermost frame into its parent, or seal it as a block
    /// frame when it is outermost.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let frame = self.open.pop().ok_or(StoreError::NoOpenSavepoint)?;
        match self.open.last_mut() {
            Some(parent) => parent.reverts.extend(frame.reverts),
            None => {
                self.sealed.push_back(frame);
                while self.sealed.len() > MAX_UNDO_HISTORY {
                    // Oldest history coalesces into the durable baseline.
                    self.sealed.pop_front();
                }
            }
        }
        Ok(())
    }

    /// Revert and discard the innermost frame.
    pub fn undo(&mut self) -> Result<(), StoreError> {
        let frame = self.open.pop().ok_or(StoreError::NoOpenSavepoint)?;
        self.apply_frame(frame);
        Ok(())
    }

    /// Revert the newest sealed block frame. Only valid between blocks.
    pub fn pop_sealed(&mut self) -> Result<(), StoreError> {
        if !self.open.is_empty() {
            return Err(StoreError::SavepointsOpen);
        }
        let frame = self.sealed.pop_back().ok_or(StoreError::NothingToPop)?;
        self.apply_frame(frame);
        Ok(())
    }

    pub fn sealed_frames(&self) -> usize {
        self.sealed.len()
    }

    pub fn open_frames(&self) -> usize {
        self.open.len()
    }

    fn apply_frame(&mut self, frame: Frame) {
        for revert in frame.reverts.into_iter().rev() {
            match revert {
                Revert::Remove(id) => {
                    let entity = self
                        .tables
                        .get_mut(&id.kind)
                        .and_then(|table| table.remove(&id.instance))
                        .expect("undo target exists");
                    self.index.remove(&entity);
                }
                Revert::Rewrite(old) => {
                    let id = ObjectId::new(old.kind(), old.instance());
                    let table = self.tables.get_mut(&id.kind).expect("undo table exists");
                    let current = table.insert(id.instance, old.clone()).expect("undo target exists");
                    self.index.remove(&current);
                    self.index.insert(&old);
                }
                Revert::Recreate(old) => {
                    self.index.insert(&old);
                    self.tables.entry(old.kind()).or_default().insert(old.instance(), old);
                }
            }
        }
        self.next_instance = frame.counters;
    }

    /// Serialize everything into the versioned snapshot envelope.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            next_instance: self.next_instance.clone(),
            entities: self
                .tables
                .values()
                .flat_map(|table| table.values().cloned())
                .collect(),
        }
    }

    /// Rebuild a store from a snapshot. History does not survive the round
    /// trip; the restored state is a fresh durable baseline.
    pub fn restore(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut store = Store::new();
        for entity in snapshot.entities {
            store.index.check_insert(&entity)?;
            store.index.insert(&entity);
            store.tables.entry(entity.kind()).or_default().insert(entity.instance(), entity);
        }
        store.next_instance = snapshot.next_instance;
        Ok(store)
    }
}

macro_rules! typed_access {
    ($get:ident, $modify:ident, $variant:ident, $ty:ty, $id:ty) => {
        impl Store {
            pub fn $get(&self, id: $id) -> Result<&$ty, StoreError> {
                match self.get(id.object_id())? {
                    Entity::$variant(entity) => Ok(entity),
                    _ => Err(StoreError::KindMismatch(id.object_id())),
                }
            }

            pub fn $modify<R>(
                &mut self,
                id: $id,
                mutate: impl FnOnce(&mut $ty) -> R,
            ) -> Result<R, StoreError> {
                self.$get(id)?;
                self.modify(id.object_id(), |entity| match entity {
                    Entity::$variant(entity) => mutate(entity),
                    _ => unreachable!("kind checked above"),
                })
            }
        }
    };
}

typed_access!(asset, modify_asset, Asset, Asset, AssetId);
typed_access!(account, modify_account, Account, Account, AccountId);
typed_access!(account_stats, modify_account_stats, AccountStats, AccountStats, StatsId);
typed_access!(balance, modify_balance, Balance, Balance, BalanceId);
typed_access!(limit_order, modify_limit_order, LimitOrder, LimitOrder, LimitOrderId);
typed_access!(short_order, modify_short_order, ShortOrder, ShortOrder, ShortOrderId);
typed_access!(call_order, modify_call_order, CallOrder, CallOrder, CallOrderId);
typed_access!(settlement, modify_settlement, ForceSettlement, ForceSettlement, SettlementId);
typed_access!(witness, modify_witness, Witness, Witness, WitnessId);
typed_access!(delegate, modify_delegate, Delegate, Delegate, DelegateId);
typed_access!(worker, modify_worker, Worker, Worker, WorkerId);
typed_access!(tx_record, modify_tx_record, Transaction, TransactionRecord, TxRecordId);

impl Store {
    const GPO_ID: ObjectId = ObjectId { kind: ObjectKind::GlobalProperties, instance: 0 };
    const DGP_ID: ObjectId = ObjectId { kind: ObjectKind::DynamicProperties, instance: 0 };
    const SCHEDULE_ID: ObjectId = ObjectId { kind: ObjectKind::WitnessSchedule, instance: 0 };

    pub fn global_properties(&self) -> &GlobalProperties {
        match self.get(Self::GPO_ID) {
            Ok(Entity::GlobalProperties(gpo)) => gpo,
            _ => panic!("global properties singleton missing"),
        }
    }

    pub fn modify_global_properties<R>(&mut self, mutate: impl FnOnce(&mut GlobalProperties) -> R) -> R {
        self.modify(Self::GPO_ID, |entity| match entity {
            Entity::GlobalProperties(gpo) => mutate(gpo),
            _ => unreachable!("singleton kind fixed"),
        })
        .expect("global properties singleton missing")
    }

    pub fn dynamic_properties(&self) -> &DynamicProperties {
        match self.get(Self::DGP_ID) {
            Ok(Entity::DynamicProperties(dgp)) => dgp,
            _ => panic!("dynamic properties singleton missing"),
        }
    }

    pub fn modify_dynamic_properties<R>(
        &mut self,
        mutate: impl FnOnce(&mut DynamicProperties) -> R,
    ) -> R {
        self.modify(Self::DGP_ID, |entity| match entity {
            Entity::DynamicProperties(dgp) => mutate(dgp),
            _ => unreachable!("singleton kind fixed"),
        })
        .expect("dynamic properties singleton missing")
    }

    pub fn witness_schedule(&self) -> &WitnessSchedule {
        match self.get(Self::SCHEDULE_ID) {
            Ok(Entity::WitnessSchedule(schedule)) => schedule,
            _ => panic!("witness schedule singleton missing"),
        }
    }

    pub fn modify_witness_schedule<R>(&mut self, mutate: impl FnOnce(&mut WitnessSchedule) -> R) -> R {
        self.modify(Self::SCHEDULE_ID, |entity| match entity {
            Entity::WitnessSchedule(schedule) => mutate(schedule),
            _ => unreachable!("singleton kind fixed"),
        })
        .expect("witness schedule singleton missing")
    }

    pub fn instance_counters(&self) -> &BTreeMap<ObjectKind, u64> {
        &self.next_instance
    }

    /// Iterate a whole kind in instance order.
    pub fn iter_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &Entity> {
        self.tables.get(&kind).into_iter().flat_map(|table| table.values())
    }

    /// Instances of a kind in identity order; convenient when the loop body
    /// needs `&mut self`.
    pub fn instances_of(&self, kind: ObjectKind) -> Vec<u64> {
        self.tables
            .get(&kind)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::digest::state_digest;
    use basalt_primitives::{AccountId, AssetId};

    fn balance_entity(owner: u64, asset: u64, amount: i64) -> Entity {
        Entity::Balance(Balance::new(BalanceId(0), AccountId(owner), AssetId(asset), amount))
    }

    #[test]
    fn test_create_assigns_dense_instances() {
        let mut store = Store::new();
        let a = store.create(balance_entity(1, 0, 10)).unwrap();
        let b = store.create(balance_entity(2, 0, 10)).unwrap();
        assert_eq!(a.instance, 0);
        assert_eq!(b.instance, 1);
    }

    #[test]
    fn test_duplicate_balance_rejected_without_mutation() {
        let mut store = Store::new();
        store.create(balance_entity(1, 0, 10)).unwrap();
        let before = state_digest(&store);
        assert!(matches!(
            store.create(balance_entity(1, 0, 20)),
            Err(StoreError::DuplicateBalance(_, _))
        ));
        assert_eq!(state_digest(&store), before);
    }

    #[test]
    fn test_undo_restores_digest() {
        let mut store = Store::new();
        let id = store.create(balance_entity(1, 0, 10)).unwrap();
        let before = state_digest(&store);

        store.begin();
        store.modify(id, |entity| {
            if let Entity::Balance(balance) = entity {
                balance.amount = 99;
            }
        })
        .unwrap();
        store.create(balance_entity(2, 0, 5)).unwrap();
        store.remove(id).unwrap();
        assert_ne!(state_digest(&store), before);

        store.undo().unwrap();
        assert_eq!(state_digest(&store), before);
    }

    #[test]
    fn test_nested_commit_merges_into_parent() {
        let mut store = Store::new();
        let before = state_digest(&store);

        store.begin();
        store.begin();
        store.create(balance_entity(1, 0, 10)).unwrap();
        store.commit().unwrap();
        store.undo().unwrap();

        assert_eq!(state_digest(&store), before);
    }

    #[test]
    fn test_sealed_frames_pop_in_reverse_order() {
        let mut store = Store::new();
        let digest0 = state_digest(&store);

        store.begin();
        store.create(balance_entity(1, 0, 10)).unwrap();
        store.commit().unwrap();
        let digest1 = state_digest(&store);

        store.begin();
        store.create(balance_entity(2, 0, 20)).unwrap();
        store.commit().unwrap();

        store.pop_sealed().unwrap();
        assert_eq!(state_digest(&store), digest1);
        store.pop_sealed().unwrap();
        assert_eq!(state_digest(&store), digest0);
        assert!(matches!(store.pop_sealed(), Err(StoreError::NothingToPop)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = Store::new();
        store.create(balance_entity(1, 0, 10)).unwrap();
        store.create(balance_entity(2, 1, 20)).unwrap();

        let restored = Store::restore(store.snapshot()).unwrap();
        assert_eq!(state_digest(&restored), state_digest(&store));
        assert_eq!(restored.index.balance_by_owner.len(), 2);
    }
}
