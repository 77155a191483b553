//! The ledger façade: genesis construction, block and transaction
//! application, balance movement, and the undo history exposed to fork
//! handling. All mutable chain state lives behind this value.

use basalt_primitives::{
    AccountId, AssetAmount, AssetId, Authority, MAX_SHARE_SUPPLY, ObjectKind, SignerKey, StatsId,
    VoteId, WitnessId,
    authority::MAX_AUTHORITY_DEPTH,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;

use crate::{
    block::{Block, BlockId, Transaction},
    config::{CORE_PRECISION, CORE_SYMBOL, ChainParameters},
    entity::{
        Account, AccountOptions, AccountStats, Asset, AssetOptions, Balance, Delegate,
        DynamicProperties, Entity, GlobalProperties, TransactionRecord, Witness, WitnessSchedule,
    },
    error::{LedgerError, PreconditionError, SchedulingError, ValidationError},
    operation::{AppliedOperation, OperationRecord},
    scheduler,
    store::{Store, StoreError, digest::state_digest},
};

/// The native asset is always the first object created.
pub const CORE_ASSET: AssetId = AssetId(0);
/// The governance council account is always the first account created.
pub const COUNCIL_ACCOUNT: AccountId = AccountId(0);

/// One initial account. Witness/delegate flags enroll it in the starting
/// active sets.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct GenesisAccount {
    pub name: SmolStr,
    pub key: SignerKey,
    pub is_witness: bool,
    pub is_delegate: bool,
}

/// Everything needed to build block-zero state. `initial_balances` maps
/// account names to native allocations and is applied in configuration
/// order, which fixes balance-object identities.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct GenesisConfig {
    pub genesis_time: DateTime<Utc>,
    pub parameters: ChainParameters,
    pub council_key: SignerKey,
    pub accounts: Vec<GenesisAccount>,
    pub initial_balances: IndexMap<SmolStr, i64>,
}

#[derive(Debug)]
pub struct Ledger {
    pub store: Store,
    applied: Vec<OperationRecord>,
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unknown(id) => PreconditionError::UnknownObject(id).into(),
            StoreError::KindMismatch(id) => PreconditionError::KindMismatch(id).into(),
            StoreError::DuplicateAccountName(name) => {
                PreconditionError::DuplicateAccountName(name).into()
            }
            StoreError::DuplicateAssetSymbol(symbol) => {
                PreconditionError::DuplicateAssetSymbol(symbol).into()
            }
            StoreError::DuplicateBalance(_, _) | StoreError::DuplicateCallOrder(_, _) => {
                LedgerError::Invariant(value.to_string())
            }
            StoreError::DuplicateTransaction(_) => {
                ValidationError::DuplicateTransaction.into()
            }
            StoreError::NoOpenSavepoint
            | StoreError::NothingToPop
            | StoreError::SavepointsOpen
            | StoreError::InstanceExhausted(_) => LedgerError::Invariant(value.to_string()),
        }
    }
}

impl Ledger {
    /// Build genesis state. The genesis timestamp must sit on the block
    /// interval grid; the first pushed block is block one.
    pub fn open(genesis: GenesisConfig) -> Result<Self, LedgerError> {
        genesis.parameters.validate()?;
        let interval = i64::from(genesis.parameters.block_interval);
        if genesis.genesis_time.timestamp() % interval != 0 {
            return Err(SchedulingError::TimestampOffGrid(genesis.genesis_time).into());
        }

        let mut ledger = Ledger { store: Store::new(), applied: Vec::new() };

        ledger.store.create(Entity::Asset(Asset {
            id: CORE_ASSET,
            symbol: SmolStr::new(CORE_SYMBOL),
            issuer: COUNCIL_ACCOUNT,
            precision: CORE_PRECISION,
            options: AssetOptions::default(),
            current_supply: 0,
            accumulated_fees: 0,
            pegged: None,
        }))?;

        ledger.register_account(
            SmolStr::new("council"),
            COUNCIL_ACCOUNT,
            COUNCIL_ACCOUNT,
            0,
            Authority::single_key(genesis.council_key.clone()),
            Authority::single_key(genesis.council_key),
            AccountOptions::default(),
            &genesis.parameters,
            Some(DateTime::<Utc>::MAX_UTC),
        )?;

        for account in &genesis.accounts {
            ledger.register_account(
                account.name.clone(),
                COUNCIL_ACCOUNT,
                COUNCIL_ACCOUNT,
                0,
                Authority::single_key(account.key.clone()),
                Authority::single_key(account.key.clone()),
                AccountOptions::default(),
                &genesis.parameters,
                Some(DateTime::<Utc>::MAX_UTC),
            )?;
        }

        for (name, amount) in &genesis.initial_balances {
            if *amount <= 0 {
                return Err(ValidationError::NonPositiveAmount.into());
            }
            let owner = ledger.account_id_by_name(name)?;
            ledger.adjust_balance(owner, AssetAmount::new(*amount, CORE_ASSET))?;
            ledger.store.modify_asset(CORE_ASSET, |core| {
                core.current_supply += *amount;
            })?;
        }
        if ledger.store.asset(CORE_ASSET)?.current_supply > MAX_SHARE_SUPPLY {
            return Err(basalt_primitives::ArithmeticError::SupplyExceeded.into());
        }

        let mut next_vote_id = 0u32;
        let mut active_witnesses = Vec::new();
        let mut witness_accounts = std::collections::BTreeSet::new();
        let mut active_delegates = Vec::new();
        for account in &genesis.accounts {
            let account_id = ledger.account_id_by_name(&account.name)?;
            if account.is_witness {
                let id = ledger.store.create(Entity::Witness(Witness {
                    id: WitnessId(0),
                    witness_account: account_id,
                    signing_key: account.key.clone(),
                    vote_id: VoteId(next_vote_id),
                    last_block: 0,
                    total_missed: 0,
                }))?;
                next_vote_id += 1;
                active_witnesses.push(WitnessId(id.instance));
                witness_accounts.insert(account_id);
            }
            if account.is_delegate {
                let id = ledger.store.create(Entity::Delegate(Delegate {
                    id: basalt_primitives::DelegateId(0),
                    delegate_account: account_id,
                    vote_id: VoteId(next_vote_id),
                }))?;
                next_vote_id += 1;
                active_delegates.push(basalt_primitives::DelegateId(id.instance));
            }
        }
        if active_witnesses.is_empty() {
            return Err(SchedulingError::EmptySchedule.into());
        }

        ledger.store.create(Entity::GlobalProperties(GlobalProperties {
            parameters: genesis.parameters.clone(),
            pending_parameters: None,
            next_available_vote_id: next_vote_id,
            active_witnesses: active_witnesses.clone(),
            witness_accounts,
            active_delegates,
        }))?;

        ledger.store.create(Entity::DynamicProperties(DynamicProperties {
            head_block_num: 0,
            head_block_id: BlockId::ZERO,
            head_block_time: genesis.genesis_time,
            genesis_time: genesis.genesis_time,
            current_witness: active_witnesses[0],
            // The first block crosses this boundary and runs the genesis
            // maintenance pass.
            next_maintenance_time: genesis.genesis_time,
            last_budget_time: None,
            witness_budget: 0,
            current_aslot: 0,
        }))?;

        ledger.store.create(Entity::WitnessSchedule(WitnessSchedule {
            sequence: scheduler::shuffled_sequence(&active_witnesses, BlockId::ZERO.low_u64()),
            recent_slots_filled: u128::MAX,
        }))?;

        Ok(ledger)
    }

    /// Create an account together with its statistics entity.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register_account(
        &mut self,
        name: SmolStr,
        registrar: AccountId,
        referrer: AccountId,
        referrer_rewards_percentage: u16,
        owner: Authority,
        active: Authority,
        options: AccountOptions,
        parameters: &ChainParameters,
        membership_expiration: Option<DateTime<Utc>>,
    ) -> Result<AccountId, LedgerError> {
        let counters = self.store.instance_counters();
        let account_instance = *counters.get(&ObjectKind::Account).unwrap_or(&0);
        let stats_instance = *counters.get(&ObjectKind::AccountStats).unwrap_or(&0);

        // The referrer chain bottoms out at a lifetime member: a non-member
        // referrer forwards its own lifetime referrer.
        let lifetime_referrer = match self.store.account(referrer) {
            Ok(referrer_account) if !referrer_account.is_lifetime_member() => {
                referrer_account.lifetime_referrer
            }
            _ => referrer,
        };

        self.store.create(Entity::Account(Account {
            id: AccountId(account_instance),
            name,
            registrar,
            referrer,
            lifetime_referrer,
            network_fee_percentage: parameters.network_percent_of_fee,
            lifetime_referrer_fee_percentage: parameters.lifetime_referrer_percent_of_fee,
            referrer_rewards_percentage,
            membership_expiration,
            owner,
            active,
            statistics: StatsId(stats_instance),
            options,
        }))?;
        self.store.create(Entity::AccountStats(AccountStats::new(
            StatsId(stats_instance),
            AccountId(account_instance),
        )))?;
        Ok(AccountId(account_instance))
    }

    pub fn account_id_by_name(&self, name: &str) -> Result<AccountId, LedgerError> {
        self.store
            .index
            .account_by_name
            .get(name)
            .copied()
            .ok_or_else(|| PreconditionError::NoSuchAccountName(SmolStr::new(name)).into())
    }

    pub fn balance(&self, owner: AccountId, asset: AssetId) -> i64 {
        self.store
            .index
            .balance_by_owner
            .get(&(owner, asset))
            .and_then(|id| self.store.balance(*id).ok())
            .map(|balance| balance.amount)
            .unwrap_or(0)
    }

    /// Move value into or out of a balance. Negative deltas fail rather than
    /// overdraw; zeroed balances are removed.
    pub fn adjust_balance(
        &mut self,
        owner: AccountId,
        delta: AssetAmount,
    ) -> Result<(), LedgerError> {
        if delta.amount == 0 {
            return Ok(());
        }
        match self.store.index.balance_by_owner.get(&(owner, delta.asset)).copied() {
            Some(id) => {
                let current = self.store.balance(id)?.amount;
                let next = current.checked_add(delta.amount).ok_or(
                    basalt_primitives::ArithmeticError::Overflow,
                )?;
                if next < 0 {
                    return Err(PreconditionError::InsufficientBalance {
                        account: owner.object_id(),
                        available: current,
                        required: -delta.amount,
                    }
                    .into());
                }
                if next == 0 {
                    self.store.remove(id.object_id())?;
                } else {
                    self.store.modify_balance(id, |balance| balance.amount = next)?;
                }
            }
            None => {
                if delta.amount < 0 {
                    return Err(PreconditionError::InsufficientBalance {
                        account: owner.object_id(),
                        available: 0,
                        required: -delta.amount,
                    }
                    .into());
                }
                self.store.create(Entity::Balance(Balance::new(
                    basalt_primitives::BalanceId(0),
                    owner,
                    delta.asset,
                    delta.amount,
                )))?;
            }
        }
        Ok(())
    }

    /// Credit fee rebates. Amounts at or above the vesting threshold accrue
    /// to the vesting bucket when the caller requires vesting.
    pub fn deposit_cashback(
        &mut self,
        account: AccountId,
        amount: i64,
        require_vesting: bool,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let threshold = self.store.global_properties().parameters.cashback_vesting_threshold;
        let stats_id = self.store.account(account)?.statistics;
        self.store.modify_account_stats(stats_id, |stats| {
            if require_vesting && amount >= threshold {
                stats.cashback_vesting += amount;
            } else {
                stats.cashback_vested += amount;
            }
        })?;
        Ok(())
    }

    /// Threshold-weighted authority satisfaction over the verified signer
    /// set, following account memberships to bounded depth.
    pub fn authority_satisfied(
        &self,
        authority: &Authority,
        signed: &std::collections::BTreeSet<SignerKey>,
        depth: u8,
    ) -> bool {
        let mut total: u64 = 0;
        let threshold = u64::from(authority.weight_threshold);
        for (key, weight) in &authority.key_auths {
            if signed.contains(key) {
                total += u64::from(*weight);
                if total >= threshold {
                    return true;
                }
            }
        }
        if depth >= MAX_AUTHORITY_DEPTH {
            return false;
        }
        for (account_id, weight) in &authority.account_auths {
            if let Ok(member) = self.store.account(*account_id) {
                if self.authority_satisfied(&member.active, signed, depth + 1) {
                    total += u64::from(*weight);
                    if total >= threshold {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub(crate) fn push_applied(&mut self, operation: AppliedOperation) {
        let block_num = self.store.dynamic_properties().head_block_num;
        self.applied.push(OperationRecord { block_num, operation });
    }

    /// Drain the applied-operation stream for history consumers.
    pub fn drain_applied_operations(&mut self) -> Vec<OperationRecord> {
        std::mem::take(&mut self.applied)
    }

    pub fn head_digest(&self) -> String {
        state_digest(&self.store)
    }

    /// Timestamp of the next block after skipping `skip` production slots,
    /// floored onto the (possibly freshly changed) interval grid.
    pub fn next_block_time(&self, skip: u64) -> DateTime<Utc> {
        let interval = i64::from(self.store.global_properties().parameters.block_interval);
        let head = self.store.dynamic_properties().head_block_time;
        let mut next = head + Duration::seconds(interval);
        let off_grid = next.timestamp() % interval;
        if off_grid != 0 {
            next = Utc
                .timestamp_opt(next.timestamp() - off_grid, 0)
                .single()
                .expect("grid-aligned timestamp is valid");
        }
        next + Duration::seconds(interval * skip as i64)
    }

    /// The witness scheduled to produce at `time`.
    pub fn scheduled_witness(&self, time: DateTime<Utc>) -> Result<WitnessId, LedgerError> {
        let dgp = self.store.dynamic_properties();
        let interval = self.store.global_properties().parameters.block_interval;
        let slot = scheduler::slot_of(time, dgp.genesis_time, interval);
        scheduler::witness_for_slot(&self.store.witness_schedule().sequence, slot)
            .ok_or_else(|| SchedulingError::EmptySchedule.into())
    }

    pub fn witness_participation_rate(&self) -> u32 {
        scheduler::participation_rate(self.store.witness_schedule().recent_slots_filled)
    }

    /// Validate and apply a block under one sealed savepoint frame.
    pub fn push_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        self.validate_block_header(block)?;
        let applied_mark = self.applied.len();
        self.store.begin();
        match self.apply_block_frame(block) {
            Ok(()) => {
                self.store.commit()?;
                Ok(())
            }
            Err(error) => {
                self.store.undo()?;
                // A rejected block contributes nothing to the stream.
                self.applied.truncate(applied_mark);
                Err(error)
            }
        }
    }

    /// Validate a pending transaction against head state on a scratch frame.
    pub fn push_transaction(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        let applied_mark = self.applied.len();
        self.store.begin();
        let now = self.store.dynamic_properties().head_block_time;
        let result = self.apply_transaction(transaction, now);
        self.store.undo()?;
        self.applied.truncate(applied_mark);
        result
    }

    /// Revert the head block. Fork switching pops to the common ancestor and
    /// replays the winning branch.
    pub fn pop_block(&mut self) -> Result<(), LedgerError> {
        self.store.pop_sealed()?;
        Ok(())
    }

    fn validate_block_header(&self, block: &Block) -> Result<(), LedgerError> {
        let dgp = self.store.dynamic_properties();
        let parameters = &self.store.global_properties().parameters;

        if block.previous != dgp.head_block_id {
            return Err(SchedulingError::BadParent.into());
        }
        if block.timestamp <= dgp.head_block_time {
            return Err(SchedulingError::TimestampNotAfterHead(block.timestamp).into());
        }
        if block.timestamp.timestamp() % i64::from(parameters.block_interval) != 0 {
            return Err(SchedulingError::TimestampOffGrid(block.timestamp).into());
        }
        if block.encoded_size() > parameters.max_block_size as usize {
            return Err(ValidationError::BlockTooLarge {
                got: block.encoded_size(),
                max: parameters.max_block_size as usize,
            }
            .into());
        }

        let scheduled = self.scheduled_witness(block.timestamp)?;
        if scheduled != block.witness {
            return Err(SchedulingError::WrongWitness {
                got: block.witness.object_id(),
                scheduled: scheduled.object_id(),
            }
            .into());
        }
        let witness = self.store.witness(block.witness)?;
        if witness.signing_key != block.producer_key {
            return Err(SchedulingError::BadProducerKey.into());
        }
        Ok(())
    }

    fn apply_block_frame(&mut self, block: &Block) -> Result<(), LedgerError> {
        let parameters = self.store.global_properties().parameters.clone();
        let dgp = self.store.dynamic_properties().clone();

        let new_slot =
            scheduler::slot_of(block.timestamp, dgp.genesis_time, parameters.block_interval);
        let missed = new_slot.saturating_sub(dgp.current_aslot + 1);

        // Slots skipped between head and this block charge their scheduled
        // producers a miss.
        if missed > 0 {
            let sequence = self.store.witness_schedule().sequence.clone();
            for slot in dgp.current_aslot + 1..new_slot {
                if let Some(missed_witness) = scheduler::witness_for_slot(&sequence, slot) {
                    self.store.modify_witness(missed_witness, |witness| {
                        witness.total_missed += 1;
                    })?;
                }
            }
        }
        self.store.modify_witness_schedule(|schedule| {
            schedule.recent_slots_filled =
                scheduler::record_slots(schedule.recent_slots_filled, missed);
        });

        let block_num = dgp.head_block_num + 1;
        let block_id = block.id();
        self.store.modify_dynamic_properties(|dgp| {
            dgp.head_block_num = block_num;
            dgp.head_block_id = block_id;
            dgp.head_block_time = block.timestamp;
            dgp.current_witness = block.witness;
            dgp.current_aslot = new_slot;
        });
        self.store.modify_witness(block.witness, |witness| {
            witness.last_block = block_num;
        })?;

        self.sweep_expired_transactions(block.timestamp)?;
        self.sweep_expired_orders(block.timestamp)?;

        for transaction in &block.transactions {
            self.apply_transaction(transaction, block.timestamp)?;
        }

        self.pay_block_witness(block.witness, &parameters)?;

        if block.timestamp >= dgp.next_maintenance_time {
            self.perform_maintenance(block)?;
        }

        debug!(block_num, %block_id, transactions = block.transactions.len(), "applied block");
        Ok(())
    }

    /// Apply one transaction inside a nested frame; any operation failure
    /// unwinds the whole transaction.
    fn apply_transaction(
        &mut self,
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if transaction.operations.is_empty() {
            return Err(ValidationError::EmptyTransaction.into());
        }
        let parameters = self.store.global_properties().parameters.clone();
        if transaction.expiration < now {
            return Err(ValidationError::TransactionExpired {
                expiration: transaction.expiration,
                now,
            }
            .into());
        }
        let max_ahead = Duration::seconds(i64::from(parameters.max_time_until_expiration));
        if transaction.expiration > now + max_ahead {
            return Err(ValidationError::TransactionExpirationTooFar {
                expiration: transaction.expiration,
                now,
            }
            .into());
        }
        let size = transaction.encoded_size();
        if size > parameters.max_transaction_size as usize {
            return Err(ValidationError::TransactionTooLarge {
                got: size,
                max: parameters.max_transaction_size as usize,
            }
            .into());
        }
        let tx_id = transaction.id();
        if self.store.index.tx_by_id.contains_key(&tx_id) {
            return Err(ValidationError::DuplicateTransaction.into());
        }

        self.store.begin();
        let result = (|| -> Result<(), LedgerError> {
            self.store.create(Entity::Transaction(TransactionRecord {
                id: basalt_primitives::TxRecordId(0),
                tx_id,
                expiration: transaction.expiration,
            }))?;
            for operation in &transaction.operations {
                self.store.begin();
                match self.apply_operation(operation, &transaction.signed_keys, now) {
                    Ok(()) => self.store.commit()?,
                    Err(error) => {
                        self.store.undo()?;
                        return Err(error);
                    }
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.store.commit()?;
                Ok(())
            }
            Err(error) => {
                self.store.undo()?;
                Err(error)
            }
        }
    }

    fn sweep_expired_transactions(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        loop {
            let Some((expiration, id)) = self.store.index.tx_by_expiry.iter().next().cloned()
            else {
                break;
            };
            if expiration >= now {
                break;
            }
            self.store.remove(id.object_id())?;
        }
        Ok(())
    }

    fn sweep_expired_orders(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        loop {
            let Some((expiration, id)) = self.store.index.limit_by_expiry.iter().next().cloned()
            else {
                break;
            };
            if expiration > now {
                break;
            }
            self.cancel_limit_order(id)?;
        }
        loop {
            let Some((expiration, id)) = self.store.index.short_by_expiry.iter().next().cloned()
            else {
                break;
            };
            if expiration > now {
                break;
            }
            self.cancel_short_order(id)?;
        }
        Ok(())
    }

    fn pay_block_witness(
        &mut self,
        witness_id: WitnessId,
        parameters: &ChainParameters,
    ) -> Result<(), LedgerError> {
        let budget = self.store.dynamic_properties().witness_budget;
        let pay = parameters.witness_pay_per_block.min(budget);
        if pay <= 0 {
            return Ok(());
        }
        self.store.modify_dynamic_properties(|dgp| dgp.witness_budget -= pay);
        let witness_account = self.store.witness(witness_id)?.witness_account;
        self.adjust_balance(witness_account, AssetAmount::new(pay, CORE_ASSET))
    }

    /// Per-asset conservation audit: the recorded supply must equal the sum
    /// of every bucket value can sit in.
    pub fn check_supply(&self, asset_id: AssetId) -> Result<(), LedgerError> {
        let asset = self.store.asset(asset_id)?;
        let mut total: i64 = asset.accumulated_fees;

        for entity in self.store.iter_kind(ObjectKind::Balance) {
            if let Entity::Balance(balance) = entity {
                if balance.asset == asset_id {
                    total += balance.amount;
                }
            }
        }
        for entity in self.store.iter_kind(ObjectKind::LimitOrder) {
            if let Entity::LimitOrder(order) = entity {
                if order.sell_price.base.asset == asset_id {
                    total += order.for_sale;
                }
            }
        }
        for entity in self.store.iter_kind(ObjectKind::ShortOrder) {
            if let Entity::ShortOrder(order) = entity {
                if order.collateral_asset() == asset_id {
                    total += order.available_collateral;
                }
            }
        }
        for entity in self.store.iter_kind(ObjectKind::CallOrder) {
            if let Entity::CallOrder(call) = entity {
                if call.collateral_asset() == asset_id {
                    total += call.collateral;
                }
            }
        }
        for entity in self.store.iter_kind(ObjectKind::ForceSettlement) {
            if let Entity::ForceSettlement(settlement) = entity {
                if settlement.balance.asset == asset_id {
                    total += settlement.balance.amount;
                }
            }
        }
        if asset_id == CORE_ASSET {
            for entity in self.store.iter_kind(ObjectKind::AccountStats) {
                if let Entity::AccountStats(stats) = entity {
                    total += stats.pending_fees
                        + stats.pending_vested_fees
                        + stats.cashback_vested
                        + stats.cashback_vesting;
                }
            }
            total += self.store.dynamic_properties().witness_budget;
        }

        if total != asset.current_supply {
            return Err(LedgerError::Invariant(format!(
                "supply mismatch for {}: recorded {}, audited {}",
                asset.symbol, asset.current_supply, total
            )));
        }
        Ok(())
    }
}
