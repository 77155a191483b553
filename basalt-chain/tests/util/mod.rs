//! Shared fixture: a small genesis (ten witnesses that are also delegates)
//! plus helpers to build, sign, and produce blocks.

use basalt_chain::{
    Block, ChainParameters, FeeSchedule, GenesisAccount, GenesisConfig, Ledger, LedgerError,
    Transaction,
    entity::{AccountOptions, PriceFeed, WorkerKind},
    operation::{
        AccountCreate, AccountUpdate, AccountUpgrade, AssetCreate, AssetIssue, CallOrderUpdate,
        DelegateCreate, ForceSettle, LimitOrderCreate, Operation, PublishFeed, ShortOrderCreate,
        Transfer, WorkerCreate,
    },
};
use basalt_primitives::{
    AccountId, AssetAmount, AssetId, Authority, Price, SignerKey,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::BTreeSet;

/// Aligned to both the day grid and the block interval.
pub const GENESIS_TIMESTAMP: i64 = 1_600_041_600;

pub const NUM_INIT_ACCOUNTS: usize = 10;

pub fn core(amount: i64) -> AssetAmount {
    AssetAmount::new(amount, basalt_chain::CORE_ASSET)
}

pub fn zero_fee() -> AssetAmount {
    core(0)
}

/// Route engine logs through `RUST_LOG` when debugging a failing scenario.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub struct TestChain {
    pub ledger: Ledger,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_config(|_| {}, |_| {})
    }

    /// Build a chain with adjusted parameters and/or genesis allocations.
    pub fn with_config(
        tune: impl FnOnce(&mut ChainParameters),
        allocate: impl FnOnce(&mut IndexMap<SmolStr, i64>),
    ) -> Self {
        init_tracing();
        let mut parameters = ChainParameters {
            fee_schedule: FeeSchedule::zeroed(),
            block_interval: 5,
            maintenance_interval: 300,
            witness_pay_per_block: 0,
            worker_budget_per_day: 0,
            max_transaction_size: 65_536,
            ..ChainParameters::default()
        };
        tune(&mut parameters);

        let mut initial_balances: IndexMap<SmolStr, i64> =
            IndexMap::from([(SmolStr::new("council"), 1_000_000_000)]);
        allocate(&mut initial_balances);

        let genesis = GenesisConfig {
            genesis_time: Utc.timestamp_opt(GENESIS_TIMESTAMP, 0).unwrap(),
            parameters,
            council_key: SignerKey::from_name("council-key"),
            accounts: (0..NUM_INIT_ACCOUNTS)
                .map(|index| GenesisAccount {
                    name: SmolStr::new(format!("init{index}")),
                    key: SignerKey::from_name(&format!("init{index}-key")),
                    is_witness: true,
                    is_delegate: true,
                })
                .collect(),
            initial_balances,
        };
        TestChain { ledger: Ledger::open(genesis).expect("genesis opens") }
    }

    pub fn account(&self, name: &str) -> AccountId {
        self.ledger.account_id_by_name(name).expect("account exists")
    }

    pub fn key(&self, name: &str) -> SignerKey {
        SignerKey::from_name(&format!("{name}-key"))
    }

    pub fn asset(&self, symbol: &str) -> AssetId {
        *self.ledger.store.index.asset_by_symbol.get(symbol).expect("asset exists")
    }

    pub fn head_time(&self) -> DateTime<Utc> {
        self.ledger.store.dynamic_properties().head_block_time
    }

    pub fn balance(&self, name: &str, asset: AssetId) -> i64 {
        self.ledger.balance(self.account(name), asset)
    }

    pub fn signed_tx(&self, operations: Vec<Operation>, signers: &[&str]) -> Transaction {
        Transaction {
            expiration: self.head_time() + Duration::seconds(60),
            operations,
            signed_keys: signers.iter().map(|name| self.key(name)).collect::<BTreeSet<_>>(),
        }
    }

    /// Build the block the scheduled witness would produce after skipping
    /// `skip` slots.
    pub fn build_block(&self, transactions: Vec<Transaction>, skip: u64) -> Block {
        let timestamp = self.ledger.next_block_time(skip);
        let witness = self.ledger.scheduled_witness(timestamp).expect("witness scheduled");
        let producer_key =
            self.ledger.store.witness(witness).expect("witness exists").signing_key.clone();
        Block {
            previous: self.ledger.store.dynamic_properties().head_block_id,
            timestamp,
            witness,
            producer_key,
            transactions,
        }
    }

    pub fn generate_block(&mut self) -> Block {
        let block = self.build_block(vec![], 0);
        self.ledger.push_block(&block).expect("empty block applies");
        block
    }

    pub fn generate_block_skipping(&mut self, skip: u64) -> Block {
        let block = self.build_block(vec![], skip);
        self.ledger.push_block(&block).expect("skipped-slot block applies");
        block
    }

    pub fn generate_blocks(&mut self, count: usize) -> Vec<Block> {
        (0..count).map(|_| self.generate_block()).collect()
    }

    /// Produce empty blocks until head time reaches `target`.
    pub fn generate_blocks_until(&mut self, target: DateTime<Utc>) {
        while self.head_time() < target {
            self.generate_block();
        }
    }

    /// Apply operations signed by `signer` inside a fresh block.
    pub fn push_ops(&mut self, signer: &str, operations: Vec<Operation>) -> Result<(), LedgerError> {
        self.push_ops_signed(&[signer], operations)
    }

    pub fn push_ops_signed(
        &mut self,
        signers: &[&str],
        operations: Vec<Operation>,
    ) -> Result<(), LedgerError> {
        let transaction = self.signed_tx(operations, signers);
        let block = self.build_block(vec![transaction], 0);
        self.ledger.push_block(&block)
    }

    pub fn transfer(&mut self, from: &str, to: &str, amount: AssetAmount) {
        let op = Operation::Transfer(Transfer {
            fee: zero_fee(),
            from: self.account(from),
            to: self.account(to),
            amount,
        });
        self.push_ops(from, vec![op]).expect("transfer applies");
    }

    pub fn create_account(&mut self, registrar: &str, name: &str) -> AccountId {
        let op = Operation::AccountCreate(AccountCreate {
            fee: zero_fee(),
            registrar: self.account(registrar),
            referrer: self.account(registrar),
            referrer_rewards_percentage: 0,
            name: SmolStr::new(name),
            owner: Authority::single_key(self.key(name)),
            active: Authority::single_key(self.key(name)),
            options: AccountOptions::default(),
        });
        self.push_ops(registrar, vec![op]).expect("account create applies");
        self.account(name)
    }

    pub fn upgrade_account(&mut self, name: &str) {
        let op = Operation::AccountUpgrade(AccountUpgrade {
            fee: zero_fee(),
            account: self.account(name),
        });
        self.push_ops(name, vec![op]).expect("upgrade applies");
    }

    pub fn update_votes(&mut self, name: &str, options: AccountOptions) {
        let op = Operation::AccountUpdate(AccountUpdate {
            fee: zero_fee(),
            account: self.account(name),
            new_owner: None,
            new_active: None,
            new_options: Some(options),
        });
        self.push_ops(name, vec![op]).expect("vote update applies");
    }

    pub fn create_user_asset(&mut self, issuer: &str, symbol: &str) -> AssetId {
        let op = Operation::AssetCreate(AssetCreate {
            fee: zero_fee(),
            issuer: self.account(issuer),
            symbol: SmolStr::new(symbol),
            precision: 5,
            options: Default::default(),
            backing_asset: None,
        });
        self.push_ops(issuer, vec![op]).expect("asset create applies");
        self.asset(symbol)
    }

    pub fn create_pegged_asset(&mut self, issuer: &str, symbol: &str) -> AssetId {
        let op = Operation::AssetCreate(AssetCreate {
            fee: zero_fee(),
            issuer: self.account(issuer),
            symbol: SmolStr::new(symbol),
            precision: 5,
            options: Default::default(),
            backing_asset: Some(basalt_chain::CORE_ASSET),
        });
        self.push_ops(issuer, vec![op]).expect("pegged asset create applies");
        self.asset(symbol)
    }

    pub fn issue_asset(&mut self, issuer: &str, to: &str, amount: AssetAmount) {
        let op = Operation::AssetIssue(AssetIssue {
            fee: zero_fee(),
            issuer: self.account(issuer),
            amount,
            issue_to: self.account(to),
        });
        self.push_ops(issuer, vec![op]).expect("issue applies");
    }

    /// Publish identical feeds from three active witnesses so the median is
    /// exactly the published value.
    pub fn publish_feed(&mut self, asset: AssetId, call_limit: Price, settlement_price: Price) {
        for publisher in ["init0", "init1", "init2"] {
            let op = Operation::PublishFeed(PublishFeed {
                fee: zero_fee(),
                publisher: self.account(publisher),
                asset,
                feed: PriceFeed { call_limit, settlement_price },
            });
            self.push_ops(publisher, vec![op]).expect("feed applies");
        }
    }

    pub fn limit_order(
        &mut self,
        seller: &str,
        amount_to_sell: AssetAmount,
        min_to_receive: AssetAmount,
    ) {
        let expiration = self.head_time() + Duration::days(365);
        let op = Operation::LimitOrderCreate(LimitOrderCreate {
            fee: zero_fee(),
            seller: self.account(seller),
            amount_to_sell,
            min_to_receive,
            expiration,
        });
        self.push_ops(seller, vec![op]).expect("limit order applies");
    }

    pub fn short_order(
        &mut self,
        seller: &str,
        amount_to_sell: AssetAmount,
        min_to_receive: AssetAmount,
        collateral: AssetAmount,
    ) {
        let expiration = self.head_time() + Duration::days(365);
        let op = Operation::ShortOrderCreate(ShortOrderCreate {
            fee: zero_fee(),
            seller: self.account(seller),
            amount_to_sell,
            min_to_receive,
            collateral,
            maintenance_collateral_ratio: 0,
            expiration,
        });
        self.push_ops(seller, vec![op]).expect("short order applies");
    }

    pub fn borrow(&mut self, account: &str, delta_debt: AssetAmount, delta_collateral: AssetAmount) {
        let op = Operation::CallOrderUpdate(CallOrderUpdate {
            fee: zero_fee(),
            funding_account: self.account(account),
            delta_collateral,
            delta_debt,
        });
        self.push_ops(account, vec![op]).expect("call update applies");
    }

    pub fn force_settle(&mut self, account: &str, amount: AssetAmount) {
        let op = Operation::ForceSettle(ForceSettle {
            fee: zero_fee(),
            account: self.account(account),
            amount,
        });
        self.push_ops(account, vec![op]).expect("force settle applies");
    }

    pub fn create_delegate(&mut self, account: &str) {
        let op = Operation::DelegateCreate(DelegateCreate {
            fee: zero_fee(),
            delegate_account: self.account(account),
        });
        self.push_ops(account, vec![op]).expect("delegate create applies");
    }

    pub fn create_worker(
        &mut self,
        owner: &str,
        daily_pay: i64,
        duration_secs: i64,
        kind: WorkerKind,
    ) {
        let now = self.head_time();
        let op = Operation::WorkerCreate(WorkerCreate {
            fee: zero_fee(),
            owner: self.account(owner),
            daily_pay,
            work_begin: now,
            work_end: now + Duration::seconds(duration_secs),
            kind,
        });
        self.push_ops(owner, vec![op]).expect("worker create applies");
    }
}
