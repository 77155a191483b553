//! Operation evaluation: fee and authority checks followed by per-kind
//! application. Each operation runs inside its own savepoint frame opened by
//! the transaction loop, so a failure here never leaves partial state.

use basalt_primitives::{
    AssetAmount, CallOrderId, Price, SettlementId, SignerKey, VoteId, WorkerId, validate_symbol,
};
use chrono::{DateTime, Duration, Utc};
use smol_str::SmolStr;
use std::collections::BTreeSet;

use crate::{
    config::{
        COLLATERAL_RATIO_DENOM, DEFAULT_MAINTENANCE_COLLATERAL_RATIO, MAX_COLLATERAL_RATIO,
        MIN_COLLATERAL_RATIO,
    },
    entity::{Asset, CallOrder, Delegate, Entity, ForceSettlement, LimitOrder, PeggedData,
        ShortOrder, Witness, Worker},
    error::{LedgerError, PreconditionError, ValidationError},
    ledger::{CORE_ASSET, Ledger},
    operation::{
        AccountCreate, AccountUpdate, AccountUpgrade, AppliedOperation, AssetCreate, AssetIssue,
        CallOrderUpdate, DelegateCreate, ForceSettle, LimitOrderCancel, LimitOrderCreate,
        Operation, ParametersUpdate, PublishFeed, ShortOrderCancel, ShortOrderCreate, Transfer,
        WitnessCreate, WorkerCreate,
    },
};

fn validate_account_name(name: &str) -> Result<(), LedgerError> {
    let valid_length = (1..=63).contains(&name.len());
    let valid_start = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(valid_length && valid_start && valid_chars) {
        return Err(ValidationError::BadAccountName(SmolStr::new(name)).into());
    }
    Ok(())
}

impl Ledger {
    /// Validate, authorize, charge, and apply one operation.
    pub(crate) fn apply_operation(
        &mut self,
        operation: &Operation,
        signed: &BTreeSet<SignerKey>,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let parameters = self.store.global_properties().parameters.clone();

        let fee = operation.fee();
        if fee.asset != CORE_ASSET {
            return Err(ValidationError::FeeAssetNotNative.into());
        }
        let required = operation.required_fee(&parameters);
        if fee.amount < required {
            return Err(ValidationError::InsufficientFee { got: fee.amount, required }.into());
        }

        let payer = operation.fee_payer();
        let payer_account = self.store.account(payer)?.clone();
        let authority = if operation.requires_owner_authority() {
            &payer_account.owner
        } else {
            &payer_account.active
        };
        if !self.authority_satisfied(authority, signed, 0) {
            return Err(LedgerError::Authorization { account: payer.object_id() });
        }

        if fee.amount > 0 {
            self.adjust_balance(payer, AssetAmount::new(-fee.amount, CORE_ASSET))?;
            let vesting = fee.amount >= parameters.cashback_vesting_threshold;
            self.store.modify_account_stats(payer_account.statistics, |stats| {
                if vesting {
                    stats.pending_fees += fee.amount;
                } else {
                    stats.pending_vested_fees += fee.amount;
                }
            })?;
        }

        match operation {
            Operation::Transfer(op) => self.apply_transfer(op)?,
            Operation::AccountCreate(op) => self.apply_account_create(op, now)?,
            Operation::AccountUpdate(op) => self.apply_account_update(op)?,
            Operation::AccountUpgrade(op) => self.apply_account_upgrade(op)?,
            Operation::AssetCreate(op) => self.apply_asset_create(op)?,
            Operation::AssetIssue(op) => self.apply_asset_issue(op)?,
            Operation::PublishFeed(op) => self.apply_publish_feed(op, now)?,
            Operation::LimitOrderCreate(op) => {
                self.apply_limit_order_create(op, now)?;
            }
            Operation::LimitOrderCancel(op) => self.apply_limit_order_cancel(op)?,
            Operation::ShortOrderCreate(op) => {
                self.apply_short_order_create(op, now)?;
            }
            Operation::ShortOrderCancel(op) => self.apply_short_order_cancel(op)?,
            Operation::CallOrderUpdate(op) => self.apply_call_order_update(op)?,
            Operation::ForceSettle(op) => self.apply_force_settle(op, now)?,
            Operation::WitnessCreate(op) => self.apply_witness_create(op)?,
            Operation::DelegateCreate(op) => self.apply_delegate_create(op)?,
            Operation::WorkerCreate(op) => self.apply_worker_create(op, now)?,
            Operation::ParametersUpdate(op) => self.apply_parameters_update(op)?,
        }

        self.push_applied(AppliedOperation::User(operation.clone()));
        Ok(())
    }

    fn apply_transfer(&mut self, op: &Transfer) -> Result<(), LedgerError> {
        if op.amount.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.store.account(op.to)?;
        self.store.asset(op.amount.asset)?;
        self.adjust_balance(op.from, AssetAmount::new(-op.amount.amount, op.amount.asset))?;
        self.adjust_balance(op.to, op.amount)
    }

    fn apply_account_create(
        &mut self,
        op: &AccountCreate,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        validate_account_name(&op.name)?;
        if op.referrer_rewards_percentage > basalt_primitives::HUNDRED_PERCENT {
            return Err(ValidationError::PercentageOutOfBounds(op.referrer_rewards_percentage).into());
        }
        let parameters = self.store.global_properties().parameters.clone();
        let max_members = parameters.max_authority_membership as usize;
        op.owner.validate(max_members)?;
        op.active.validate(max_members)?;

        let registrar = self.store.account(op.registrar)?;
        if !registrar.is_member(now) {
            return Err(PreconditionError::RegistrarNotMember(op.registrar.object_id()).into());
        }
        self.store.account(op.referrer)?;
        if self.store.index.account_by_name.contains_key(&op.name) {
            return Err(PreconditionError::DuplicateAccountName(op.name.clone()).into());
        }

        self.register_account(
            op.name.clone(),
            op.registrar,
            op.referrer,
            op.referrer_rewards_percentage,
            op.owner.clone(),
            op.active.clone(),
            op.options.clone(),
            &parameters,
            None,
        )?;
        Ok(())
    }

    fn apply_account_update(&mut self, op: &AccountUpdate) -> Result<(), LedgerError> {
        let max_members =
            self.store.global_properties().parameters.max_authority_membership as usize;
        if let Some(owner) = &op.new_owner {
            owner.validate(max_members)?;
        }
        if let Some(active) = &op.new_active {
            active.validate(max_members)?;
        }
        self.store.account(op.account)?;
        self.store.modify_account(op.account, |account| {
            if let Some(owner) = &op.new_owner {
                account.owner = owner.clone();
            }
            if let Some(active) = &op.new_active {
                account.active = active.clone();
            }
            if let Some(options) = &op.new_options {
                account.options = options.clone();
            }
        })?;
        Ok(())
    }

    fn apply_account_upgrade(&mut self, op: &AccountUpgrade) -> Result<(), LedgerError> {
        let account = self.store.account(op.account)?;
        if account.is_lifetime_member() {
            return Err(PreconditionError::AlreadyLifetimeMember(op.account.object_id()).into());
        }
        self.store.modify_account(op.account, |account| {
            account.membership_expiration = Some(DateTime::<Utc>::MAX_UTC);
            account.lifetime_referrer = account.id;
        })?;
        Ok(())
    }

    fn apply_asset_create(&mut self, op: &AssetCreate) -> Result<(), LedgerError> {
        validate_symbol(&op.symbol)?;
        if op.precision > 12 {
            return Err(ValidationError::ParameterOutOfBounds("precision").into());
        }
        let options = &op.options;
        if options.market_fee_percent > basalt_primitives::HUNDRED_PERCENT {
            return Err(ValidationError::PercentageOutOfBounds(options.market_fee_percent).into());
        }
        if options.max_supply <= 0
            || options.max_supply > basalt_primitives::MAX_SHARE_SUPPLY
            || options.min_market_fee < 0
            || options.max_market_fee < options.min_market_fee
        {
            return Err(ValidationError::ParameterOutOfBounds("asset options").into());
        }
        if self.store.index.asset_by_symbol.contains_key(&op.symbol) {
            return Err(PreconditionError::DuplicateAssetSymbol(op.symbol.clone()).into());
        }
        let pegged = match op.backing_asset {
            Some(backing) => {
                self.store.asset(backing)?;
                Some(PeggedData::new(backing))
            }
            None => None,
        };

        self.store.create(Entity::Asset(Asset {
            id: basalt_primitives::AssetId(0),
            symbol: op.symbol.clone(),
            issuer: op.issuer,
            precision: op.precision,
            options: op.options.clone(),
            current_supply: 0,
            accumulated_fees: 0,
            pegged,
        }))?;
        Ok(())
    }

    fn apply_asset_issue(&mut self, op: &AssetIssue) -> Result<(), LedgerError> {
        if op.amount.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let asset = self.store.asset(op.amount.asset)?;
        if asset.issuer != op.issuer {
            return Err(PreconditionError::IssuerMismatch(op.amount.asset.object_id()).into());
        }
        if asset.is_pegged() {
            // Pegged supply only enters through shorts and margin borrowing.
            return Err(PreconditionError::MarketPegged(op.amount.asset.object_id()).into());
        }
        if asset.current_supply + op.amount.amount > asset.options.max_supply {
            return Err(basalt_primitives::ArithmeticError::SupplyExceeded.into());
        }
        self.store.account(op.issue_to)?;
        self.store.modify_asset(op.amount.asset, |asset| {
            asset.current_supply += op.amount.amount;
        })?;
        self.adjust_balance(op.issue_to, op.amount)
    }

    fn apply_publish_feed(&mut self, op: &PublishFeed, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let asset = self.store.asset(op.asset)?;
        let Some(pegged) = &asset.pegged else {
            return Err(PreconditionError::NotMarketPegged(op.asset.object_id()).into());
        };
        let backing = pegged.backing_asset;

        op.feed.call_limit.validate()?;
        op.feed.settlement_price.validate()?;
        let call_limit_oriented = op.feed.call_limit.base.asset == backing
            && op.feed.call_limit.quote.asset == op.asset;
        let settlement_oriented = op.feed.settlement_price.base.asset == op.asset
            && op.feed.settlement_price.quote.asset == backing;
        if !call_limit_oriented || !settlement_oriented {
            return Err(basalt_primitives::PriceError::MarketMismatch.into());
        }

        if !self.store.global_properties().witness_accounts.contains(&op.publisher) {
            return Err(PreconditionError::NotFeedProducer(op.publisher.object_id()).into());
        }

        let lifetime = self.store.global_properties().parameters.price_feed_lifetime_sec;
        self.store.modify_asset(op.asset, |asset| {
            if let Some(pegged) = &mut asset.pegged {
                pegged.feeds.insert(
                    op.publisher,
                    crate::entity::FeedEntry { published: now, feed: op.feed },
                );
                pegged.update_median_feed(now, lifetime);
            }
        })?;

        self.check_call_orders(op.asset)?;
        Ok(())
    }

    fn apply_limit_order_create(
        &mut self,
        op: &LimitOrderCreate,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if op.amount_to_sell.amount <= 0 || op.min_to_receive.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if op.expiration <= now {
            return Err(ValidationError::OrderExpirationInPast.into());
        }
        self.store.asset(op.amount_to_sell.asset)?;
        self.store.asset(op.min_to_receive.asset)?;
        let sell_price = Price::new(op.amount_to_sell, op.min_to_receive);
        sell_price.validate()?;

        self.adjust_balance(
            op.seller,
            AssetAmount::new(-op.amount_to_sell.amount, op.amount_to_sell.asset),
        )?;
        if op.amount_to_sell.asset == CORE_ASSET {
            let stats_id = self.store.account(op.seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders += op.amount_to_sell.amount;
            })?;
        }

        let id = self.store.create(Entity::LimitOrder(LimitOrder {
            id: basalt_primitives::LimitOrderId(0),
            seller: op.seller,
            for_sale: op.amount_to_sell.amount,
            sell_price,
            expiration: op.expiration,
        }))?;
        self.apply_limit_order(basalt_primitives::LimitOrderId(id.instance))
    }

    fn apply_limit_order_cancel(&mut self, op: &LimitOrderCancel) -> Result<(), LedgerError> {
        let order = self.store.limit_order(op.order)?;
        if order.seller != op.fee_paying_account {
            return Err(PreconditionError::NotOrderOwner(op.order.object_id()).into());
        }
        self.cancel_limit_order(op.order)
    }

    fn apply_short_order_create(
        &mut self,
        op: &ShortOrderCreate,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if op.amount_to_sell.amount <= 0 || op.min_to_receive.amount <= 0 || op.collateral.amount <= 0
        {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if op.expiration <= now {
            return Err(ValidationError::OrderExpirationInPast.into());
        }
        let asset = self.store.asset(op.amount_to_sell.asset)?;
        let Some(pegged) = &asset.pegged else {
            return Err(PreconditionError::NotMarketPegged(op.amount_to_sell.asset.object_id()).into());
        };
        let backing = pegged.backing_asset;
        if op.min_to_receive.asset != backing || op.collateral.asset != backing {
            return Err(basalt_primitives::PriceError::MarketMismatch.into());
        }
        let ratio = if op.maintenance_collateral_ratio == 0 {
            DEFAULT_MAINTENANCE_COLLATERAL_RATIO
        } else {
            op.maintenance_collateral_ratio
        };
        if !(MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&ratio) {
            return Err(ValidationError::CollateralRatioOutOfBounds(ratio).into());
        }
        // The pledge must at least match the proceeds the buyer will add, so
        // a freshly minted position starts at 2x or better.
        if op.collateral.amount < op.min_to_receive.amount {
            return Err(PreconditionError::Undercollateralized.into());
        }

        let sell_price = Price::new(op.amount_to_sell, op.min_to_receive);
        sell_price.validate()?;

        self.adjust_balance(
            op.seller,
            AssetAmount::new(-op.collateral.amount, op.collateral.asset),
        )?;
        if op.collateral.asset == CORE_ASSET {
            let stats_id = self.store.account(op.seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders += op.collateral.amount;
            })?;
        }

        let id = self.store.create(Entity::ShortOrder(ShortOrder {
            id: basalt_primitives::ShortOrderId(0),
            seller: op.seller,
            for_sale: op.amount_to_sell.amount,
            sell_price,
            available_collateral: op.collateral.amount,
            maintenance_collateral_ratio: ratio,
            expiration: op.expiration,
        }))?;
        self.apply_short_order(basalt_primitives::ShortOrderId(id.instance))
    }

    fn apply_short_order_cancel(&mut self, op: &ShortOrderCancel) -> Result<(), LedgerError> {
        let order = self.store.short_order(op.order)?;
        if order.seller != op.fee_paying_account {
            return Err(PreconditionError::NotOrderOwner(op.order.object_id()).into());
        }
        self.cancel_short_order(op.order)
    }

    fn apply_call_order_update(&mut self, op: &CallOrderUpdate) -> Result<(), LedgerError> {
        if op.delta_collateral.amount == 0 && op.delta_debt.amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let debt_asset = self.store.asset(op.delta_debt.asset)?;
        let Some(pegged) = &debt_asset.pegged else {
            return Err(PreconditionError::NotMarketPegged(op.delta_debt.asset.object_id()).into());
        };
        let backing = pegged.backing_asset;
        let max_supply = debt_asset.options.max_supply;
        if op.delta_collateral.asset != backing {
            return Err(basalt_primitives::PriceError::MarketMismatch.into());
        }
        let pegged_asset = op.delta_debt.asset;

        // Collateral moves first so borrowing against the new margin works.
        if op.delta_collateral.amount > 0 {
            self.adjust_balance(
                op.funding_account,
                AssetAmount::new(-op.delta_collateral.amount, backing),
            )?;
        }

        let existing =
            self.store.index.call_by_borrower.get(&(op.funding_account, pegged_asset)).copied();
        let call_id = match existing {
            Some(call_id) => {
                self.store.modify_call_order(call_id, |call| {
                    call.collateral += op.delta_collateral.amount;
                    call.debt += op.delta_debt.amount;
                    call.update_call_price();
                })?;
                call_id
            }
            None => {
                if op.delta_debt.amount <= 0 || op.delta_collateral.amount <= 0 {
                    return Err(ValidationError::NonPositiveAmount.into());
                }
                let mut call = CallOrder {
                    id: CallOrderId(0),
                    borrower: op.funding_account,
                    collateral: op.delta_collateral.amount,
                    debt: op.delta_debt.amount,
                    maintenance_collateral_ratio: DEFAULT_MAINTENANCE_COLLATERAL_RATIO,
                    call_price: Price::new(
                        AssetAmount::new(1, backing),
                        AssetAmount::new(1, pegged_asset),
                    ),
                };
                call.update_call_price();
                let id = self.store.create(Entity::CallOrder(call))?;
                CallOrderId(id.instance)
            }
        };

        let call = self.store.call_order(call_id)?.clone();
        if call.debt < 0 || call.collateral < 0 {
            return Err(PreconditionError::Undercollateralized.into());
        }

        // Debt delta mints into or burns from the borrower's balance.
        if op.delta_debt.amount > 0 {
            let supply = self.store.asset(pegged_asset)?.current_supply;
            if supply + op.delta_debt.amount > max_supply {
                return Err(basalt_primitives::ArithmeticError::SupplyExceeded.into());
            }
            self.store.modify_asset(pegged_asset, |asset| {
                asset.current_supply += op.delta_debt.amount;
            })?;
            self.adjust_balance(op.funding_account, op.delta_debt)?;
        } else if op.delta_debt.amount < 0 {
            self.adjust_balance(op.funding_account, op.delta_debt)?;
            self.store.modify_asset(pegged_asset, |asset| {
                asset.current_supply += op.delta_debt.amount;
            })?;
        }

        if backing == CORE_ASSET {
            let stats_id = self.store.account(op.funding_account)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders += op.delta_collateral.amount;
            })?;
        }
        if op.delta_collateral.amount < 0 {
            self.adjust_balance(
                op.funding_account,
                AssetAmount::new(-op.delta_collateral.amount, backing),
            )?;
        }

        if call.debt == 0 {
            // Fully repaid: the remaining collateral comes home.
            if call.collateral > 0 {
                self.adjust_balance(
                    op.funding_account,
                    AssetAmount::new(call.collateral, backing),
                )?;
                if backing == CORE_ASSET {
                    let stats_id = self.store.account(op.funding_account)?.statistics;
                    self.store.modify_account_stats(stats_id, |stats| {
                        stats.total_core_in_orders -= call.collateral;
                    })?;
                }
            }
            self.store.remove(call_id.object_id())?;
        } else {
            if call.collateral <= 0 {
                return Err(PreconditionError::Undercollateralized.into());
            }
            let feed = self.store.asset(pegged_asset)?.pegged.as_ref().and_then(|p| p.current_feed);
            match feed {
                Some(feed) => {
                    // The resulting position must not be instantly callable.
                    if call.call_price.cmp_in_market(&feed.call_limit)?
                        != std::cmp::Ordering::Greater
                    {
                        return Err(PreconditionError::Undercollateralized.into());
                    }
                }
                None => {
                    let required = i128::from(call.debt)
                        * i128::from(call.maintenance_collateral_ratio)
                        / i128::from(COLLATERAL_RATIO_DENOM);
                    if i128::from(call.collateral) < required {
                        return Err(PreconditionError::Undercollateralized.into());
                    }
                }
            }
        }

        self.check_call_orders(pegged_asset)?;
        Ok(())
    }

    fn apply_force_settle(&mut self, op: &ForceSettle, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if op.amount.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let asset = self.store.asset(op.amount.asset)?;
        let Some(pegged) = &asset.pegged else {
            return Err(PreconditionError::NotMarketPegged(op.amount.asset.object_id()).into());
        };
        if pegged.current_feed.is_none() {
            return Err(PreconditionError::NoPriceFeed(op.amount.asset.object_id()).into());
        }
        let delay = self.store.global_properties().parameters.force_settlement_delay_sec;

        self.adjust_balance(op.account, AssetAmount::new(-op.amount.amount, op.amount.asset))?;
        self.store.create(Entity::ForceSettlement(ForceSettlement {
            id: SettlementId(0),
            owner: op.account,
            balance: op.amount,
            settlement_date: now + Duration::seconds(i64::from(delay)),
        }))?;
        Ok(())
    }

    fn apply_witness_create(&mut self, op: &WitnessCreate) -> Result<(), LedgerError> {
        self.store.account(op.witness_account)?;
        let vote_id = self.allocate_vote_id();
        self.store.create(Entity::Witness(Witness {
            id: basalt_primitives::WitnessId(0),
            witness_account: op.witness_account,
            signing_key: op.signing_key.clone(),
            vote_id,
            last_block: 0,
            total_missed: 0,
        }))?;
        Ok(())
    }

    fn apply_delegate_create(&mut self, op: &DelegateCreate) -> Result<(), LedgerError> {
        self.store.account(op.delegate_account)?;
        let vote_id = self.allocate_vote_id();
        self.store.create(Entity::Delegate(Delegate {
            id: basalt_primitives::DelegateId(0),
            delegate_account: op.delegate_account,
            vote_id,
        }))?;
        Ok(())
    }

    fn apply_worker_create(&mut self, op: &WorkerCreate, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if op.daily_pay <= 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if op.work_end <= op.work_begin || op.work_end <= now {
            return Err(ValidationError::OrderExpirationInPast.into());
        }
        self.store.account(op.owner)?;
        let vote_id = self.allocate_vote_id();
        self.store.create(Entity::Worker(Worker {
            id: WorkerId(0),
            worker_account: op.owner,
            daily_pay: op.daily_pay,
            work_begin: op.work_begin,
            work_end: op.work_end,
            vote_id,
            kind: op.kind,
            total_paid: 0,
        }))?;
        Ok(())
    }

    fn apply_parameters_update(&mut self, op: &ParametersUpdate) -> Result<(), LedgerError> {
        op.new_parameters.validate()?;
        self.store.modify_global_properties(|gpo| {
            gpo.pending_parameters = Some(op.new_parameters.clone());
        });
        Ok(())
    }

    fn allocate_vote_id(&mut self) -> VoteId {
        self.store.modify_global_properties(|gpo| {
            let id = VoteId(gpo.next_available_vote_id);
            gpo.next_available_vote_id += 1;
            id
        })
    }
}
