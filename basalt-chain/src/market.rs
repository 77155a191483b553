//! Order matching, margin calls, and settlement.
//!
//! Books are matched greedily best-price-first at the resting order's price.
//! Short fills mint pegged supply into a call order; call fills burn it.
//! When a margin call cannot deliver enough collateral at the match price,
//! the whole asset settles globally at `debt / collateral`.

use basalt_primitives::{
    AccountId, AssetAmount, AssetId, CallOrderId, LimitOrderId, Price, SettlementId, ShortOrderId,
    cut_percent,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};

use crate::{
    entity::{Asset, CallOrder, Entity},
    error::{LedgerError, PreconditionError},
    ledger::{CORE_ASSET, Ledger},
    operation::{AppliedOperation, FillOrder},
    store::{CallOrderKey, LimitOrderKey, ShortOrderKey},
};

/// Either kind of book order the matching cursor can point at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum OrderRef {
    Limit(LimitOrderId),
    Short(ShortOrderId),
}

impl Ledger {
    /// The fee charged on `amount` received in `asset`: the percentage cut
    /// clamped into the issuer's `[min, max]` band.
    pub fn calculate_market_fee(asset: &Asset, amount: i64) -> i64 {
        if !asset.charges_market_fees() {
            return 0;
        }
        if asset.options.market_fee_percent == 0 {
            return asset.options.min_market_fee.min(amount);
        }
        cut_percent(amount, asset.options.market_fee_percent)
            .clamp(asset.options.min_market_fee, asset.options.max_market_fee)
            .min(amount)
    }

    /// Charge the receiving side's market fee and accrue it to the asset.
    fn pay_market_fees(&mut self, asset_id: AssetId, amount: i64) -> Result<i64, LedgerError> {
        let asset = self.store.asset(asset_id)?;
        let fee = Self::calculate_market_fee(asset, amount);
        if fee > 0 {
            self.store.modify_asset(asset_id, |asset| asset.accumulated_fees += fee)?;
        }
        Ok(fee)
    }

    /// Deliver proceeds to a seller, releasing the paid amount from the
    /// seller's core-in-orders tally.
    fn pay_order(
        &mut self,
        seller: AccountId,
        receives: AssetAmount,
        pays: AssetAmount,
    ) -> Result<(), LedgerError> {
        if pays.asset == CORE_ASSET {
            let stats_id = self.store.account(seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders -= pays.amount;
            })?;
        }
        self.adjust_balance(seller, receives)
    }

    /// Fill one side of a limit order. Returns true when the order left the
    /// book (fully filled, or residual dust refunded).
    pub(crate) fn fill_limit_order(
        &mut self,
        order_id: LimitOrderId,
        pays: AssetAmount,
        receives: AssetAmount,
    ) -> Result<bool, LedgerError> {
        let order = self.store.limit_order(order_id)?.clone();
        debug_assert_eq!(pays.asset, order.sell_price.base.asset);

        let fee = self.pay_market_fees(receives.asset, receives.amount)?;
        self.pay_order(order.seller, AssetAmount::new(receives.amount - fee, receives.asset), pays)?;
        self.push_applied(AppliedOperation::Fill(FillOrder {
            order: order_id.object_id(),
            account: order.seller,
            pays,
            receives,
            fee: AssetAmount::new(fee, receives.asset),
        }));

        if pays.amount == order.for_sale {
            self.store.remove(order_id.object_id())?;
            return Ok(true);
        }

        self.store.modify_limit_order(order_id, |order| order.for_sale -= pays.amount)?;
        // A residual that can no longer buy a single unit is unfillable at
        // this price; refund it instead of leaving stuck dust on the book.
        if self.store.limit_order(order_id)?.amount_to_receive()?.amount == 0 {
            self.cancel_limit_order(order_id)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn cancel_limit_order(&mut self, order_id: LimitOrderId) -> Result<(), LedgerError> {
        let order = self.store.limit_order(order_id)?.clone();
        let refund = order.amount_for_sale();
        if refund.asset == CORE_ASSET {
            let stats_id = self.store.account(order.seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders -= refund.amount;
            })?;
        }
        self.adjust_balance(order.seller, refund)?;
        self.store.remove(order_id.object_id())?;
        Ok(())
    }

    /// Fill one side of a short order: the paid pegged units are minted, and
    /// the seller's pledged collateral plus the buyer's payment become (or
    /// grow) the seller's call order.
    pub(crate) fn fill_short_order(
        &mut self,
        order_id: ShortOrderId,
        pays: AssetAmount,
        receives: AssetAmount,
    ) -> Result<bool, LedgerError> {
        let order = self.store.short_order(order_id)?.clone();
        debug_assert_eq!(pays.asset, order.sell_price.base.asset);
        let pegged_asset = pays.asset;

        let fee = self.pay_market_fees(receives.asset, receives.amount)?;
        let mut filled = pays.amount == order.for_sale;
        let seller_to_collateral = if filled {
            order.available_collateral
        } else {
            order.sell_price.convert(&pays)?.amount
        };
        let buyer_to_collateral = receives.amount - fee;

        if receives.asset == CORE_ASSET {
            let stats_id = self.store.account(order.seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders += buyer_to_collateral;
            })?;
        }

        let asset = self.store.asset(pegged_asset)?;
        if asset.current_supply + pays.amount > asset.options.max_supply {
            return Err(basalt_primitives::ArithmeticError::SupplyExceeded.into());
        }
        self.store.modify_asset(pegged_asset, |asset| asset.current_supply += pays.amount)?;

        match self.store.index.call_by_borrower.get(&(order.seller, pegged_asset)).copied() {
            Some(call_id) => {
                self.store.modify_call_order(call_id, |call| {
                    call.debt += pays.amount;
                    call.collateral += seller_to_collateral + buyer_to_collateral;
                    call.maintenance_collateral_ratio = order.maintenance_collateral_ratio;
                    call.update_call_price();
                })?;
            }
            None => {
                let mut call = CallOrder {
                    id: CallOrderId(0),
                    borrower: order.seller,
                    collateral: seller_to_collateral + buyer_to_collateral,
                    debt: pays.amount,
                    maintenance_collateral_ratio: order.maintenance_collateral_ratio,
                    call_price: Price::new(
                        AssetAmount::new(1, receives.asset),
                        AssetAmount::new(1, pegged_asset),
                    ),
                };
                call.update_call_price();
                self.store.create(Entity::CallOrder(call))?;
            }
        }

        if filled {
            self.store.remove(order_id.object_id())?;
        } else {
            self.store.modify_short_order(order_id, |order| {
                order.for_sale -= pays.amount;
                order.available_collateral -= seller_to_collateral;
            })?;
            let remaining = self.store.short_order(order_id)?.clone();
            if remaining.for_sale <= 0 || remaining.available_collateral <= 0 {
                return Err(LedgerError::Invariant(
                    "partially filled short lost its remaining collateral".into(),
                ));
            }
            if remaining.amount_to_receive()?.amount == 0 {
                // Same dust rule as limit orders: refund the pledge.
                if remaining.collateral_asset() == CORE_ASSET {
                    let stats_id = self.store.account(order.seller)?.statistics;
                    self.store.modify_account_stats(stats_id, |stats| {
                        stats.total_core_in_orders -= remaining.available_collateral;
                    })?;
                }
                self.adjust_balance(order.seller, remaining.amount_of_collateral())?;
                self.store.remove(order_id.object_id())?;
                filled = true;
            }
        }

        self.push_applied(AppliedOperation::Fill(FillOrder {
            order: order_id.object_id(),
            account: order.seller,
            pays,
            receives,
            fee: AssetAmount::new(fee, receives.asset),
        }));
        Ok(filled)
    }

    pub(crate) fn cancel_short_order(&mut self, order_id: ShortOrderId) -> Result<(), LedgerError> {
        let order = self.store.short_order(order_id)?.clone();
        let refund = order.amount_of_collateral();
        if refund.asset == CORE_ASSET {
            let stats_id = self.store.account(order.seller)?.statistics;
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders -= refund.amount;
            })?;
        }
        self.adjust_balance(order.seller, refund)?;
        self.store.remove(order_id.object_id())?;
        Ok(())
    }

    /// Reduce a call's debt and collateral. Zero debt frees the remaining
    /// collateral back to the borrower and removes the position. Returns
    /// true when the call was removed.
    pub(crate) fn fill_call_order(
        &mut self,
        call_id: CallOrderId,
        pays: AssetAmount,
        receives: AssetAmount,
    ) -> Result<bool, LedgerError> {
        let call = self.store.call_order(call_id)?.clone();
        debug_assert_eq!(receives.asset, call.debt_asset());
        debug_assert_eq!(pays.asset, call.collateral_asset());
        if pays.amount > call.collateral || receives.amount > call.debt {
            return Err(LedgerError::Invariant("call fill exceeds the position".into()));
        }

        let mut collateral_freed: Option<i64> = None;
        self.store.modify_call_order(call_id, |call| {
            call.debt -= receives.amount;
            call.collateral -= pays.amount;
            if call.debt == 0 {
                collateral_freed = Some(call.collateral);
                call.collateral = 0;
            }
            call.update_call_price();
        })?;

        self.store.modify_asset(receives.asset, |asset| {
            asset.current_supply -= receives.amount;
        })?;

        if pays.asset == CORE_ASSET {
            let stats_id = self.store.account(call.borrower)?.statistics;
            let locked_release = pays.amount + collateral_freed.unwrap_or(0);
            self.store.modify_account_stats(stats_id, |stats| {
                stats.total_core_in_orders -= locked_release;
            })?;
        }
        if let Some(freed) = collateral_freed {
            if freed > 0 {
                self.adjust_balance(call.borrower, AssetAmount::new(freed, pays.asset))?;
            }
            self.store.remove(call_id.object_id())?;
        }

        self.push_applied(AppliedOperation::Fill(FillOrder {
            order: call_id.object_id(),
            account: call.borrower,
            pays,
            receives,
            fee: AssetAmount::new(0, pays.asset),
        }));
        Ok(collateral_freed.is_some())
    }

    /// Fill a queued force settlement. Returns true when fully settled.
    pub(crate) fn fill_settlement(
        &mut self,
        settlement_id: SettlementId,
        pays: AssetAmount,
        receives: AssetAmount,
    ) -> Result<bool, LedgerError> {
        let settlement = self.store.settlement(settlement_id)?.clone();
        let fee = self.pay_market_fees(receives.asset, receives.amount)?;

        let filled = if pays.amount < settlement.balance.amount {
            self.store.modify_settlement(settlement_id, |settlement| {
                settlement.balance.amount -= pays.amount;
            })?;
            false
        } else {
            self.store.remove(settlement_id.object_id())?;
            true
        };
        self.adjust_balance(
            settlement.owner,
            AssetAmount::new(receives.amount - fee, receives.asset),
        )?;

        self.push_applied(AppliedOperation::Fill(FillOrder {
            order: settlement_id.object_id(),
            account: settlement.owner,
            pays,
            receives,
            fee: AssetAmount::new(fee, receives.asset),
        }));
        Ok(filled)
    }

    pub(crate) fn cancel_settlement(&mut self, settlement_id: SettlementId) -> Result<(), LedgerError> {
        let settlement = self.store.settlement(settlement_id)?.clone();
        self.adjust_balance(settlement.owner, settlement.balance)?;
        self.store.remove(settlement_id.object_id())?;
        Ok(())
    }

    fn order_ref_for_sale(&self, order: OrderRef) -> Result<AssetAmount, LedgerError> {
        Ok(match order {
            OrderRef::Limit(id) => self.store.limit_order(id)?.amount_for_sale(),
            OrderRef::Short(id) => self.store.short_order(id)?.amount_for_sale(),
        })
    }

    fn fill_order_ref(
        &mut self,
        order: OrderRef,
        pays: AssetAmount,
        receives: AssetAmount,
    ) -> Result<bool, LedgerError> {
        match order {
            OrderRef::Limit(id) => self.fill_limit_order(id, pays, receives),
            OrderRef::Short(id) => self.fill_short_order(id, pays, receives),
        }
    }

    /// Match two crossing orders at `match_price` (the resting order's
    /// price). Bit 0 reports the taker leaving the book, bit 1 the maker; at
    /// least one side is always fully filled.
    fn match_orders(
        &mut self,
        taker: OrderRef,
        maker: OrderRef,
        match_price: Price,
    ) -> Result<u8, LedgerError> {
        let taker_for_sale = self.order_ref_for_sale(taker)?;
        let maker_for_sale = self.order_ref_for_sale(maker)?;
        debug_assert_eq!(taker_for_sale.asset, match_price.quote.asset);
        debug_assert_eq!(maker_for_sale.asset, match_price.base.asset);

        let maker_capacity = match_price.convert(&maker_for_sale)?;
        let (taker_receives, maker_receives);
        if taker_for_sale.amount <= maker_capacity.amount {
            maker_receives = taker_for_sale;
            taker_receives = match_price.convert(&taker_for_sale)?;
        } else {
            taker_receives = maker_for_sale;
            maker_receives = match_price.convert(&maker_for_sale)?;
        }
        let taker_pays = maker_receives;
        let maker_pays = taker_receives;
        if taker_pays != taker_for_sale && maker_pays != maker_for_sale {
            return Err(LedgerError::Invariant("match fills neither side completely".into()));
        }

        let mut result = 0u8;
        if self.fill_order_ref(taker, taker_pays, taker_receives)? {
            result |= 1;
        }
        if self.fill_order_ref(maker, maker_pays, maker_receives)? {
            result |= 2;
        }
        if result == 0 {
            return Err(LedgerError::Invariant("match removed neither order".into()));
        }
        Ok(result)
    }

    /// Match a freshly placed limit order against the opposing limit book
    /// and, when it is buying a pegged asset with its backing, the short
    /// book. Returns true when the order never rested.
    pub(crate) fn apply_limit_order(&mut self, order_id: LimitOrderId) -> Result<bool, LedgerError> {
        let order = self.store.limit_order(order_id)?.clone();
        let sell_asset = order.sell_price.base.asset;
        let receive_asset = order.sell_price.quote.asset;

        let shorts_eligible = matches!(
            &self.store.asset(receive_asset)?.pegged,
            Some(pegged) if pegged.backing_asset == sell_asset
        );

        loop {
            let Ok(taker) = self.store.limit_order(order_id) else { break };
            let floor = taker.sell_price.invert();

            let best_limit = self
                .store
                .index
                .limit_by_price
                .range(
                    LimitOrderKey::market_start(receive_asset, sell_asset)
                        ..=LimitOrderKey::price_floor(floor),
                )
                .next()
                .cloned();
            let best_short = if shorts_eligible {
                self.store
                    .index
                    .short_by_price
                    .range(
                        ShortOrderKey::market_start(receive_asset, sell_asset)
                            ..=ShortOrderKey::price_floor(floor),
                    )
                    .next()
                    .cloned()
            } else {
                None
            };

            let (maker, match_price) = match (best_limit, best_short) {
                (Some(limit), Some(short)) => {
                    // A strictly better short outbids the limit; ties prefer
                    // the limit book.
                    if limit.price.cmp_in_market(&short.price)? == Ordering::Less {
                        (OrderRef::Short(short.id), short.price)
                    } else {
                        (OrderRef::Limit(limit.id), limit.price)
                    }
                }
                (Some(limit), None) => (OrderRef::Limit(limit.id), limit.price),
                (None, Some(short)) => (OrderRef::Short(short.id), short.price),
                (None, None) => break,
            };

            let result = self.match_orders(OrderRef::Limit(order_id), maker, match_price)?;
            if result & 1 != 0 {
                break;
            }
        }

        for asset_id in [sell_asset, receive_asset] {
            if self.store.asset(asset_id)?.is_pegged() {
                self.check_call_orders(asset_id)?;
            }
        }
        Ok(!self.store.contains(order_id.object_id()))
    }

    /// Match a freshly placed short order against resting bids for the
    /// pegged asset, then re-check margin positions.
    pub(crate) fn apply_short_order(&mut self, order_id: ShortOrderId) -> Result<bool, LedgerError> {
        let order = self.store.short_order(order_id)?.clone();
        let pegged_asset = order.sell_price.base.asset;
        let backing_asset = order.sell_price.quote.asset;

        loop {
            let Ok(taker) = self.store.short_order(order_id) else { break };
            let floor = taker.sell_price.invert();

            let Some(maker) = self
                .store
                .index
                .limit_by_price
                .range(
                    LimitOrderKey::market_start(backing_asset, pegged_asset)
                        ..=LimitOrderKey::price_floor(floor),
                )
                .next()
                .cloned()
            else {
                break;
            };

            let result =
                self.match_orders(OrderRef::Short(order_id), OrderRef::Limit(maker.id), maker.price)?;
            if result & 1 != 0 {
                break;
            }
        }

        self.check_call_orders(pegged_asset)?;
        Ok(!self.store.contains(order_id.object_id()))
    }

    /// Walk margin calls from the least-collateralized position while the
    /// merged limit/short cursor offers a price at which calls must buy.
    /// Triggers global settlement when a call cannot cover its debt at the
    /// match price. Returns true if any book order was consumed.
    pub fn check_call_orders(&mut self, asset_id: AssetId) -> Result<bool, LedgerError> {
        let asset = self.store.asset(asset_id)?;
        let Some(pegged) = &asset.pegged else { return Ok(false) };
        let Some(feed) = pegged.current_feed else { return Ok(false) };
        let backing_asset = pegged.backing_asset;
        // Only orders priced at-or-better than the feed's call limit are
        // eligible to feed margin calls.
        let book_floor = feed.call_limit.invert();

        let mut filled_any = false;
        loop {
            let Some(call_key) = self
                .store
                .index
                .call_by_price
                .range(
                    CallOrderKey::market_start(backing_asset, asset_id)
                        ..=CallOrderKey::market_end(backing_asset, asset_id),
                )
                .next()
                .cloned()
            else {
                break;
            };

            let best_limit = self
                .store
                .index
                .limit_by_price
                .range(
                    LimitOrderKey::market_start(asset_id, backing_asset)
                        ..=LimitOrderKey::price_floor(book_floor),
                )
                .next()
                .cloned();
            let best_short = self
                .store
                .index
                .short_by_price
                .range(
                    ShortOrderKey::market_start(asset_id, backing_asset)
                        ..=ShortOrderKey::price_floor(book_floor),
                )
                .next()
                .cloned();

            let (maker, match_price) = match (best_limit, best_short) {
                (Some(limit), Some(short)) => {
                    if limit.price.cmp_in_market(&short.price)? == Ordering::Less {
                        (OrderRef::Short(short.id), short.price)
                    } else {
                        (OrderRef::Limit(limit.id), limit.price)
                    }
                }
                (Some(limit), None) => (OrderRef::Limit(limit.id), limit.price),
                (None, Some(short)) => (OrderRef::Short(short.id), short.price),
                (None, None) => return Ok(filled_any),
            };
            match_price.validate()?;

            let call = self.store.call_order(call_key.id)?.clone();
            // The best offer demands more than the call's trigger price:
            // every remaining call is safely collateralized.
            if match_price.cmp_in_market(&call.call_price.invert())? == Ordering::Greater {
                return Ok(filled_any);
            }

            let debt = call.amount_of_debt();
            // A repayment cost beyond the representable share range cannot be
            // covered either.
            let covered = match match_price.convert(&debt) {
                Ok(cost) => cost.amount <= call.collateral,
                Err(basalt_primitives::ArithmeticError::SupplyExceeded) => false,
                Err(error) => return Err(error.into()),
            };
            if !covered {
                warn!(
                    asset = %self.store.asset(asset_id)?.symbol,
                    debt = debt.amount,
                    collateral = call.collateral,
                    "insufficient collateral at match price, settling globally"
                );
                let settlement_price = Price::new(debt, call.amount_of_collateral());
                self.globally_settle(asset_id, settlement_price)?;
                return Ok(true);
            }

            let offered = self.order_ref_for_sale(maker)?;
            let call_receives =
                if debt.amount >= offered.amount { offered } else { debt };
            let call_pays = match_price.convert(&call_receives)?;

            debug!(
                call = %call_key.id,
                receives = call_receives.amount,
                pays = call_pays.amount,
                "margin call fill"
            );
            self.fill_call_order(call_key.id, call_pays, call_receives)?;
            let order_gone = self.fill_order_ref(maker, call_receives, call_pays)?;
            filled_any |= order_gone;
        }
        Ok(filled_any)
    }

    /// Black-swan procedure: redeem every call at the settlement price,
    /// cancel every order and queued settlement touching the asset, convert
    /// every balance, and burn the asset's accumulated fees into the settled
    /// total. The settled total must equal the original supply exactly.
    pub fn globally_settle(
        &mut self,
        asset_id: AssetId,
        settlement_price: Price,
    ) -> Result<(), LedgerError> {
        let asset = self.store.asset(asset_id)?.clone();
        let pegged = asset
            .pegged
            .as_ref()
            .ok_or(PreconditionError::NotMarketPegged(asset_id.object_id()))?;
        let backing_asset = pegged.backing_asset;
        let original_supply = asset.current_supply;
        error!(asset = %asset.symbol, %settlement_price, "global settlement");

        let mut collateral_gathered: i64 = 0;
        let call_ids: Vec<CallOrderId> = self
            .store
            .index
            .call_by_price
            .range(
                CallOrderKey::market_start(backing_asset, asset_id)
                    ..=CallOrderKey::market_end(backing_asset, asset_id),
            )
            .map(|key| key.id)
            .collect();
        for call_id in call_ids {
            let debt = self.store.call_order(call_id)?.amount_of_debt();
            let pays = settlement_price.convert(&debt)?;
            collateral_gathered += pays.amount;
            if !self.fill_call_order(call_id, pays, debt)? {
                return Err(LedgerError::Invariant("settled call was not closed".into()));
            }
        }

        // Snapshot ids first; cancellation mutates the books while we walk.
        let limit_ids: Vec<LimitOrderId> = self
            .store
            .iter_kind(basalt_primitives::ObjectKind::LimitOrder)
            .filter_map(|entity| match entity {
                Entity::LimitOrder(order)
                    if order.sell_price.base.asset == asset_id
                        || order.sell_price.quote.asset == asset_id =>
                {
                    Some(order.id)
                }
                _ => None,
            })
            .collect();
        for order_id in limit_ids {
            self.cancel_limit_order(order_id)?;
        }

        let short_ids: Vec<ShortOrderId> = self
            .store
            .iter_kind(basalt_primitives::ObjectKind::ShortOrder)
            .filter_map(|entity| match entity {
                Entity::ShortOrder(order)
                    if order.sell_price.base.asset == asset_id
                        || order.sell_price.quote.asset == asset_id =>
                {
                    Some(order.id)
                }
                _ => None,
            })
            .collect();
        for order_id in short_ids {
            self.cancel_short_order(order_id)?;
        }

        let settlement_ids: Vec<SettlementId> = self
            .store
            .iter_kind(basalt_primitives::ObjectKind::ForceSettlement)
            .filter_map(|entity| match entity {
                Entity::ForceSettlement(settlement) if settlement.balance.asset == asset_id => {
                    Some(settlement.id)
                }
                _ => None,
            })
            .collect();
        for settlement_id in settlement_ids {
            self.cancel_settlement(settlement_id)?;
        }

        // With the books clear, the entire remaining float sits in balances.
        let holders: Vec<(AccountId, i64)> = self
            .store
            .index
            .balance_by_asset
            .range((asset_id, AccountId(0))..=(asset_id, AccountId(u64::MAX)))
            .map(|((_, owner), id)| {
                let amount = self.store.balance(*id).map(|balance| balance.amount).unwrap_or(0);
                (*owner, amount)
            })
            .collect();

        let mut total_settled: i64 = 0;
        for (owner, amount) in holders {
            if amount <= 0 {
                continue;
            }
            self.adjust_balance(owner, AssetAmount::new(-amount, asset_id))?;
            let credited = settlement_price.convert(&AssetAmount::new(amount, asset_id))?;
            self.adjust_balance(owner, credited)?;
            total_settled += amount;
            collateral_gathered -= credited.amount;
        }

        // Fees accumulated in the settled asset are forfeit.
        let forfeited_fees = self.store.asset(asset_id)?.accumulated_fees;
        self.store.modify_asset(asset_id, |asset| asset.accumulated_fees = 0)?;
        total_settled += forfeited_fees;

        if collateral_gathered < 0 {
            return Err(LedgerError::Invariant(
                "settlement credited more backing than was gathered".into(),
            ));
        }
        // Truncation residue evaporates into the backing asset's fee pool.
        self.store.modify_asset(backing_asset, |asset| {
            asset.accumulated_fees += collateral_gathered;
        })?;

        if total_settled != original_supply {
            return Err(LedgerError::Invariant(format!(
                "settled {} of {} supply units",
                total_settled, original_supply
            )));
        }
        info!(asset = %asset.symbol, settled = total_settled, "global settlement complete");
        Ok(())
    }

    /// Match eligible queued settlements against the cheapest calls at the
    /// discounted feed price, bounded per asset by the per-interval volume
    /// cap. Remainders stay queued.
    pub(crate) fn process_force_settlements(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let parameters = self.store.global_properties().parameters.clone();
        let asset_ids: Vec<AssetId> = self
            .store
            .iter_kind(basalt_primitives::ObjectKind::Asset)
            .filter_map(|entity| match entity {
                Entity::Asset(asset) if asset.is_pegged() => Some(asset.id),
                _ => None,
            })
            .collect();

        for asset_id in asset_ids {
            let asset = self.store.asset(asset_id)?.clone();
            let pegged = asset.pegged.as_ref().expect("filtered to pegged assets");
            let Some(feed) = pegged.current_feed else { continue };
            let backing_asset = pegged.backing_asset;

            let cap = cut_percent(asset.current_supply, parameters.force_settlement_max_volume);
            let mut available = cap - pegged.force_settled_volume;
            let settle_price =
                feed.settlement_price.discount_quote(parameters.force_settlement_offset_percent);

            while available > 0 {
                let Some((_, _, settlement_id)) = self
                    .store
                    .index
                    .settlement_by_date
                    .range(
                        (asset_id, DateTime::<Utc>::MIN_UTC, SettlementId(0))
                            ..=(asset_id, now, SettlementId(u64::MAX)),
                    )
                    .next()
                    .cloned()
                else {
                    break;
                };
                let Some(call_key) = self
                    .store
                    .index
                    .call_by_price
                    .range(
                        CallOrderKey::market_start(backing_asset, asset_id)
                            ..=CallOrderKey::market_end(backing_asset, asset_id),
                    )
                    .next()
                    .cloned()
                else {
                    // No debt left to settle against; leave the queue as is.
                    break;
                };

                let settlement = self.store.settlement(settlement_id)?.clone();
                let call = self.store.call_order(call_key.id)?.clone();
                let settle_for_sale = settlement.balance.amount.min(available);
                let call_receives =
                    AssetAmount::new(settle_for_sale.min(call.debt), asset_id);
                let call_pays = settle_price.convert(&call_receives)?;
                if call_pays.amount > call.collateral {
                    // The cheapest position cannot cover redemption at the
                    // feed price; the entire asset settles instead.
                    let swan_price = Price::new(call.amount_of_debt(), call.amount_of_collateral());
                    self.globally_settle(asset_id, swan_price)?;
                    break;
                }
                if call_receives.amount == 0 || call_pays.amount == 0 {
                    // Too small to ever pay out; refund instead of spinning.
                    self.cancel_settlement(settlement_id)?;
                    continue;
                }

                self.fill_call_order(call_key.id, call_pays, call_receives)?;
                self.fill_settlement(settlement_id, call_receives, call_pays)?;
                available -= call_receives.amount;
                self.store.modify_asset(asset_id, |asset| {
                    if let Some(pegged) = &mut asset.pegged {
                        pegged.force_settled_volume += call_receives.amount;
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Selling council-managed pegged assets' accumulated fees into the
    /// native asset is declared but not performed.
    // TODO: market-sell accumulated fees of council-issued pegged assets
    // against the best native-asset bid during maintenance.
    pub fn convert_accumulated_fees(&self, asset: &Asset) -> bool {
        if asset.issuer != crate::ledger::COUNCIL_ACCOUNT {
            return false;
        }
        false
    }
}
