//! The maintenance cycle: one pass over all accounts tallies stake-weighted
//! votes and disburses pending fees, then the active sets are re-elected,
//! queued settlements are processed, pending parameters activate, and the
//! witness/worker budget is recomputed from the reserve.

use basalt_primitives::{
    AccountId, AssetAmount, DelegateId, MAX_SHARE_SUPPLY, ObjectKind, WitnessId, WorkerId,
    cut_percent,
};
use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{
    block::Block,
    config::{
        CORE_ASSET_CYCLE_RATE, CORE_ASSET_CYCLE_RATE_BITS, MIN_DELEGATE_COUNT, MIN_WITNESS_COUNT,
    },
    entity::{Account, Entity, WorkerKind, account::bulk_discount_cut},
    error::LedgerError,
    ledger::{CORE_ASSET, COUNCIL_ACCOUNT, Ledger},
    scheduler,
};

const DAY_SECONDS: i64 = 60 * 60 * 24;

/// Transient per-maintenance tally state. Owned by the maintenance frame, so
/// the buffers vacate on every exit path, including aborts.
struct VoteTally {
    votes: Vec<u64>,
    witness_histogram: Vec<u64>,
    committee_histogram: Vec<u64>,
    total_stake: u64,
}

impl VoteTally {
    fn sized(vote_slots: u32, max_witnesses: u16, max_committee: u16) -> Self {
        Self {
            votes: vec![0; vote_slots as usize],
            witness_histogram: vec![0; max_witnesses as usize / 2 + 1],
            committee_histogram: vec![0; max_committee as usize / 2 + 1],
            total_stake: 0,
        }
    }

    fn stake_for(&self, vote_id: basalt_primitives::VoteId) -> u64 {
        self.votes.get(vote_id.offset()).copied().unwrap_or(0)
    }
}

impl Ledger {
    pub(crate) fn perform_maintenance(&mut self, block: &Block) -> Result<(), LedgerError> {
        let now = block.timestamp;
        let parameters = self.store.global_properties().parameters.clone();
        let vote_slots = self.store.global_properties().next_available_vote_id;
        info!(time = %now, "running chain maintenance");

        let mut tally = VoteTally::sized(
            vote_slots,
            parameters.maximum_witness_count,
            parameters.maximum_committee_count,
        );

        // Single traversal: tally votes and disburse pending fees together.
        for instance in self.store.instances_of(ObjectKind::Account) {
            let account = self.store.account(AccountId(instance))?.clone();
            self.tally_account(&account, &mut tally, now, &parameters)?;
            self.disburse_account_fees(&account, now, &parameters)?;
        }

        self.update_active_witnesses(&tally)?;
        self.update_active_delegates(&tally)?;

        self.process_force_settlements(now)?;

        if self.store.global_properties().pending_parameters.is_some() {
            self.store.modify_global_properties(|gpo| {
                if let Some(pending) = gpo.pending_parameters.take() {
                    gpo.parameters = pending;
                }
            });
        }

        // Possibly freshly activated parameters govern the next interval.
        let maintenance_interval =
            i64::from(self.store.global_properties().parameters.maintenance_interval);
        let dgp = self.store.dynamic_properties().clone();
        let mut next_maintenance_time = dgp.next_maintenance_time;
        if next_maintenance_time <= now {
            if dgp.head_block_num == 1 {
                // Genesis boundary: snap to the first interval boundary
                // after the first block.
                next_maintenance_time = Utc
                    .timestamp_opt(
                        (now.timestamp() / maintenance_interval + 1) * maintenance_interval,
                        0,
                    )
                    .single()
                    .expect("interval-aligned timestamp is valid");
            } else {
                while next_maintenance_time <= now {
                    next_maintenance_time += chrono::Duration::seconds(maintenance_interval);
                }
            }
        }
        if next_maintenance_time <= now {
            return Err(LedgerError::Invariant(
                "next maintenance time did not advance".into(),
            ));
        }
        self.store.modify_dynamic_properties(|dgp| {
            dgp.next_maintenance_time = next_maintenance_time;
        });

        // Each interval gets a fresh settlement volume allowance.
        for instance in self.store.instances_of(ObjectKind::Asset) {
            let asset_id = basalt_primitives::AssetId(instance);
            if self.store.asset(asset_id)?.is_pegged() {
                self.store.modify_asset(asset_id, |asset| {
                    if let Some(pegged) = &mut asset.pegged {
                        pegged.force_settled_volume = 0;
                    }
                })?;
            }
        }

        // Budget runs last: it needs the advanced next_maintenance_time.
        self.process_budget(now, &tally)?;
        info!(next = %next_maintenance_time, "maintenance complete");
        Ok(())
    }

    fn tally_account(
        &mut self,
        account: &Account,
        tally: &mut VoteTally,
        now: DateTime<Utc>,
        parameters: &crate::config::ChainParameters,
    ) -> Result<(), LedgerError> {
        if !parameters.count_non_member_votes && !account.is_member(now) {
            return Ok(());
        }

        // The stake belongs to this account; the opinions may belong to its
        // delegated voting account.
        let opinion = match account.options.voting_account {
            Some(delegated) => match self.store.account(delegated) {
                Ok(delegated_account) => delegated_account.options.clone(),
                Err(_) => account.options.clone(),
            },
            None => account.options.clone(),
        };

        let stats = self.store.account_stats(account.statistics)?;
        let voting_stake = (stats.total_core_in_orders + stats.cashback_total()) as u64
            + self.balance(account.id, CORE_ASSET) as u64;

        for vote in &opinion.votes {
            // Illegal slots are simply ignored.
            if let Some(slot) = tally.votes.get_mut(vote.offset()) {
                *slot += voting_stake;
            }
        }

        if opinion.num_witness <= parameters.maximum_witness_count {
            let offset =
                (opinion.num_witness as usize / 2).min(tally.witness_histogram.len() - 1);
            // Preferences above the cap collapse onto the cap bucket.
            tally.witness_histogram[offset] += voting_stake;
        }
        if opinion.num_committee <= parameters.maximum_committee_count {
            let offset =
                (opinion.num_committee as usize / 2).min(tally.committee_histogram.len() - 1);
            tally.committee_histogram[offset] += voting_stake;
        }
        tally.total_stake += voting_stake;
        Ok(())
    }

    fn disburse_account_fees(
        &mut self,
        account: &Account,
        now: DateTime<Utc>,
        parameters: &crate::config::ChainParameters,
    ) -> Result<(), LedgerError> {
        let stats = self.store.account_stats(account.statistics)?.clone();
        if stats.pending_fees <= 0 {
            return Ok(());
        }

        let mut vesting_subtotal = stats.pending_fees;
        let mut vested_subtotal = stats.pending_vested_fees;
        let mut vesting_cashback = 0;
        let mut vested_cashback = 0;

        if stats.lifetime_fees_paid > parameters.bulk_discount_threshold_min
            && account.is_member(now)
        {
            vesting_cashback = bulk_discount_cut(&stats, parameters, vesting_subtotal);
            vesting_subtotal -= vesting_cashback;
            vested_cashback = bulk_discount_cut(&stats, parameters, vested_subtotal);
            vested_subtotal -= vested_cashback;
        }

        self.pay_out_fees(account, vesting_subtotal, true)?;
        self.deposit_cashback(account.id, vesting_cashback, true)?;
        self.pay_out_fees(account, vested_subtotal, false)?;
        self.deposit_cashback(account.id, vested_cashback, false)?;

        self.store.modify_account_stats(account.statistics, |stats| {
            stats.lifetime_fees_paid += vesting_subtotal + vested_subtotal;
            stats.pending_fees = 0;
            stats.pending_vested_fees = 0;
        })?;
        Ok(())
    }

    /// Split one fee subtotal between the network, the lifetime referrer,
    /// and the referrer/registrar pair.
    fn pay_out_fees(
        &mut self,
        account: &Account,
        total: i64,
        require_vesting: bool,
    ) -> Result<(), LedgerError> {
        if total <= 0 {
            return Ok(());
        }
        let burn_percent =
            self.store.global_properties().parameters.burn_percent_of_fee;

        let network_cut = cut_percent(total, account.network_fee_percentage);
        let burned = cut_percent(network_cut, burn_percent);
        let accumulated = network_cut - burned;
        let lifetime_cut = cut_percent(total, account.lifetime_referrer_fee_percentage);
        let referral = total - network_cut - lifetime_cut;
        let referrer_cut = cut_percent(referral, account.referrer_rewards_percentage);
        let registrar_cut = referral - referrer_cut;

        self.store.modify_asset(CORE_ASSET, |core| {
            core.accumulated_fees += accumulated;
            core.current_supply -= burned;
        })?;

        self.deposit_cashback(account.lifetime_referrer, lifetime_cut, require_vesting)?;
        self.deposit_cashback(account.referrer, referrer_cut, require_vesting)?;
        self.deposit_cashback(account.registrar, registrar_cut, require_vesting)?;

        debug_assert_eq!(
            referrer_cut + registrar_cut + accumulated + burned + lifetime_cut,
            total
        );
        Ok(())
    }

    /// Smallest histogram prefix holding a stake majority; the elected count
    /// is `2k + 1` clamped to the chain minimum.
    fn majority_count(histogram: &[u64], total_stake: u64, minimum: usize) -> usize {
        let stake_target = total_stake / 2;
        let mut cumulative = histogram[0];
        let mut k = 0;
        while k + 1 < histogram.len() && cumulative <= stake_target {
            k += 1;
            cumulative += histogram[k];
        }
        (2 * k + 1).max(minimum)
    }

    fn update_active_witnesses(&mut self, tally: &VoteTally) -> Result<(), LedgerError> {
        let desired = Self::majority_count(
            &tally.witness_histogram,
            tally.total_stake,
            MIN_WITNESS_COUNT,
        );

        let candidates: Vec<(WitnessId, u64)> = self
            .store
            .iter_kind(ObjectKind::Witness)
            .filter_map(|entity| match entity {
                Entity::Witness(witness) => Some((witness.id, tally.stake_for(witness.vote_id))),
                _ => None,
            })
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
            .take(desired)
            .collect();

        let active: Vec<WitnessId> = candidates.iter().map(|(id, _)| *id).collect();
        let mut witness_accounts = std::collections::BTreeSet::new();
        for (id, _) in &candidates {
            witness_accounts.insert(self.store.witness(*id)?.witness_account);
        }
        self.store.modify_global_properties(|gpo| {
            gpo.active_witnesses = active.clone();
            gpo.witness_accounts = witness_accounts;
        });

        // Re-seed the production rotation from the fresh head block.
        let entropy = self.store.dynamic_properties().head_block_id.low_u64();
        self.store.modify_witness_schedule(|schedule| {
            schedule.sequence = scheduler::shuffled_sequence(&active, entropy);
        });
        debug!(count = active.len(), "elected active witnesses");
        Ok(())
    }

    fn update_active_delegates(&mut self, tally: &VoteTally) -> Result<(), LedgerError> {
        let desired = Self::majority_count(
            &tally.committee_histogram,
            tally.total_stake,
            MIN_DELEGATE_COUNT,
        );

        let candidates: Vec<(DelegateId, u64)> = self
            .store
            .iter_kind(ObjectKind::Delegate)
            .filter_map(|entity| match entity {
                Entity::Delegate(delegate) => {
                    Some((delegate.id, tally.stake_for(delegate.vote_id)))
                }
                _ => None,
            })
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
            .take(desired)
            .collect();

        if !candidates.is_empty() {
            // The elected committee becomes the council account's authority,
            // weighted by vote share scaled into sixteen bits.
            let mut weights: BTreeMap<AccountId, u64> = BTreeMap::new();
            let mut total_votes: u64 = 0;
            for (id, votes) in &candidates {
                let delegate_account = self.store.delegate(*id)?.delegate_account;
                *weights.entry(delegate_account).or_insert(0) += votes;
                total_votes += votes;
            }
            let msb = if total_votes == 0 { 0 } else { 63 - total_votes.leading_zeros() as i32 };
            let bits_to_drop = (msb - 15).max(0) as u32;

            self.store.modify_account(COUNCIL_ACCOUNT, |council| {
                council.owner.weight_threshold = 0;
                council.owner.account_auths.clear();
                council.owner.key_auths.clear();
                for (account, votes) in &weights {
                    // Everyone elected keeps at least one vote of weight.
                    let weight = ((votes >> bits_to_drop).max(1)) as u16;
                    *council.owner.account_auths.entry(*account).or_insert(0) += weight;
                    council.owner.weight_threshold += u32::from(weight);
                }
                council.owner.weight_threshold /= 2;
                council.owner.weight_threshold += 1;
                council.active = council.owner.clone();
            })?;
        }

        let active: Vec<DelegateId> = candidates.iter().map(|(id, _)| *id).collect();
        self.store.modify_global_properties(|gpo| {
            gpo.active_delegates = active.clone();
        });
        debug!(count = active.len(), "elected active delegates");
        Ok(())
    }

    fn pay_workers(
        &mut self,
        budget: &mut i64,
        now: DateTime<Utc>,
        elapsed_seconds: i64,
        tally: &VoteTally,
    ) -> Result<(), LedgerError> {
        info!(budget = *budget, "processing worker payroll");
        let active: Vec<(WorkerId, u64)> = self
            .store
            .iter_kind(ObjectKind::Worker)
            .filter_map(|entity| match entity {
                Entity::Worker(worker) if worker.is_active(now) => {
                    let approving = tally.stake_for(worker.vote_id);
                    (approving > 0).then_some((worker.id, approving))
                }
                _ => None,
            })
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
            .collect();

        for (worker_id, _) in active {
            if *budget <= 0 {
                break;
            }
            let worker = self.store.worker(worker_id)?.clone();
            let requested = (i128::from(worker.daily_pay) * i128::from(elapsed_seconds)
                / i128::from(DAY_SECONDS)) as i64;
            let actual = requested.min(*budget);
            if actual <= 0 {
                continue;
            }
            info!(worker = %worker_id, pay = actual, "paying worker");

            match worker.kind {
                WorkerKind::Refund => {
                    self.store.modify_asset(CORE_ASSET, |core| {
                        core.current_supply -= actual;
                    })?;
                }
                WorkerKind::Balance => {
                    self.adjust_balance(
                        worker.worker_account,
                        AssetAmount::new(actual, CORE_ASSET),
                    )?;
                }
                WorkerKind::Vesting => {
                    self.deposit_cashback(worker.worker_account, actual, true)?;
                }
            }
            self.store.modify_worker(worker_id, |worker| worker.total_paid += actual)?;
            *budget -= actual;
        }
        Ok(())
    }

    /// Reserve released for this interval: a fixed fraction of the burned
    /// core per elapsed second, rounded up so the reserve never becomes
    /// untouchable.
    fn max_budget(&self, now: DateTime<Utc>) -> Result<i64, LedgerError> {
        let dgp = self.store.dynamic_properties();
        let Some(last_budget_time) = dgp.last_budget_time else {
            return Ok(0);
        };
        if now <= last_budget_time {
            return Ok(0);
        }
        let dt = (now - last_budget_time).num_seconds() as u128;

        let core = self.store.asset(CORE_ASSET)?;
        // Accumulated fees count as burned at the start of the interval even
        // though the supply commit only lands at the end.
        let reserve = core.burned() + core.accumulated_fees;

        let mut budget = u128::try_from(reserve).unwrap_or(0);
        budget *= dt;
        budget *= u128::from(CORE_ASSET_CYCLE_RATE);
        budget += (1u128 << CORE_ASSET_CYCLE_RATE_BITS) - 1;
        budget >>= CORE_ASSET_CYCLE_RATE_BITS;

        Ok((budget.min(reserve as u128)) as i64)
    }

    fn process_budget(&mut self, now: DateTime<Utc>, tally: &VoteTally) -> Result<(), LedgerError> {
        let parameters = self.store.global_properties().parameters.clone();
        let dgp = self.store.dynamic_properties().clone();

        let time_to_maint = (dgp.next_maintenance_time - now).num_seconds();
        if time_to_maint <= 0 {
            return Err(LedgerError::Invariant(
                "budget requires a future maintenance time".into(),
            ));
        }
        let interval = i64::from(parameters.block_interval);
        let blocks_to_maint = (time_to_maint + interval - 1) / interval;

        let mut available = self.max_budget(now)?;

        let requested_witness_budget = (i128::from(parameters.witness_pay_per_block)
            * i128::from(blocks_to_maint))
        .min(i128::from(MAX_SHARE_SUPPLY)) as i64;
        let witness_budget = requested_witness_budget.min(available);
        available -= witness_budget;

        let requested_worker_budget = (i128::from(parameters.worker_budget_per_day)
            * i128::from(time_to_maint)
            / i128::from(DAY_SECONDS))
        .min(i128::from(MAX_SHARE_SUPPLY)) as i64;
        let worker_budget = requested_worker_budget.min(available);

        let elapsed_seconds = dgp
            .last_budget_time
            .map(|last| (now - last).num_seconds())
            .unwrap_or(0);

        let mut leftover_worker_funds = worker_budget;
        self.pay_workers(&mut leftover_worker_funds, now, elapsed_seconds, tally)?;
        let worker_paid = worker_budget - leftover_worker_funds;

        // The previous interval's unspent witness budget evaporates back
        // into the reserve alongside unspent worker funds.
        let stale_witness_budget = dgp.witness_budget;
        self.store.modify_asset(CORE_ASSET, |core| {
            core.current_supply +=
                witness_budget + worker_paid - core.accumulated_fees - stale_witness_budget;
            core.accumulated_fees = 0;
        })?;
        self.store.modify_dynamic_properties(|dgp| {
            dgp.witness_budget = witness_budget;
            dgp.last_budget_time = Some(now);
        });
        debug!(witness_budget, worker_paid, "budget committed");
        Ok(())
    }
}
