mod util;

use basalt_chain::{
    CORE_ASSET, COUNCIL_ACCOUNT, FeeSchedule,
    entity::{AccountOptions, Entity, WorkerKind},
    operation::{Operation, ParametersUpdate, Transfer},
};
use basalt_primitives::{AccountId, ObjectKind, VoteId};
use std::collections::BTreeSet;
use util::{TestChain, core, zero_fee};

fn delegate_vote_id(chain: &TestChain, account: AccountId) -> (basalt_primitives::DelegateId, VoteId) {
    chain
        .ledger
        .store
        .iter_kind(ObjectKind::Delegate)
        .find_map(|entity| match entity {
            Entity::Delegate(delegate) if delegate.delegate_account == account => {
                Some((delegate.id, delegate.vote_id))
            }
            _ => None,
        })
        .expect("delegate exists")
}

fn worker_vote_id(chain: &TestChain, account: AccountId) -> (basalt_primitives::WorkerId, VoteId) {
    chain
        .ledger
        .store
        .iter_kind(ObjectKind::Worker)
        .find_map(|entity| match entity {
            Entity::Worker(worker) if worker.worker_account == account => {
                Some((worker.id, worker.vote_id))
            }
            _ => None,
        })
        .expect("worker exists")
}

fn votes_for(vote_id: VoteId) -> AccountOptions {
    AccountOptions {
        voting_account: None,
        num_witness: 0,
        num_committee: 1,
        votes: BTreeSet::from([vote_id]),
    }
}

/// A lifetime member with dominant stake votes a fresh delegate into the
/// committee; the council authority re-forms around the vote weights.
#[test]
fn test_vote_shift_elects_new_delegate() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 50_000_000);
    });
    chain.generate_block();

    chain.create_account("init0", "nathan");
    chain.transfer("init0", "nathan", core(10_000_000));
    chain.upgrade_account("nathan");
    chain.create_delegate("nathan");

    let nathan = chain.account("nathan");
    let (delegate_id, vote_id) = delegate_vote_id(&chain, nathan);
    chain.update_votes("nathan", votes_for(vote_id));

    let active_before =
        chain.ledger.store.global_properties().active_delegates.clone();
    assert!(!active_before.contains(&delegate_id));

    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);

    let gpo = chain.ledger.store.global_properties();
    assert!(gpo.active_delegates.contains(&delegate_id));
    assert_ne!(gpo.active_delegates, active_before);

    let council = chain.ledger.store.account(COUNCIL_ACCOUNT).unwrap();
    let nathan_weight = council.owner.account_auths.get(&nathan).copied().unwrap_or(0);
    assert!(nathan_weight >= 1, "elected delegate holds council weight");
    assert_eq!(council.active, council.owner);
    // 10M votes scaled into sixteen bits dominate the nine single-weight
    // zero-vote seats.
    assert!(u32::from(nathan_weight) >= council.owner.weight_threshold);
    chain.ledger.check_supply(CORE_ASSET).unwrap();
}

/// Workers are paid by approving stake, highest first, scaled by elapsed
/// time and bounded by the interval's worker budget.
#[test]
fn test_worker_payroll_by_approving_stake() {
    let mut chain = TestChain::with_config(
        |parameters| {
            // 300s of this per-day budget is exactly 73_750.
            parameters.worker_budget_per_day = 21_240_000;
        },
        |balances| {
            balances.insert("init0".into(), 1_000_000);
            balances.insert("init1".into(), 10_000);
            balances.insert("init2".into(), 20_000);
        },
    );
    chain.generate_block();

    chain.create_worker("init3", 8_640_000, 1_000_000, WorkerKind::Balance);
    chain.create_worker("init4", 17_280_000, 1_000_000, WorkerKind::Balance);
    let (worker1, vote1) = worker_vote_id(&chain, chain.account("init3"));
    let (worker2, vote2) = worker_vote_id(&chain, chain.account("init4"));

    chain.update_votes("init1", votes_for(vote1));
    chain.update_votes("init2", votes_for(vote2));

    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);

    // Elapsed since the first budget: 295s. Requested pay scales to
    // 29_500 and 59_000; the 73_750 budget pays the higher-staked worker in
    // full and the rest to the other.
    assert_eq!(chain.ledger.store.worker(worker2).unwrap().total_paid, 59_000);
    assert_eq!(chain.ledger.store.worker(worker1).unwrap().total_paid, 14_750);
    assert_eq!(chain.balance("init4", CORE_ASSET), 59_000);
    assert_eq!(chain.balance("init3", CORE_ASSET), 14_750);
    chain.ledger.check_supply(CORE_ASSET).unwrap();
}

/// Budget the workers cannot absorb evaporates back into the reserve.
#[test]
fn test_unspent_worker_budget_returns_to_reserve() {
    let mut chain = TestChain::with_config(
        |parameters| {
            // 300s of this per-day budget is 90_000; the workers only draw
            // 88_500.
            parameters.worker_budget_per_day = 25_920_000;
        },
        |balances| {
            balances.insert("init0".into(), 1_000_000);
            balances.insert("init1".into(), 10_000);
            balances.insert("init2".into(), 20_000);
        },
    );
    chain.generate_block();

    chain.create_worker("init3", 8_640_000, 1_000_000, WorkerKind::Balance);
    chain.create_worker("init4", 17_280_000, 1_000_000, WorkerKind::Balance);
    let (_, vote1) = worker_vote_id(&chain, chain.account("init3"));
    let (_, vote2) = worker_vote_id(&chain, chain.account("init4"));
    chain.update_votes("init1", votes_for(vote1));
    chain.update_votes("init2", votes_for(vote2));

    let supply_before = chain.ledger.store.asset(CORE_ASSET).unwrap().current_supply;
    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);

    // Only what was actually paid out entered circulation.
    assert_eq!(
        chain.ledger.store.asset(CORE_ASSET).unwrap().current_supply,
        supply_before + 29_500 + 59_000
    );
    chain.ledger.check_supply(CORE_ASSET).unwrap();
}

/// The first maintenance has no prior budget interval, so nothing is minted;
/// later intervals fund per-block witness pay.
#[test]
fn test_witness_budget_lifecycle() {
    let mut chain = TestChain::with_config(
        |parameters| {
            parameters.witness_pay_per_block = 1_000_000;
        },
        |_| {},
    );

    chain.generate_block();
    assert_eq!(chain.ledger.store.dynamic_properties().witness_budget, 0);

    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);
    let budget = chain.ledger.store.dynamic_properties().witness_budget;
    assert!(budget > 0, "second maintenance mints a witness budget");

    chain.generate_block();
    let dgp = chain.ledger.store.dynamic_properties();
    let paid = budget - dgp.witness_budget;
    assert_eq!(paid, 1_000_000.min(budget));
    let producer = chain.ledger.store.witness(dgp.current_witness).unwrap().witness_account;
    assert_eq!(chain.ledger.balance(producer, CORE_ASSET), paid);
    chain.ledger.check_supply(CORE_ASSET).unwrap();
}

/// Pending fees split between burn, network accumulation, lifetime referrer
/// and registrar at the boundary, and lifetime totals advance.
#[test]
fn test_fee_disbursement_split() {
    let mut chain = TestChain::with_config(
        |parameters| {
            parameters.fee_schedule =
                FeeSchedule { transfer: 1_000_000, ..FeeSchedule::zeroed() };
            parameters.cashback_vesting_threshold = 0;
        },
        |balances| {
            balances.insert("init0".into(), 50_000_000);
        },
    );
    chain.generate_block();
    chain.create_account("init0", "alice");

    // Fund alice, then have her pay a fee of her own.
    let fund = Operation::Transfer(Transfer {
        fee: core(1_000_000),
        from: chain.account("init0"),
        to: chain.account("alice"),
        amount: core(5_000_000),
    });
    chain.push_ops("init0", vec![fund]).unwrap();
    let spend = Operation::Transfer(Transfer {
        fee: core(1_000_000),
        from: chain.account("alice"),
        to: chain.account("init0"),
        amount: core(1_000_000),
    });
    chain.push_ops("alice", vec![spend]).unwrap();

    let alice_stats_id = chain.ledger.store.account(chain.account("alice")).unwrap().statistics;
    assert_eq!(chain.ledger.store.account_stats(alice_stats_id).unwrap().pending_fees, 1_000_000);
    let supply_before = chain.ledger.store.asset(CORE_ASSET).unwrap().current_supply;

    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);

    let alice_stats = chain.ledger.store.account_stats(alice_stats_id).unwrap();
    assert_eq!(alice_stats.pending_fees, 0);
    assert_eq!(alice_stats.lifetime_fees_paid, 1_000_000);

    // init0 registered and referred alice: 30% lifetime + 50% registrar
    // share of her fee landed in its cashback.
    let init0_stats_id = chain.ledger.store.account(chain.account("init0")).unwrap().statistics;
    let init0_stats = chain.ledger.store.account_stats(init0_stats_id).unwrap();
    assert_eq!(init0_stats.cashback_vesting, 800_000);
    assert_eq!(init0_stats.lifetime_fees_paid, 1_000_000);

    // Per fee the whole 20% network cut leaves circulation: 4% burned
    // outright, 16% accumulated and then recycled into the reserve by the
    // budget. Two fees were pending.
    assert_eq!(
        chain.ledger.store.asset(CORE_ASSET).unwrap().current_supply,
        supply_before - 2 * 200_000
    );
    chain.ledger.check_supply(CORE_ASSET).unwrap();
}

/// Council-approved parameters wait in `pending_parameters` and activate
/// atomically at the boundary.
#[test]
fn test_parameters_update_activates_at_maintenance() {
    let mut chain = TestChain::new();
    chain.generate_block();

    let mut new_parameters = chain.ledger.store.global_properties().parameters.clone();
    new_parameters.maintenance_interval = 600;
    new_parameters.max_transaction_size = 32_768;

    let op = Operation::ParametersUpdate(ParametersUpdate {
        fee: zero_fee(),
        new_parameters: new_parameters.clone(),
    });
    // The council authority is the elected committee: a majority of the
    // init accounts' keys satisfies it through one level of recursion.
    chain
        .push_ops_signed(&["init0", "init1", "init2", "init3", "init4", "init5"], vec![op])
        .unwrap();

    let gpo = chain.ledger.store.global_properties();
    assert_eq!(gpo.pending_parameters.as_ref(), Some(&new_parameters));
    assert_eq!(gpo.parameters.maintenance_interval, 300);

    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;
    chain.generate_blocks_until(boundary);

    let gpo = chain.ledger.store.global_properties();
    assert!(gpo.pending_parameters.is_none());
    assert_eq!(gpo.parameters.maintenance_interval, 600);
    assert_eq!(gpo.parameters.max_transaction_size, 32_768);

    // The freshly activated interval governs the next boundary.
    let dgp = chain.ledger.store.dynamic_properties();
    assert_eq!((dgp.next_maintenance_time - dgp.head_block_time).num_seconds() % 600, 0);
}
