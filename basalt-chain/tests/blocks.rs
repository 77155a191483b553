mod util;

use basalt_chain::{
    Block, BlockId, LedgerError, SchedulingError, ValidationError,
    operation::{Operation, Transfer},
};
use basalt_primitives::WitnessId;
use chrono::Duration;
use util::{TestChain, core, zero_fee};

#[test]
fn test_empty_blocks_across_maintenance_boundaries() {
    let mut chain = TestChain::new();
    let initial_witnesses =
        chain.ledger.store.global_properties().active_witnesses.clone();
    let initial_delegates =
        chain.ledger.store.global_properties().active_delegates.clone();

    chain.generate_blocks(200);

    let gpo = chain.ledger.store.global_properties();
    let dgp = chain.ledger.store.dynamic_properties();
    assert_eq!(gpo.active_witnesses, initial_witnesses);
    assert_eq!(gpo.active_delegates, initial_delegates);

    // 200 blocks at 5s crossed boundaries at +5, +300, +600, +900.
    assert!(dgp.next_maintenance_time > dgp.head_block_time);
    assert_eq!(dgp.next_maintenance_time.timestamp() % 300, 0);
    assert_eq!(dgp.head_block_num, 200);

    assert_eq!(chain.ledger.store.witness_schedule().recent_slots_filled, u128::MAX);
    assert_eq!(chain.ledger.witness_participation_rate(), 10_000);
    chain.ledger.check_supply(basalt_chain::CORE_ASSET).unwrap();
}

#[test]
fn test_maintenance_advances_by_exactly_one_interval() {
    let mut chain = TestChain::new();
    chain.generate_block();
    let boundary = chain.ledger.store.dynamic_properties().next_maintenance_time;

    chain.generate_blocks_until(boundary);
    let dgp = chain.ledger.store.dynamic_properties();
    assert_eq!(dgp.head_block_time, boundary);
    assert_eq!(dgp.next_maintenance_time, boundary + Duration::seconds(300));
}

#[test]
fn test_deterministic_replay_digest_identity() {
    let genesis = |balances: &mut indexmap::IndexMap<smol_str::SmolStr, i64>| {
        balances.insert("init0".into(), 10_000_000);
    };
    let mut chain_a = TestChain::with_config(|_| {}, genesis);
    let mut chain_b = TestChain::with_config(|_| {}, genesis);
    assert_eq!(chain_a.ledger.head_digest(), chain_b.ledger.head_digest());

    let tx_block = chain_a.build_block(
        vec![chain_a.signed_tx(
            vec![Operation::Transfer(Transfer {
                fee: zero_fee(),
                from: chain_a.account("init0"),
                to: chain_a.account("init1"),
                amount: core(123_456),
            })],
            &["init0"],
        )],
        0,
    );
    chain_a.ledger.push_block(&tx_block).unwrap();
    chain_b.ledger.push_block(&tx_block).unwrap();

    // Identical inputs reconverge to bit-identical state, maintenance
    // boundaries included.
    let produced: Vec<Block> = chain_a.generate_blocks(80);
    for block in &produced {
        chain_b.ledger.push_block(block).unwrap();
    }
    assert_eq!(chain_a.ledger.head_digest(), chain_b.ledger.head_digest());
}

#[test]
fn test_undo_block_restores_digest() {
    let mut chain = TestChain::new();
    chain.generate_blocks(3);
    let before = chain.ledger.head_digest();

    chain.generate_block();
    assert_ne!(chain.ledger.head_digest(), before);

    chain.ledger.pop_block().unwrap();
    assert_eq!(chain.ledger.head_digest(), before);
}

#[test]
fn test_pop_blocks_in_sequence() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 10_000_000);
    });
    let digest_genesis = chain.ledger.head_digest();
    chain.generate_block();
    let digest_one = chain.ledger.head_digest();
    chain.transfer("init0", "init1", core(777));
    chain.generate_blocks(2);

    chain.ledger.pop_block().unwrap();
    chain.ledger.pop_block().unwrap();
    chain.ledger.pop_block().unwrap();
    assert_eq!(chain.ledger.head_digest(), digest_one);
    chain.ledger.pop_block().unwrap();
    assert_eq!(chain.ledger.head_digest(), digest_genesis);
}

#[test]
fn test_duplicate_transaction_rejected() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 10_000_000);
    });
    chain.generate_block();

    let transaction = chain.signed_tx(
        vec![Operation::Transfer(Transfer {
            fee: zero_fee(),
            from: chain.account("init0"),
            to: chain.account("init1"),
            amount: core(10),
        })],
        &["init0"],
    );

    let first = chain.build_block(vec![transaction.clone()], 0);
    chain.ledger.push_block(&first).unwrap();

    let second = chain.build_block(vec![transaction.clone()], 0);
    assert_eq!(
        chain.ledger.push_block(&second),
        Err(LedgerError::Validation(ValidationError::DuplicateTransaction))
    );
    // Pending admission agrees.
    assert_eq!(
        chain.ledger.push_transaction(&transaction),
        Err(LedgerError::Validation(ValidationError::DuplicateTransaction))
    );
}

#[test]
fn test_missed_slots_recorded() {
    let mut chain = TestChain::new();
    chain.generate_block();

    let skipped_time = chain.ledger.next_block_time(0);
    let skipped_witness = chain.ledger.scheduled_witness(skipped_time).unwrap();
    let missed_before =
        chain.ledger.store.witness(skipped_witness).unwrap().total_missed;

    chain.generate_block_skipping(1);

    let rsf = chain.ledger.store.witness_schedule().recent_slots_filled;
    assert_eq!(rsf & 1, 0);
    assert_eq!((rsf >> 1) & 1, 1);
    assert_eq!(chain.ledger.witness_participation_rate(), 10_000 * 127 / 128);
    assert_eq!(
        chain.ledger.store.witness(skipped_witness).unwrap().total_missed,
        missed_before + 1
    );
}

#[test]
fn test_block_header_validation() {
    let mut chain = TestChain::new();
    chain.generate_block();

    // Parent mismatch.
    let mut block = chain.build_block(vec![], 0);
    block.previous = BlockId::ZERO;
    assert_eq!(
        chain.ledger.push_block(&block),
        Err(LedgerError::Scheduling(SchedulingError::BadParent))
    );

    // Off-grid timestamp.
    let mut block = chain.build_block(vec![], 0);
    block.timestamp += Duration::seconds(2);
    assert!(matches!(
        chain.ledger.push_block(&block),
        Err(LedgerError::Scheduling(SchedulingError::TimestampOffGrid(_)))
    ));

    // Wrong witness for the slot.
    let mut block = chain.build_block(vec![], 0);
    let scheduled = block.witness;
    block.witness = chain
        .ledger
        .store
        .global_properties()
        .active_witnesses
        .iter()
        .copied()
        .find(|id| *id != scheduled)
        .expect("another witness exists");
    assert!(matches!(
        chain.ledger.push_block(&block),
        Err(LedgerError::Scheduling(SchedulingError::WrongWitness { .. }))
    ));

    // Producer key mismatch.
    let mut block = chain.build_block(vec![], 0);
    block.producer_key = chain.key("imposter");
    assert_eq!(
        chain.ledger.push_block(&block),
        Err(LedgerError::Scheduling(SchedulingError::BadProducerKey))
    );

    // A valid block still applies after all the rejects.
    let block = chain.build_block(vec![], 0);
    chain.ledger.push_block(&block).unwrap();
}

#[test]
fn test_rejected_block_leaves_state_untouched() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 1_000);
    });
    chain.generate_block();
    let before = chain.ledger.head_digest();

    // Overdraft inside the second transaction must unwind the whole block,
    // including the first transfer.
    let ok_tx = chain.signed_tx(
        vec![Operation::Transfer(Transfer {
            fee: zero_fee(),
            from: chain.account("init0"),
            to: chain.account("init1"),
            amount: core(100),
        })],
        &["init0"],
    );
    let overdraft_tx = chain.signed_tx(
        vec![Operation::Transfer(Transfer {
            fee: zero_fee(),
            from: chain.account("init0"),
            to: chain.account("init1"),
            amount: core(5_000_000),
        })],
        &["init0"],
    );
    let block = chain.build_block(vec![ok_tx, overdraft_tx], 0);
    assert!(chain.ledger.push_block(&block).is_err());
    assert_eq!(chain.ledger.head_digest(), before);
}

#[test]
fn test_unauthorized_transfer_rejected() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 10_000);
    });
    chain.generate_block();

    let transaction = chain.signed_tx(
        vec![Operation::Transfer(Transfer {
            fee: zero_fee(),
            from: chain.account("init0"),
            to: chain.account("init1"),
            amount: core(10),
        })],
        // Signed by the wrong key.
        &["init5"],
    );
    let block = chain.build_block(vec![transaction], 0);
    assert!(matches!(
        chain.ledger.push_block(&block),
        Err(LedgerError::Authorization { .. })
    ));
}

#[test]
fn test_limit_order_expires_and_refunds() {
    let mut chain = TestChain::with_config(|_| {}, |balances| {
        balances.insert("init0".into(), 1_000_000);
    });
    chain.generate_block();
    let usd = chain.create_user_asset("init0", "USD");

    let expiration = chain.head_time() + Duration::seconds(30);
    let op = Operation::LimitOrderCreate(basalt_chain::operation::LimitOrderCreate {
        fee: zero_fee(),
        seller: chain.account("init0"),
        amount_to_sell: core(500),
        min_to_receive: basalt_primitives::AssetAmount::new(500, usd),
        expiration,
    });
    chain.push_ops("init0", vec![op]).unwrap();

    assert_eq!(chain.balance("init0", basalt_chain::CORE_ASSET), 999_500);
    assert_eq!(chain.ledger.store.index.limit_by_price.len(), 1);

    chain.generate_blocks_until(expiration);
    assert_eq!(chain.ledger.store.index.limit_by_price.len(), 0);
    assert_eq!(chain.balance("init0", basalt_chain::CORE_ASSET), 1_000_000);
    chain.ledger.check_supply(basalt_chain::CORE_ASSET).unwrap();
}

#[test]
fn test_schedule_covers_every_slot_round_robin() {
    let mut chain = TestChain::new();
    chain.generate_block();

    let mut seen: Vec<WitnessId> = Vec::new();
    for _ in 0..10 {
        let time = chain.ledger.next_block_time(0);
        let witness = chain.ledger.scheduled_witness(time).unwrap();
        seen.push(witness);
        chain.generate_block();
        assert_eq!(chain.ledger.store.dynamic_properties().current_witness, witness);
    }
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10, "one full rotation visits every active witness");
}
