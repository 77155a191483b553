//! Deterministic witness scheduling.
//!
//! The rotation is a Fisher–Yates shuffle of the active set driven by a
//! xorshift128+ stream. The two state words are seeded from the fractional
//! bits of sqrt(2) and sqrt(3), each XORed with the low bits of the head
//! block id, so every node derives the identical permutation and the
//! permutation changes whenever the active set is re-elected.

use basalt_primitives::WitnessId;
use chrono::{DateTime, Utc};

use crate::config::{FAR_SCHEDULE_IV, NEAR_SCHEDULE_IV, RECENT_SLOT_WINDOW};

/// Consensus-fixed PRNG; intentionally written out rather than imported so
/// the byte stream can never drift with a dependency upgrade.
struct ShuffleRng {
    state: [u64; 2],
}

impl ShuffleRng {
    fn seeded(entropy: u64) -> Self {
        let mut state = [NEAR_SCHEDULE_IV ^ entropy, FAR_SCHEDULE_IV ^ entropy];
        if state == [0, 0] {
            state = [NEAR_SCHEDULE_IV, FAR_SCHEDULE_IV];
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut s1 = self.state[0];
        let s0 = self.state[1];
        self.state[0] = s0;
        s1 ^= s1 << 23;
        self.state[1] = s1 ^ s0 ^ (s1 >> 17) ^ (s0 >> 26);
        self.state[1].wrapping_add(s0)
    }
}

/// Uniformly shuffled copy of `active`, seeded from the head block id.
pub fn shuffled_sequence(active: &[WitnessId], head_block_entropy: u64) -> Vec<WitnessId> {
    let mut sequence: Vec<WitnessId> = active.to_vec();
    let mut rng = ShuffleRng::seeded(head_block_entropy);
    for i in (1..sequence.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        sequence.swap(i, j);
    }
    sequence
}

/// Absolute slot of `time`: whole block intervals elapsed since genesis.
pub fn slot_of(time: DateTime<Utc>, genesis: DateTime<Utc>, block_interval: u32) -> u64 {
    let elapsed = (time - genesis).num_seconds();
    debug_assert!(elapsed >= 0);
    (elapsed as u64) / u64::from(block_interval)
}

/// The producer a slot maps to.
pub fn witness_for_slot(sequence: &[WitnessId], slot: u64) -> Option<WitnessId> {
    if sequence.is_empty() {
        return None;
    }
    Some(sequence[(slot % sequence.len() as u64) as usize])
}

/// Fold a produced block into the participation bitfield: the produced
/// slot's bit and a zero bit per missed slot, newest slots lowest.
pub fn record_slots(recent_slots_filled: u128, missed: u64) -> u128 {
    if missed >= u64::from(RECENT_SLOT_WINDOW) {
        return 0;
    }
    ((recent_slots_filled << 1) | 1) << missed
}

/// Filled fraction of the recent-slot window, in basis points.
pub fn participation_rate(recent_slots_filled: u128) -> u32 {
    recent_slots_filled.count_ones() * 10_000 / RECENT_SLOT_WINDOW
}
