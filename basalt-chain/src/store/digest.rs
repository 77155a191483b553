use basalt_primitives::ObjectKind;
use sha2::{Digest, Sha256};

use crate::store::Store;

/// Deterministic digest of the full store state: every entity in
/// `(kind, instance)` order plus the instance counters, hashed over the
/// canonical JSON encoding. Two stores with equal digests are replay
/// equivalent.
pub fn state_digest(store: &Store) -> String {
    let mut hasher = Sha256::new();
    for (kind_index, kind) in ObjectKind::ALL.iter().enumerate() {
        for entity in store.iter_kind(*kind) {
            hasher.update((kind_index as u64).to_le_bytes());
            hasher.update(entity.instance().to_le_bytes());
            hasher.update(serde_json::to_vec(entity).expect("entity serializes"));
        }
    }
    for (kind, next) in store.instance_counters() {
        hasher.update([*kind as u8]);
        hasher.update(next.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
