use basalt_primitives::{SignerKey, WitnessId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::operation::Operation;

/// SHA-256 of a block's canonical encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub const ZERO: BlockId = BlockId([0; 32]);

    /// Low 64 bits, used to perturb the witness-shuffle seed.
    pub fn low_u64(&self) -> u64 {
        u64::from_le_bytes(self.0[..8].try_into().expect("block id is 32 bytes"))
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// SHA-256 of a transaction's canonical encoding, excluding its signer set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct TransactionId(pub [u8; 32]);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An authenticated batch of operations. `signed_keys` is the set of signer
/// keys the upstream layer verified; the core evaluates authorities over it.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub expiration: DateTime<Utc>,
    pub operations: Vec<Operation>,
    pub signed_keys: std::collections::BTreeSet<SignerKey>,
}

impl Transaction {
    /// Digest identifying this transaction for duplicate rejection. Signer
    /// keys are excluded so a re-signed transaction stays the same
    /// transaction.
    pub fn id(&self) -> TransactionId {
        #[derive(Serialize)]
        struct Payload<'a> {
            expiration: &'a DateTime<Utc>,
            operations: &'a [Operation],
        }
        let bytes = serde_json::to_vec(&Payload {
            expiration: &self.expiration,
            operations: &self.operations,
        })
        .expect("transaction payload serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        TransactionId(hasher.finalize().into())
    }

    /// Canonical encoded size, checked against `max_transaction_size`.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

/// A produced block as handed to the core: already gossip-validated, still
/// subject to every scheduling and authority rule.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Block {
    pub previous: BlockId,
    pub timestamp: DateTime<Utc>,
    pub witness: WitnessId,
    /// Key the producer signed with; must match the witness entry.
    pub producer_key: SignerKey,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn id(&self) -> BlockId {
        let bytes = serde_json::to_vec(self).expect("block serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        BlockId(hasher.finalize().into())
    }

    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_transaction_id_ignores_signers() {
        let expiration = Utc.timestamp_opt(1_000, 0).unwrap();
        let unsigned = Transaction {
            expiration,
            operations: vec![],
            signed_keys: Default::default(),
        };
        let signed = Transaction {
            expiration,
            operations: vec![],
            signed_keys: std::collections::BTreeSet::from([SignerKey::from_name("k")]),
        };
        assert_eq!(unsigned.id(), signed.id());
    }

    #[test]
    fn test_block_id_changes_with_content() {
        let base = Block {
            previous: BlockId::ZERO,
            timestamp: Utc.timestamp_opt(1_000, 0).unwrap(),
            witness: WitnessId(0),
            producer_key: SignerKey::from_name("w"),
            transactions: vec![],
        };
        let mut other = base.clone();
        other.timestamp = Utc.timestamp_opt(2_000, 0).unwrap();
        assert_ne!(base.id(), other.id());
    }
}
