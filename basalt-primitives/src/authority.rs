use crate::{error::AuthorityError, id::AccountId};
use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Maximum nesting depth when satisfying an authority through account
/// memberships.
pub const MAX_AUTHORITY_DEPTH: u8 = 2;

/// Opaque identifier of a signing key. Key cryptography lives outside the
/// core; the ledger only ever compares these for equality.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Constructor,
    Display,
    From,
)]
pub struct SignerKey(pub SmolStr);

impl SignerKey {
    pub fn from_name(name: &str) -> Self {
        SignerKey(SmolStr::new(name))
    }
}

/// A weighted-threshold set of keys and accounts. Satisfied when the summed
/// weight of present signers reaches `weight_threshold`; account members are
/// resolved recursively up to [`MAX_AUTHORITY_DEPTH`].
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: BTreeMap<AccountId, u16>,
    pub key_auths: BTreeMap<SignerKey, u16>,
}

impl Authority {
    /// An authority satisfied by a single key.
    pub fn single_key(key: SignerKey) -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::new(),
            key_auths: BTreeMap::from([(key, 1)]),
        }
    }

    pub fn num_members(&self) -> usize {
        self.account_auths.len() + self.key_auths.len()
    }

    /// Structural validation: non-zero threshold, non-zero member weights,
    /// bounded membership, and reachability of the threshold.
    pub fn validate(&self, max_members: usize) -> Result<(), AuthorityError> {
        if self.weight_threshold == 0 {
            return Err(AuthorityError::ZeroThreshold);
        }
        if self.num_members() > max_members {
            return Err(AuthorityError::TooManyMembers { got: self.num_members(), max: max_members });
        }
        let mut total: u64 = 0;
        for weight in self.account_auths.values().chain(self.key_auths.values()) {
            if *weight == 0 {
                return Err(AuthorityError::ZeroWeight);
            }
            total += u64::from(*weight);
        }
        if total < u64::from(self.weight_threshold) {
            return Err(AuthorityError::Unsatisfiable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_key_validates() {
        let auth = Authority::single_key(SignerKey::from_name("alice-key"));
        assert!(auth.validate(10).is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        struct TestCase {
            authority: Authority,
            max_members: usize,
            expected: Result<(), AuthorityError>,
        }

        let key = SignerKey::from_name("k");

        let tests = vec![
            TestCase {
                authority: Authority {
                    weight_threshold: 0,
                    account_auths: BTreeMap::new(),
                    key_auths: BTreeMap::from([(key.clone(), 1)]),
                },
                max_members: 10,
                expected: Err(AuthorityError::ZeroThreshold),
            },
            TestCase {
                authority: Authority {
                    weight_threshold: 1,
                    account_auths: BTreeMap::new(),
                    key_auths: BTreeMap::from([(key.clone(), 0)]),
                },
                max_members: 10,
                expected: Err(AuthorityError::ZeroWeight),
            },
            TestCase {
                authority: Authority {
                    weight_threshold: 1,
                    account_auths: BTreeMap::from([(AccountId(1), 1), (AccountId(2), 1)]),
                    key_auths: BTreeMap::new(),
                },
                max_members: 1,
                expected: Err(AuthorityError::TooManyMembers { got: 2, max: 1 }),
            },
            TestCase {
                authority: Authority {
                    weight_threshold: 5,
                    account_auths: BTreeMap::new(),
                    key_auths: BTreeMap::from([(key, 2)]),
                },
                max_members: 10,
                expected: Err(AuthorityError::Unsatisfiable),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.authority.validate(test.max_members), test.expected, "TC{} failed", index);
        }
    }
}
