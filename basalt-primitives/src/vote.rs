use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// Dense 32-bit slot identifying an electable candidate (witness, delegate or
/// worker). Slots are assigned sequentially at candidate creation and index
/// directly into the transient vote-tally buffer during maintenance.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Constructor,
    Display,
)]
pub struct VoteId(pub u32);

impl VoteId {
    pub fn offset(&self) -> usize {
        self.0 as usize
    }
}
