use basalt_primitives::{AccountId, AssetAmount, AssetId, BalanceId};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// One `(owner, asset)` holding. Never negative; removed when it reaches
/// zero so the balance tables stay dense.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Balance {
    pub id: BalanceId,
    pub owner: AccountId,
    pub asset: AssetId,
    pub amount: i64,
}

impl Balance {
    pub fn as_amount(&self) -> AssetAmount {
        AssetAmount::new(self.amount, self.asset)
    }
}
