use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Entity families stored in the ledger. The discriminant order is part of the
/// canonical state encoding and must not be rearranged.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum ObjectKind {
    Asset,
    Account,
    AccountStats,
    Balance,
    LimitOrder,
    ShortOrder,
    CallOrder,
    ForceSettlement,
    Witness,
    Delegate,
    Worker,
    Transaction,
    GlobalProperties,
    DynamicProperties,
    WitnessSchedule,
}

impl ObjectKind {
    /// All kinds in canonical order, used for digest and snapshot traversal.
    pub const ALL: [ObjectKind; 15] = [
        ObjectKind::Asset,
        ObjectKind::Account,
        ObjectKind::AccountStats,
        ObjectKind::Balance,
        ObjectKind::LimitOrder,
        ObjectKind::ShortOrder,
        ObjectKind::CallOrder,
        ObjectKind::ForceSettlement,
        ObjectKind::Witness,
        ObjectKind::Delegate,
        ObjectKind::Worker,
        ObjectKind::Transaction,
        ObjectKind::GlobalProperties,
        ObjectKind::DynamicProperties,
        ObjectKind::WitnessSchedule,
    ];
}

/// Instances are dense 48-bit counters unique within their kind.
pub const MAX_INSTANCE: u64 = (1 << 48) - 1;

/// Stable compact identity of an entity: `(kind, instance)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub instance: u64,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, instance: u64) -> Self {
        Self { kind, instance }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.instance)
    }
}

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
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
        )]
        pub struct $name(pub u64);

        impl $name {
            pub const KIND: ObjectKind = ObjectKind::$kind;

            pub fn object_id(&self) -> ObjectId {
                ObjectId::new(Self::KIND, self.0)
            }
        }

        impl From<$name> for ObjectId {
            fn from(value: $name) -> ObjectId {
                value.object_id()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.object_id())
            }
        }
    };
}

typed_id!(AssetId => Asset);
typed_id!(AccountId => Account);
typed_id!(StatsId => AccountStats);
typed_id!(BalanceId => Balance);
typed_id!(LimitOrderId => LimitOrder);
typed_id!(ShortOrderId => ShortOrder);
typed_id!(CallOrderId => CallOrder);
typed_id!(SettlementId => ForceSettlement);
typed_id!(WitnessId => Witness);
typed_id!(DelegateId => Delegate);
typed_id!(WorkerId => Worker);
typed_id!(TxRecordId => Transaction);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display() {
        assert_eq!(AccountId(7).to_string(), "Account.7");
        assert_eq!(ObjectId::new(ObjectKind::LimitOrder, 3).to_string(), "LimitOrder.3");
    }

    #[test]
    fn test_typed_id_round_trip() {
        let id = AssetId(42);
        let object_id: ObjectId = id.into();
        assert_eq!(object_id.kind, ObjectKind::Asset);
        assert_eq!(object_id.instance, 42);
    }

    #[test]
    fn test_object_id_serde_round_trip() {
        let id = ObjectId::new(ObjectKind::Balance, 9);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<ObjectId>(&json).unwrap(), id);
    }
}
