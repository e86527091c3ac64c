//! Property-based test generators using proptest.
//!
//! Provides strategies for values, keys and account operations that
//! respect the fixture schema.

use crate::fixtures::ACCOUNTS_TABLE;
use commitdb_codec::{ColumnValue, Row, ScalarType, Timestamp, Value};
use commitdb_core::Mutation;
use proptest::prelude::*;

/// Strategy for primary keys drawn from a small alphabet, so that
/// generated operations collide on keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]{1,2}").expect("Invalid regex")
}

/// Strategy for timestamps within a few centuries of the epoch.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..4_000_000_000_000_000_000)
        .prop_map(Timestamp::from_unix_nanos)
}

/// Strategy for non-null values of `ty`.
pub fn value_strategy(ty: ScalarType) -> BoxedStrategy<Value> {
    match ty {
        ScalarType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        ScalarType::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        ScalarType::String => ".{0,16}".prop_map(Value::String).boxed(),
        ScalarType::Bytes => prop::collection::vec(any::<u8>(), 0..32)
            .prop_map(Value::Bytes)
            .boxed(),
        ScalarType::Timestamp => timestamp_strategy().prop_map(Value::Timestamp).boxed(),
    }
}

/// Strategy for possibly-null values of `ty`.
pub fn nullable_value_strategy(ty: ScalarType) -> BoxedStrategy<Value> {
    prop_oneof![1 => Just(Value::Null), 4 => value_strategy(ty)].boxed()
}

/// An operation on the accounts table.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountOp {
    /// Insert or overwrite an account.
    Upsert {
        /// Account key.
        id: String,
        /// New balance.
        balance: i64,
    },
    /// Change the balance of an existing account.
    Update {
        /// Account key.
        id: String,
        /// New balance.
        balance: i64,
    },
    /// Remove an account.
    Delete {
        /// Account key.
        id: String,
    },
}

impl AccountOp {
    /// Returns the key the operation touches.
    pub fn id(&self) -> &str {
        match self {
            AccountOp::Upsert { id, .. } | AccountOp::Update { id, .. } | AccountOp::Delete { id } => {
                id
            }
        }
    }

    /// Converts the operation into a mutation that stamps `updated`.
    pub fn to_mutation(&self) -> Mutation {
        let stamped = |id: &str, balance: i64| {
            Row::<ColumnValue>::new()
                .with("id", Value::from(id))
                .with("balance", Value::Int64(balance))
                .with("updated", ColumnValue::PendingCommitTimestamp)
        };
        match self {
            AccountOp::Upsert { id, balance } => {
                Mutation::insert_or_update(ACCOUNTS_TABLE, stamped(id, *balance))
            }
            AccountOp::Update { id, balance } => {
                Mutation::update(ACCOUNTS_TABLE, stamped(id, *balance))
            }
            AccountOp::Delete { id } => Mutation::delete(ACCOUNTS_TABLE, id.as_str()),
        }
    }
}

/// Strategy for a single account operation.
pub fn account_op_strategy() -> impl Strategy<Value = AccountOp> {
    prop_oneof![
        3 => (key_strategy(), -1_000i64..1_000)
            .prop_map(|(id, balance)| AccountOp::Upsert { id, balance }),
        2 => (key_strategy(), -1_000i64..1_000)
            .prop_map(|(id, balance)| AccountOp::Update { id, balance }),
        1 => key_strategy().prop_map(|id| AccountOp::Delete { id }),
    ]
}

/// Strategy for a sequence of account operations.
pub fn account_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<AccountOp>> {
    prop::collection::vec(account_op_strategy(), 0..max_len)
}
