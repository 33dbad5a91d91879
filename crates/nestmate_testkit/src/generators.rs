//! Property-based test generators using proptest.
//!
//! Strategies produce records that pass change-log validation unless noted.

use nestmate_sync_protocol::{
    ChangeRecord, EntityType, Operation, Payload, SyncConflict, Timestamp, Value,
};
use proptest::prelude::*;

/// Strategy for entity types.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::ALL.to_vec())
}

/// Strategy for operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Create),
        Just(Operation::Update),
        Just(Operation::Delete),
    ]
}

/// Strategy for entity IDs drawn from a small pool so records collide.
pub fn entity_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|n| format!("ent-{n}"))
}

/// Strategy for scalar payload values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-z ]{0,16}".prop_map(Value::Text),
        (0u64..4_000_000_000_000).prop_map(Value::timestamp),
    ]
}

/// Strategy for payload values, nesting maps up to two levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(2, 16, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map)
    })
}

/// Strategy for payloads.
pub fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop::collection::btree_map("[a-z_]{1,10}", value_strategy(), 0..6).prop_map(Payload::from)
}

/// Strategy for timestamps within a window.
pub fn timestamp_strategy(max_millis: u64) -> impl Strategy<Value = Timestamp> {
    (0..=max_millis).prop_map(Timestamp::from_millis)
}

/// Strategy for one record of the given user.
pub fn change_record_strategy(user_id: &'static str) -> impl Strategy<Value = ChangeRecord> {
    (
        entity_type_strategy(),
        entity_id_strategy(8),
        operation_strategy(),
        payload_strategy(),
        timestamp_strategy(60_000),
    )
        .prop_map(move |(entity_type, entity_id, operation, payload, at)| {
            let payload = if operation.is_delete() {
                Payload::new()
            } else {
                payload
            };
            ChangeRecord::new(user_id, entity_type, entity_id, operation, payload, at)
        })
}

/// Strategy for a batch of records whose timestamps never go backwards.
pub fn ordered_batch_strategy(
    user_id: &'static str,
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<ChangeRecord>> {
    prop::collection::vec((change_record_strategy(user_id), 0u64..1_000), len).prop_map(|items| {
        let mut clock = 0u64;
        items
            .into_iter()
            .map(|(mut record, step)| {
                clock += step;
                record.local_timestamp = Timestamp::from_millis(clock);
                record
            })
            .collect()
    })
}

/// Strategy for update/update conflicts on one expense.
pub fn update_conflict_strategy() -> impl Strategy<Value = SyncConflict> {
    (
        payload_strategy(),
        payload_strategy(),
        timestamp_strategy(10_000),
        timestamp_strategy(10_000),
        1u64..100,
    )
        .prop_map(|(local_data, remote_data, local_ts, remote_ts, version)| SyncConflict {
            entity_id: "e1".into(),
            entity_type: EntityType::Expense,
            local_operation: Operation::Update,
            local_data,
            remote_data,
            local_timestamp: local_ts,
            remote_timestamp: remote_ts,
            remote_deleted: false,
            remote_version: version,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn ordered_batches_are_monotonic(batch in ordered_batch_strategy("u1", 1..30)) {
            for pair in batch.windows(2) {
                prop_assert!(pair[0].local_timestamp <= pair[1].local_timestamp);
            }
        }

        #[test]
        fn deletes_carry_no_payload(record in change_record_strategy("u1")) {
            if record.operation.is_delete() {
                prop_assert!(record.payload.is_empty());
            }
            prop_assert_eq!(record.user_id.as_str(), "u1");
        }
    }
}
