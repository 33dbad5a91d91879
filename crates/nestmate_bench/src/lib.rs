//! Benchmark utilities.

#![warn(missing_docs)]

use nestmate_sync_protocol::{ChangeRecord, EntityType, Payload, RemoteSnapshot, Timestamp};
use rand::Rng;

/// Generate a payload with `fields` random fields.
pub fn random_payload(fields: usize) -> Payload {
    let mut rng = rand::thread_rng();
    (0..fields).fold(Payload::new(), |payload, i| {
        if i % 2 == 0 {
            payload.with(format!("field_{i}"), rng.gen::<i64>())
        } else {
            let text: String = (0..16).map(|_| rng.gen_range('a'..='z')).collect();
            payload.with(format!("field_{i}"), text)
        }
    })
}

/// Generate `count` update records spread over `entities` expenses.
///
/// Timestamps increase by one millisecond per record.
pub fn generate_changes(user_id: &str, count: usize, entities: usize) -> Vec<ChangeRecord> {
    (0..count)
        .map(|i| {
            ChangeRecord::update(
                user_id,
                EntityType::Expense,
                format!("e{}", i % entities.max(1)),
                random_payload(4),
                Timestamp::from_millis(i as u64),
            )
        })
        .collect()
}

/// Generate `count` live remote snapshots at version 1.
pub fn generate_snapshots(count: usize) -> Vec<RemoteSnapshot> {
    (0..count)
        .map(|i| {
            RemoteSnapshot::live(
                EntityType::Task,
                format!("t{i}"),
                random_payload(4),
                Timestamp::from_millis(i as u64),
                1,
            )
        })
        .collect()
}
