//! Decode command implementation.

use super::{read_file, CliResult};
use nestmate_sync_engine::{ChangeLog, SyncConfig};
use nestmate_sync_protocol::ChangeRecord;
use std::path::Path;

/// Runs the decode command.
pub fn run(input: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let records = decode_file(input)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records)?;
        }
    }

    Ok(())
}

/// Restores a change-log snapshot and drains it, user by user.
///
/// Records come back in each user's drain order.
pub fn decode_file(input: &Path) -> CliResult<Vec<ChangeRecord>> {
    let bytes = read_file(input)?;
    let log = ChangeLog::restore(&bytes, SyncConfig::default().clock_skew_tolerance)?;
    Ok(log
        .users()
        .iter()
        .flat_map(|user_id| log.drain(user_id))
        .collect())
}

fn print_text_output(records: &[ChangeRecord]) -> CliResult<()> {
    println!("Change Log Snapshot");
    println!("===================");
    println!();
    println!("Records: {}", records.len());
    println!();

    for record in records {
        println!(
            "  {} {} {} [{} {}] @{} {}",
            record.id,
            record.user_id,
            record.operation,
            record.entity_type,
            record.entity_id,
            record.local_timestamp,
            serde_json::to_string(&record.payload)?
        );
    }

    Ok(())
}
