//! Encode command implementation.

use super::scenario::load_changes;
use super::{CliError, CliResult};
use nestmate_sync_engine::{ChangeLog, SyncConfig};
use std::path::Path;
use tracing::info;

/// Runs the encode command.
pub fn run(changes: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (count, users) = encode_file(changes, output)?;
    println!(
        "Wrote {count} changes for {users} users to {}",
        output.display()
    );
    Ok(())
}

/// Queues the changes in a fresh change log and writes its snapshot.
///
/// The changes go through the same validation as `queue_local_changes`.
/// Returns the number of records and users written.
pub fn encode_file(changes: &Path, output: &Path) -> CliResult<(usize, usize)> {
    let records = load_changes(changes)?;
    let log = ChangeLog::new(SyncConfig::default().clock_skew_tolerance);
    let count = log.append_batch(records)?;
    let users = log.users().len();

    let bytes = log.snapshot()?;
    std::fs::write(output, &bytes).map_err(|source| CliError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    info!(count, users, bytes = bytes.len(), "change log snapshot written");
    Ok((count, users))
}
