//! Run command implementation.

use super::scenario::Scenario;
use super::CliResult;
use nestmate_sync_engine::{CancellationToken, MemoryStore, SyncConfig, SyncCoordinator};
use nestmate_sync_protocol::{
    ConflictPolicy, RemoteSnapshot, SessionSummary, SyncConflict, SyncStatus,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Outcome of the session under test.
#[derive(Debug, Serialize)]
pub struct RunResult {
    /// The synced user.
    pub user_id: String,
    /// Policy the session ran with.
    pub policy: ConflictPolicy,
    /// Error returned by the session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Counters of the session, if it completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    /// Status after the session.
    pub status: SyncStatus,
    /// Conflicts awaiting manual resolution.
    pub open_conflicts: Vec<SyncConflict>,
    /// Remote store contents.
    pub remote: Vec<RemoteSnapshot>,
    /// Local store contents.
    pub local: Vec<RemoteSnapshot>,
}

/// Runs the run command.
pub fn run(
    path: &Path,
    policy: Option<ConflictPolicy>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(path)?;
    let result = execute(&scenario, policy)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result)?;
        }
    }

    Ok(())
}

/// Executes a scenario against two in-memory stores.
///
/// A failing baseline session is an error; a failing session under test is
/// reported in the result.
pub fn execute(scenario: &Scenario, policy: Option<ConflictPolicy>) -> CliResult<RunResult> {
    let policy = policy.or(scenario.policy).unwrap_or_default();
    let user_id = scenario.user_id.as_str();
    let records = scenario.records()?;

    let coordinator = SyncCoordinator::new(
        SyncConfig::new().with_conflict_policy(policy),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
    );
    for snapshot in &scenario.remote {
        coordinator.remote().put_snapshot(user_id, snapshot.clone());
    }
    for snapshot in &scenario.local {
        coordinator.local().put_snapshot(user_id, snapshot.clone());
    }

    let cancel = CancellationToken::new();
    let baseline = coordinator.sync_user_data(user_id, &cancel)?;
    info!(user_id, pulled = baseline.summary.pulled, "baseline session complete");

    for snapshot in &scenario.remote_after {
        coordinator.remote().put_snapshot(user_id, snapshot.clone());
    }
    coordinator.queue_local_changes(records)?;

    let (summary, error) = match coordinator.sync_user_data(user_id, &cancel) {
        Ok(report) => (Some(report.summary), None),
        Err(err) => (None, Some(err.to_string())),
    };

    Ok(RunResult {
        user_id: user_id.to_string(),
        policy,
        error,
        summary,
        status: coordinator.get_sync_status(user_id),
        open_conflicts: coordinator.open_conflicts(user_id),
        remote: coordinator.remote().snapshots(user_id),
        local: coordinator.local().snapshots(user_id),
    })
}

fn print_text_output(result: &RunResult) -> CliResult<()> {
    println!("NestMate Sync Session");
    println!("=====================");
    println!();
    println!("User:   {}", result.user_id);
    println!("Policy: {}", result.policy);
    match &result.error {
        Some(error) => println!("Result: {error}"),
        None => println!("Result: ok"),
    }

    if let Some(summary) = &result.summary {
        println!();
        println!("Session:");
        println!("  Pulled:          {}", summary.pulled);
        println!("  Drained:         {}", summary.drained);
        println!("  Pushed:          {}", summary.pushed);
        println!("  Applied locally: {}", summary.applied_locally);
        println!("  Conflicts:       {}", summary.conflicts);
        println!("  Resolved:        {}", summary.resolved);
    }

    println!();
    println!("Status:");
    println!("  Phase:           {}", result.status.phase);
    println!("  Pending changes: {}", result.status.pending_changes);
    match result.status.last_sync_time {
        Some(at) => println!("  Last sync:       {at}"),
        None => println!("  Last sync:       never"),
    }
    for issue in &result.status.errors {
        println!("  Issue: {issue}");
    }

    print_store("Remote", &result.remote)?;
    print_store("Local", &result.local)?;
    Ok(())
}

fn print_store(name: &str, snapshots: &[RemoteSnapshot]) -> CliResult<()> {
    println!();
    println!("{name} store:");
    for snapshot in snapshots {
        let state = if snapshot.deleted {
            "deleted".to_string()
        } else {
            serde_json::to_string(&snapshot.payload)?
        };
        println!(
            "  [{} {}] v{} @{} {}",
            snapshot.entity_type,
            snapshot.entity_id,
            snapshot.version,
            snapshot.remote_timestamp,
            state
        );
    }
    Ok(())
}
