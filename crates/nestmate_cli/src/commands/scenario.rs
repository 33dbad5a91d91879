//! JSON scenario and change-file formats.

use super::{read_json, CliError, CliResult};
use nestmate_sync_protocol::{
    ChangeRecord, ConflictPolicy, EntityType, Operation, Payload, RemoteSnapshot, Timestamp,
};
use serde::Deserialize;
use std::path::Path;

/// A local change as written in JSON input.
///
/// The change ID is assigned on load. `user_id` may be omitted inside a
/// scenario, where the scenario's user applies.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeInput {
    /// Owning user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Operation type.
    pub operation: Operation,
    /// Entity payload.
    #[serde(default)]
    pub payload: Payload,
    /// Local mutation time in milliseconds.
    pub local_timestamp: Timestamp,
}

impl ChangeInput {
    /// Builds a change record, falling back to `default_user`.
    pub fn into_record(self, index: usize, default_user: Option<&str>) -> CliResult<ChangeRecord> {
        let user_id = self
            .user_id
            .or_else(|| default_user.map(str::to_string))
            .ok_or(CliError::MissingUser { index })?;
        Ok(ChangeRecord::new(
            user_id,
            self.entity_type,
            self.entity_id,
            self.operation,
            self.payload,
            self.local_timestamp,
        ))
    }
}

/// One user's sync scenario.
///
/// `remote` and `local` seed the two stores before a baseline session runs.
/// `remote_after` is then written to the remote store as another device
/// would, `changes` are queued, and the session under test runs.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// The synced user.
    pub user_id: String,
    /// Conflict policy, last-writer-wins if absent.
    #[serde(default)]
    pub policy: Option<ConflictPolicy>,
    /// Remote snapshots before the baseline session.
    #[serde(default)]
    pub remote: Vec<RemoteSnapshot>,
    /// Local snapshots before the baseline session.
    #[serde(default)]
    pub local: Vec<RemoteSnapshot>,
    /// Remote snapshots written after the baseline session.
    #[serde(default)]
    pub remote_after: Vec<RemoteSnapshot>,
    /// Local changes queued for the session under test.
    #[serde(default)]
    pub changes: Vec<ChangeInput>,
}

impl Scenario {
    /// Loads a scenario file.
    pub fn load(path: &Path) -> CliResult<Self> {
        read_json(path)
    }

    /// Builds the scenario's change records.
    pub fn records(&self) -> CliResult<Vec<ChangeRecord>> {
        self.changes
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, change)| change.into_record(index, Some(&self.user_id)))
            .collect()
    }
}

/// Loads a JSON array of changes, each naming its user.
pub fn load_changes(path: &Path) -> CliResult<Vec<ChangeRecord>> {
    let changes: Vec<ChangeInput> = read_json(path)?;
    changes
        .into_iter()
        .enumerate()
        .map(|(index, change)| change.into_record(index, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scenario_user_fills_missing_user() {
        let json = r#"{
            "user_id": "u1",
            "changes": [
                {"entity_type": "expense", "entity_id": "e1", "operation": "create",
                 "payload": {"amount": 5}, "local_timestamp": 10},
                {"user_id": "u2", "entity_type": "note", "entity_id": "n1",
                 "operation": "delete", "local_timestamp": 20}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        let records = scenario.records().unwrap();

        assert_eq!(records[0].user_id, "u1");
        assert_eq!(records[0].payload.get("amount").and_then(|v| v.as_integer()), Some(5));
        assert_eq!(records[1].user_id, "u2");
        assert!(records[1].payload.is_empty());
        assert_ne!(records[0].id, records[1].id);
        assert!(scenario.policy.is_none());
    }

    #[test]
    fn change_file_requires_user() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"entity_type": "task", "entity_id": "t1", "operation": "update", "local_timestamp": 1}}]"#
        )
        .unwrap();

        let err = load_changes(file.path()).unwrap_err();
        assert!(matches!(err, CliError::MissingUser { index: 0 }));
    }

    #[test]
    fn malformed_json_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = Scenario::load(file.path()).unwrap_err();
        assert!(matches!(err, CliError::Json { .. }));
        assert!(err.to_string().contains("invalid JSON"));
    }
}
