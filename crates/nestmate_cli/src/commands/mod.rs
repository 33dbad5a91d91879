//! CLI command implementations.

pub mod decode;
pub mod encode;
pub mod run;
pub mod scenario;

use nestmate_sync_engine::SyncError;
use nestmate_sync_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input or output file could not be accessed.
    #[error("{path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON input was malformed.
    #[error("{path}: invalid JSON: {source}")]
    Json {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A change in an input file lacked its owning user.
    #[error("change {index} has no user_id")]
    MissingUser {
        /// Position of the change in the file.
        index: usize,
    },

    /// The sync core rejected an operation.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A protocol value failed to encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Output could not be rendered.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

fn read_file(path: &std::path::Path) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> CliResult<T> {
    let bytes = read_file(path)?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}
