//! # NestMate Sync Protocol
//!
//! Sync protocol types and CBOR codecs for NestMate.
//!
//! This crate provides:
//! - `ChangeRecord` for queued local mutations
//! - `RemoteSnapshot` for the remote view of one entity
//! - `SyncConflict`, `ConflictResolution` and `ConflictPolicy`
//! - `SyncStatus`, `SyncPhase` and `SyncIssue` for status reporting
//! - Opaque payload values (`Value`, `Payload`)
//! - CBOR encoding of change batches and payload digests
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod codec;
mod conflict;
mod error;
mod record;
mod status;
mod value;

pub use codec::{decode_changes, encode_changes, payload_digest, PayloadDigest, FORMAT_VERSION};
pub use conflict::{ConflictPolicy, ConflictResolution, SyncConflict};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{ChangeRecord, EntityType, Operation, RemoteSnapshot};
pub use status::{SessionSummary, SyncIssue, SyncPhase, SyncStatus};
pub use value::{Payload, Timestamp, Value};
