//! # NestMate Testkit
//!
//! Test utilities for NestMate sync.
//!
//! This crate provides:
//! - A coordinator fixture over two in-memory stores
//! - Record and snapshot builders
//! - Property-based test generators using proptest
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nestmate_testkit::prelude::*;
//!
//! #[test]
//! fn local_update_wins() {
//!     let sync = TestSync::new();
//!     sync.seed_remote("u1", expense_snapshot("e1", 50, 1, 20));
//!     sync.queue(vec![expense_update("u1", "e1", 100, 42)]);
//!     sync.run("u1").unwrap();
//!     assert_eq!(sync.remote_payload("u1", "e1"), Some(amount(42)));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
