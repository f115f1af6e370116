//! # Burrow Core
//!
//! File-based coordination for independent agent processes that share
//! nothing but a directory tree.
//!
//! - [`lock`]: named mutual-exclusion locks with stale reclaim
//! - [`store`]: locked reads, conflict-checked atomic writes and backups
//! - [`transaction`]: best-effort multi-file commits
//! - [`queue`]: per-agent priority command queues
//! - [`root`]: the directory layout tying them together
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! Every operation is synchronous. Waiting only happens inside lock
//! acquisition and is always bounded by a timeout.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod lock;
pub mod queue;
pub mod root;
pub mod store;
pub mod transaction;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use lock::{LockAcquisition, LockManager, ResourceLock};
pub use queue::{CommandQueue, Priority, QueueStats, QueuedCommand};
pub use root::Burrow;
pub use store::{FileVersion, SafeFileStore, WriteOptions};
pub use transaction::{Transaction, TransactionCoordinator};
