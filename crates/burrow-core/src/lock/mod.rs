//! Named resource locks shared between independent processes.
//!
//! Each lock is a directory `locks/<resource>.lock/` created with `mkdir`, so
//! exactly one process can create it. The holder writes its pid and the
//! acquisition time to `holder.json` inside.
//!
//! # Guarantees
//!
//! - **Mutual Exclusion**: at most one live holder per resource name
//! - **Bounded Waiting**: acquisition returns within `timeout` plus one retry interval
//! - **Stale Reclaim**: claims of dead holders, or older than the staleness threshold, are removed
//! - **Automatic Cleanup**: dropping a [`ResourceLock`] releases it
//!
//! Locking is advisory: only participants that go through this module are
//! excluded.
//!
//! # Example
//!
//! ```no_run
//! use burrow_core::lock::{LockAcquisition, LockManager, LockSettings};
//!
//! let manager = LockManager::new(".burrow/locks", LockSettings::default())?;
//!
//! match manager.acquire("queue_agent-1")? {
//!     LockAcquisition::Acquired(lock) => {
//!         // critical section
//!         lock.release()?;
//!     }
//!     LockAcquisition::Timeout { holder, .. } => {
//!         eprintln!("still held by {:?}", holder.map(|h| h.pid));
//!     }
//! }
//! # Ok::<(), burrow_core::Error>(())
//! ```

mod operations;
mod queries;
pub mod types;

pub(crate) use queries::validate_component;
pub use queries::{is_process_alive, validate_resource_name, MAX_RESOURCE_LEN};
pub use types::{
    LockAcquisition, LockInfo, LockManager, LockRecord, LockSettings, ResourceLock, StaleReason,
};
