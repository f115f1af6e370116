//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<platform config dir>/burrow/config.toml`
//! 3. Root config: `<coordination root>/config.toml`
//! 4. Environment variables: `BURROW_*`
//! 5. CLI flags (applied by the binary)
//!
//! # Example Config
//!
//! ```toml
//! root = "/srv/agents/.burrow"
//!
//! [lock]
//! timeout_ms = 30000
//! retry_interval_ms = 100
//! stale_after_secs = 300
//!
//! [store]
//! backup_retention = 5
//! check_conflicts = true
//! ```

mod load;
mod types;

pub use load::{global_config_path, load_config, load_toml_file, root_config_path};
pub use types::{
    Config, LockConfig, PartialConfig, PartialLockConfig, PartialStoreConfig, StoreConfig,
    DEFAULT_ROOT,
};
