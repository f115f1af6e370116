//! Query operations for the lock manager.
//!
//! Pure functions for validating names and settings, deciding staleness and
//! checking process liveness.

use std::time::Duration;

use super::types::{LockRecord, LockSettings, StaleReason};
use crate::{Error, Result};

/// Suffix of every claim directory under `locks/`.
pub(super) const LOCK_SUFFIX: &str = ".lock";

/// Longest accepted resource name; keeps `<name>.lock` under common limits.
pub const MAX_RESOURCE_LEN: usize = 200;

/// Validate a resource name.
///
/// Names are opaque keys that become a single directory component, so only
/// path safety is checked.
pub fn validate_resource_name(resource: &str) -> Result<()> {
    validate_component("resource name", resource, MAX_RESOURCE_LEN)
}

/// Check that `name` is usable as one directory component of at most
/// `max_len` bytes: non-empty, no separators or NUL, not `.` or `..`.
pub(crate) fn validate_component(what: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(format!("{what} cannot be empty")));
    }

    if name.len() > max_len {
        return Err(Error::validation(format!(
            "{what} exceeds {max_len} bytes"
        )));
    }

    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(Error::validation(format!(
            "{what} '{}' must be a single path component",
            name.escape_debug()
        )));
    }

    Ok(())
}

/// Validate acquisition timing.
pub(super) fn validate_settings(settings: &LockSettings) -> Result<()> {
    if settings.timeout.is_zero() {
        return Err(Error::invalid_config("lock timeout must be > 0"));
    }
    if settings.retry_interval.is_zero() || settings.retry_interval >= settings.timeout {
        return Err(Error::invalid_config(format!(
            "retry interval ({:?}) must be > 0 and < timeout ({:?})",
            settings.retry_interval, settings.timeout
        )));
    }
    if settings.stale_after.is_zero() {
        return Err(Error::invalid_config("staleness threshold must be > 0"));
    }
    Ok(())
}

/// Resource name for a claim directory name, if it is one.
pub(super) fn resource_from_dir_name(name: &str) -> Option<&str> {
    name.strip_suffix(LOCK_SUFFIX).filter(|r| !r.is_empty())
}

/// Decide whether a claim may be reclaimed.
///
/// A claim without a readable record is judged by age only: its holder may
/// still be about to write it.
pub(super) fn stale_reason(
    record: Option<&LockRecord>,
    age: Duration,
    stale_after: Duration,
) -> Option<StaleReason> {
    match record {
        Some(record) if !is_process_alive(record.pid) => {
            Some(StaleReason::HolderDead { pid: record.pid })
        }
        _ if age >= stale_after => Some(StaleReason::Expired { age }),
        _ => None,
    }
}

/// Check if a process is still alive.
#[cfg(target_os = "linux")]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

/// Without `/proc`, holders are assumed alive and only age reclaims them.
#[cfg(not(target_os = "linux"))]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("session:test").is_ok());
        assert!(validate_resource_name("write_notes.md").is_ok());
        assert!(validate_resource_name("queue_agent-1").is_ok());
        assert!(validate_resource_name(":::").is_ok());
        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name("a/b").is_err());
        assert!(validate_resource_name("a\\b").is_err());
        assert!(validate_resource_name("a\0b").is_err());
        assert!(validate_resource_name(".").is_err());
        assert!(validate_resource_name("..").is_err());
        assert!(validate_resource_name(&"x".repeat(MAX_RESOURCE_LEN)).is_ok());
        assert!(validate_resource_name(&"x".repeat(MAX_RESOURCE_LEN + 1)).is_err());
    }

    #[test]
    fn test_keyword_like_names_are_ordinary_keys() {
        for name in ["null", "none", "NONE", "true", "false", "nil", "void", "undefined"] {
            assert!(validate_resource_name(name).is_ok(), "{name} rejected");
        }
    }

    #[test]
    fn test_validate_component_honours_its_own_limit() {
        assert!(validate_component("agent id", &"a".repeat(190), 190).is_ok());
        assert!(matches!(
            validate_component("agent id", &"a".repeat(191), 190),
            Err(Error::Validation(msg)) if msg.starts_with("agent id")
        ));
    }

    #[test]
    fn test_validate_settings() {
        let ok = LockSettings::default();
        assert!(validate_settings(&ok).is_ok());

        let zero_timeout = LockSettings {
            timeout: Duration::ZERO,
            ..ok
        };
        assert!(validate_settings(&zero_timeout).is_err());

        let slow_retry = LockSettings {
            retry_interval: ok.timeout,
            ..ok
        };
        assert!(validate_settings(&slow_retry).is_err());

        let zero_retry = LockSettings {
            retry_interval: Duration::ZERO,
            ..ok
        };
        assert!(validate_settings(&zero_retry).is_err());
    }

    #[test]
    fn test_resource_from_dir_name() {
        assert_eq!(resource_from_dir_name("queue_a.lock"), Some("queue_a"));
        assert_eq!(resource_from_dir_name(".lock"), None);
        assert_eq!(resource_from_dir_name("queue_a"), None);
    }

    #[test]
    fn test_live_young_claim_is_not_stale() {
        let record = LockRecord::current();
        let reason = stale_reason(Some(&record), Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(reason, None);
    }

    #[test]
    fn test_old_claim_is_expired_even_if_holder_alive() {
        let record = LockRecord::current();
        let reason = stale_reason(
            Some(&record),
            Duration::from_secs(61),
            Duration::from_secs(60),
        );
        assert!(matches!(reason, Some(StaleReason::Expired { .. })));
    }

    #[test]
    fn test_claim_without_record_judged_by_age() {
        assert_eq!(
            stale_reason(None, Duration::from_secs(1), Duration::from_secs(60)),
            None
        );
        assert!(stale_reason(None, Duration::from_secs(60), Duration::from_secs(60)).is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dead_holder_is_stale() {
        let record = LockRecord {
            pid: u32::MAX - 1,
            acquired_at: chrono::Utc::now(),
        };
        let reason = stale_reason(Some(&record), Duration::ZERO, Duration::from_secs(60));
        assert_eq!(reason, Some(StaleReason::HolderDead { pid: u32::MAX - 1 }));
    }

    #[test]
    fn test_is_process_alive_current_process() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }
}
