//! Queue entry types and their on-disk names

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Prefix shared by every pending entry file.
pub(super) const ENTRY_PREFIX: &str = "cmd_";

/// Command priority; higher priorities are dequeued first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Rank encoded in entry names; lower ranks sort first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    #[must_use]
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::High),
            2 => Some(Self::Normal),
            3 => Some(Self::Low),
            _ => None,
        }
    }
}

/// Status of a stored command. Entries only exist while pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
}

/// A command waiting in an agent's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    /// Submission time
    pub timestamp: DateTime<Utc>,
    /// Per-agent sequence number, strictly increasing
    pub sequence: u64,
    pub priority: Priority,
    pub command: String,
    #[serde(default)]
    pub status: CommandStatus,
}

impl QueuedCommand {
    #[must_use]
    pub fn new(sequence: u64, priority: Priority, command: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sequence,
            priority,
            command: command.into(),
            status: CommandStatus::Pending,
        }
    }

    /// File name of this command's entry.
    #[must_use]
    pub fn entry_name(&self) -> String {
        entry_name(self.priority, self.sequence)
    }
}

/// Entry file name: `cmd_<rank>_<sequence:010>`.
///
/// Lexical order of these names is dequeue order.
#[must_use]
pub fn entry_name(priority: Priority, sequence: u64) -> String {
    format!("{ENTRY_PREFIX}{}_{sequence:010}", priority.rank())
}

/// Decode an entry file name into its priority and sequence.
#[must_use]
pub fn parse_entry_name(name: &str) -> Option<(Priority, u64)> {
    let (rank, sequence) = name.strip_prefix(ENTRY_PREFIX)?.split_once('_')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(rank) || !digits(sequence) {
        return None;
    }
    let priority = Priority::from_rank(u8::from_str(rank).ok()?)?;
    Some((priority, sequence.parse().ok()?))
}

/// Per-priority counts of pending commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueStats {
    pub(super) fn record(&mut self, priority: Priority) {
        self.total += 1;
        match priority {
            Priority::High => self.high += 1,
            Priority::Normal => self.normal += 1,
            Priority::Low => self.low += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_priority_parse_and_display() {
        assert_eq!(Priority::from_str("high").ok(), Some(Priority::High));
        assert_eq!(Priority::from_str("LOW").ok(), Some(Priority::Low));
        assert!(Priority::from_str("urgent").is_err());
        assert_eq!(Priority::Normal.to_string(), "normal");
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_rank_round_trips_for_every_priority() {
        for priority in Priority::iter() {
            assert_eq!(Priority::from_rank(priority.rank()), Some(priority));
        }
        assert_eq!(Priority::from_rank(0), None);
    }

    #[test]
    fn test_entry_name_layout() {
        assert_eq!(entry_name(Priority::High, 7), "cmd_1_0000000007");
        assert_eq!(entry_name(Priority::Low, 12_345), "cmd_3_0000012345");
        assert_eq!(
            parse_entry_name("cmd_2_0000000042"),
            Some((Priority::Normal, 42))
        );
        assert_eq!(parse_entry_name("cmd_4_0000000042"), None);
        assert_eq!(parse_entry_name("cmd_2_"), None);
        assert_eq!(parse_entry_name("cmd_2_+1"), None);
        assert_eq!(parse_entry_name(".sequence"), None);
    }

    #[test]
    fn test_command_json_shape() -> Result<(), serde_json::Error> {
        let command = QueuedCommand::new(3, Priority::High, "echo hi");
        let value = serde_json::to_value(&command)?;
        assert_eq!(value["priority"], "high");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["sequence"], 3);
        let back: QueuedCommand = serde_json::from_value(value)?;
        assert_eq!(back, command);
        Ok(())
    }
}
