//! Output helpers shared by all handlers

use anyhow::Result;
use serde::Serialize;

/// Print `value` as pretty JSON, or the text rendering otherwise.
///
/// Empty text renderings print nothing.
pub fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        let rendered = text(value);
        if !rendered.is_empty() {
            println!("{rendered}");
        }
    }
    Ok(())
}

/// Format an error with its first distinct cause.
pub fn format_error(err: &anyhow::Error) -> String {
    let msg = err.to_string();
    if let Some(source) = err.source() {
        let source_msg = source.to_string();
        if !msg.contains(&source_msg) && !source_msg.is_empty() {
            return format!("{msg}\nCause: {source_msg}");
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_appends_distinct_cause() {
        let err = anyhow::Error::new(std::io::Error::other("disk full")).context("saving notes");
        assert_eq!(format_error(&err), "saving notes\nCause: disk full");
    }

    #[test]
    fn test_format_error_skips_repeated_cause() {
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(format_error(&err), "plain failure");
    }
}
