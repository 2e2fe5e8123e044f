//! Error types for the diagnostics engine
//!
//! Every error here is a caller configuration problem: the engine never
//! fails while recording, and analysis passes only fail when they are asked
//! to run against state that is not ready for them.

use crate::access::ThreadId;
use thiserror::Error;

/// Errors reported by the timeline, the classifier and the session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(
        "mismatched end on thread {thread}: expected innermost open event '{expected}', found {}",
        describe_found(.found)
    )]
    MismatchedEnd {
        thread: ThreadId,
        expected: String,
        found: Option<String>,
    },

    #[error("timeline is finalized: cannot {operation} '{name}' on thread {thread}")]
    TimelineFinalized {
        thread: ThreadId,
        name: String,
        operation: &'static str,
    },

    #[error("timeline must be finalized before classification")]
    TimelineNotFinalized,

    #[error("session must be finalized before analysis")]
    SessionNotFinalized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

fn describe_found(found: &Option<String>) -> String {
    match found {
        Some(name) => format!("'{name}'"),
        None => "no open event".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatched_end_message_names_both_events() {
        let err = ConfigurationError::MismatchedEnd {
            thread: ThreadId(1),
            expected: "Y".to_string(),
            found: Some("X".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("'Y'"));
        assert!(msg.contains("'X'"));
        assert!(msg.contains("T1"));
    }

    #[test]
    fn test_mismatched_end_without_open_event() {
        let err = ConfigurationError::MismatchedEnd {
            thread: ThreadId(3),
            expected: "X".to_string(),
            found: None,
        };
        assert!(err.to_string().contains("no open event"));
    }
}
