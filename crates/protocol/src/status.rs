//! Message lifecycle status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a message, shared by both ends of the channel
///
/// Transitions are one-way: `Pending` moves to exactly one terminal status
/// and never leaves it. Progress reports keep a message `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for a result
    Pending,
    /// Finished with a result
    Resolved,
    /// Finished with a failure reason
    Rejected,
    /// Canceled by either side
    Canceled,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Resolved => "resolved",
            MessageStatus::Rejected => "rejected",
            MessageStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
