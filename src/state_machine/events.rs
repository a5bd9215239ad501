use serde::{Deserialize, Serialize};

/// Commands that trigger follow-up event state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventCommand {
    /// Record a completed touchpoint; automated sends carry the provider's
    /// message id, completed call tasks carry none
    MarkSent {
        external_message_id: Option<String>,
    },
    /// Skip the event, with an optional system- or human-authored note
    Skip { note: Option<String> },
    /// Park the event while its estimate is snoozed
    Snooze,
    /// Re-enter the sequence after an estimate-level snooze lifts
    Resume { as_scheduled: bool },
}

impl EventCommand {
    /// Get a string representation of the command type for logging
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::MarkSent { .. } => "mark_sent",
            Self::Skip { .. } => "skip",
            Self::Snooze => "snooze",
            Self::Resume { .. } => "resume",
        }
    }

    /// Extract the skip note if this is a skip command
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Skip { note } => note.as_deref(),
            _ => None,
        }
    }

    /// Check if this command lands the event in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MarkSent { .. } | Self::Skip { .. })
    }
}

/// Helpers for creating common commands
impl EventCommand {
    /// Create a skip command with a note
    pub fn skip_with_note(note: impl Into<String>) -> Self {
        Self::Skip {
            note: Some(note.into()),
        }
    }

    /// Create a skip command without a note
    pub fn skip_silent() -> Self {
        Self::Skip { note: None }
    }
}
