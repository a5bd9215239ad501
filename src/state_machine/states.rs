use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states for a materialized follow-up event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Event is waiting for a comfort pro to review or author its content
    PendingReview,
    /// Event is approved and queued for automated dispatch
    Scheduled,
    /// Event was delivered through the dispatch adapter
    Sent,
    /// Event was skipped, manually or by outcome reconciliation
    Skipped,
    /// Event is parked while the owning estimate is snoozed
    Snoozed,
}

impl EventState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Skipped)
    }

    /// Check if this is an active state (event occupies its step slot)
    ///
    /// At most one event per (estimate, step index) may be active at a time;
    /// the materializer's idempotence check and the storage uniqueness
    /// guarantee are both defined over this predicate.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::PendingReview | Self::Scheduled)
    }

    /// Check if this state accepts content edits
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::PendingReview)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingReview => write!(f, "pending_review"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Sent => write!(f, "sent"),
            Self::Skipped => write!(f, "skipped"),
            Self::Snoozed => write!(f, "snoozed"),
        }
    }
}

impl std::str::FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(Self::PendingReview),
            "scheduled" => Ok(Self::Scheduled),
            "sent" => Ok(Self::Sent),
            "skipped" => Ok(Self::Skipped),
            "snoozed" => Ok(Self::Snoozed),
            _ => Err(format!("Invalid event state: {s}")),
        }
    }
}

/// Default state for newly materialized events
impl Default for EventState {
    fn default() -> Self {
        Self::PendingReview
    }
}

/// Lifecycle states for an estimate within the follow-up sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    /// Estimate is being actively worked through its sequence
    Active,
    /// Follow-up is paused until a stored timestamp
    Snoozed,
    /// Customer accepted; follow-up is complete
    Won,
    /// Customer declined or went dark; follow-up is complete
    Lost,
}

impl EstimateStatus {
    /// Check if this is an outcome state (won or lost)
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    /// Check if the materializer may produce events for this status
    pub fn allows_materialization(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for EstimateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Snoozed => write!(f, "snoozed"),
            Self::Won => write!(f, "won"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

impl std::str::FromStr for EstimateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "snoozed" => Ok(Self::Snoozed),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("Invalid estimate status: {s}")),
        }
    }
}

impl Default for EstimateStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// States for a priced option attached to an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionState {
    /// Option is awaiting a customer decision
    Pending,
    /// Customer accepted the option
    Accepted,
    /// Option was declined, by the customer or by outcome reconciliation
    Declined,
}

impl fmt::Display for OptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for OptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            _ => Err(format!("Invalid option state: {s}")),
        }
    }
}
