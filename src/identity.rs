//! Explicit caller identity threaded through mutating operations.
//!
//! The core never consults ambient "current user" state: every operation that
//! writes takes an [`Actor`] naming who asked for the change. Authorization
//! itself lives in the surrounding request layer; the core uses the actor for
//! audit fields and structured logging.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of the caller invoking a core operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Back-office administrator
    Admin,
    /// Comfort pro working the estimate (sales tech / reviewer)
    ComfortPro,
    /// The system itself: pollers, schedulers, reconciliation
    System,
}

impl ActorRole {
    /// Check if this role represents a human operator
    pub fn is_human(&self) -> bool {
        matches!(self, Self::Admin | Self::ComfortPro)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::ComfortPro => write!(f, "comfort_pro"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Identity of the caller of a core operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: i64, role: ActorRole) -> Self {
        Self { id, role }
    }

    /// The system actor used by pollers and reconciliation paths
    pub fn system() -> Self {
        Self {
            id: 0,
            role: ActorRole::System,
        }
    }

    pub fn is_human(&self) -> bool {
        self.role.is_human()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}
