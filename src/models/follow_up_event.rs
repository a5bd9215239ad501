//! # Follow-Up Event Model
//!
//! One materialized, trackable instance of a sequence step for one estimate.
//!
//! ## Overview
//!
//! Events are the mutable side of the sequencer: the materializer inserts them
//! in `pending_review` or `scheduled`, comfort pros edit their content, the
//! dispatch path marks them `sent`, and reconciliation skips or snoozes them.
//! `sequence_step_index` is a back-reference to the step the event was
//! materialized from, not an ownership pointer; the estimate owns the event.
//!
//! Events are never deleted individually; they disappear only when the owning
//! estimate is deleted, so the event list doubles as the follow-up audit trail.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::sequence::Channel;
use crate::state_machine::states::EventState;

/// Represents one instantiation of a sequence step for one estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpEvent {
    pub id: i64,
    pub estimate_id: i64,
    /// Which step this event corresponds to
    pub sequence_step_index: i32,
    pub channel: Channel,
    pub status: EventState,
    /// Message body; null until generated or authored
    pub content: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
    /// Provider message id stamped by the dispatch adapter on send
    pub external_message_id: Option<String>,
    /// Set when a comfort pro edited the content before it went out
    pub comfort_pro_edited: bool,
    /// System- or human-authored annotation (skip reasons, snooze context)
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl FollowUpEvent {
    /// Check if this event still occupies its step slot
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Check if the event has content a dispatch could deliver
    pub fn has_content(&self) -> bool {
        self.content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// New follow-up event for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFollowUpEvent {
    pub estimate_id: i64,
    pub sequence_step_index: i32,
    pub channel: Channel,
    pub status: EventState,
    pub content: Option<String>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event_with(status: EventState, content: Option<&str>) -> FollowUpEvent {
        let now = Utc::now().naive_utc();
        FollowUpEvent {
            id: 11,
            estimate_id: 7,
            sequence_step_index: 0,
            channel: Channel::Sms,
            status,
            content: content.map(str::to_string),
            sent_at: None,
            external_message_id: None,
            comfort_pro_edited: false,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_has_content_rejects_blank() {
        assert!(event_with(EventState::PendingReview, Some("Hi Dana!")).has_content());
        assert!(!event_with(EventState::PendingReview, Some("   ")).has_content());
        assert!(!event_with(EventState::PendingReview, None).has_content());
    }

    #[test]
    fn test_active_tracks_status() {
        assert!(event_with(EventState::PendingReview, None).is_active());
        assert!(event_with(EventState::Scheduled, None).is_active());
        assert!(!event_with(EventState::Snoozed, None).is_active());
        assert!(!event_with(EventState::Sent, None).is_active());
    }
}
