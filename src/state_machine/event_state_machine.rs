//! # Event State Machine
//!
//! Governs the lifecycle of a single follow-up event.
//!
//! ## Overview
//!
//! Transition legality is a pure function ([`determine_target_state`]) over
//! the current state and an [`EventCommand`]; persistence applies the
//! transition with a compare-and-set on the expected current state, so a
//! concurrent writer surfaces as a typed conflict instead of a lost update.
//!
//! ## Transition table
//!
//! | from              | mark_sent | skip      | snooze    | resume                       |
//! |-------------------|-----------|-----------|-----------|------------------------------|
//! | `pending_review`  | `sent`    | `skipped` | `snoozed` |                              |
//! | `scheduled`       | `sent`    | `skipped` | `snoozed` |                              |
//! | `snoozed`         |           | `skipped` |           | `pending_review`/`scheduled` |
//! | `sent`, `skipped` | terminal  |           |           |                              |
//!
//! Snoozed events may still be skipped (outcome reconciliation clears them),
//! and re-enter the active states only through the progression controller's
//! reactivation path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::constants::{events, status_groups};
use crate::events::EventPublisher;
use crate::identity::Actor;
use crate::models::FollowUpEvent;
use crate::storage::{SequencerStore, TransitionStamp};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::EventCommand;
use super::states::EventState;

/// Compute the target state for a command, or reject it
pub fn determine_target_state(
    current: EventState,
    command: &EventCommand,
) -> StateMachineResult<EventState> {
    let target = match (current, command) {
        // Dispatch success
        (EventState::PendingReview, EventCommand::MarkSent { .. }) => EventState::Sent,
        (EventState::Scheduled, EventCommand::MarkSent { .. }) => EventState::Sent,

        // Skips: manual, or outcome reconciliation clearing parked events
        (EventState::PendingReview, EventCommand::Skip { .. }) => EventState::Skipped,
        (EventState::Scheduled, EventCommand::Skip { .. }) => EventState::Skipped,
        (EventState::Snoozed, EventCommand::Skip { .. }) => EventState::Skipped,

        // Estimate-level snooze parks active events
        (EventState::PendingReview, EventCommand::Snooze) => EventState::Snoozed,
        (EventState::Scheduled, EventCommand::Snooze) => EventState::Snoozed,

        // Reactivation re-enters the sequence
        (EventState::Snoozed, EventCommand::Resume { as_scheduled }) => {
            if *as_scheduled {
                EventState::Scheduled
            } else {
                EventState::PendingReview
            }
        }

        (from, command) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                command: command.command_type(),
            })
        }
    };

    Ok(target)
}

/// Store-backed state machine for individual follow-up events
pub struct EventStateMachine<S> {
    store: Arc<S>,
    publisher: EventPublisher,
}

impl<S> Clone for EventStateMachine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<S: SequencerStore> EventStateMachine<S> {
    pub fn new(store: Arc<S>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Apply a command to an event, persisting the transition
    pub async fn apply(
        &self,
        event_id: i64,
        command: EventCommand,
    ) -> StateMachineResult<FollowUpEvent> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(StateMachineError::EventNotFound(event_id))?;

        let target = determine_target_state(event.status, &command)?;
        self.check_guards(&event, &command)?;

        let stamp = match &command {
            EventCommand::MarkSent {
                external_message_id,
            } => TransitionStamp::sent(Utc::now().naive_utc(), external_message_id.clone()),
            EventCommand::Skip { note } => match note {
                Some(note) => TransitionStamp::noted(note.clone()),
                None => TransitionStamp::default(),
            },
            EventCommand::Snooze | EventCommand::Resume { .. } => TransitionStamp::default(),
        };

        let updated = self
            .store
            .transition_event(event_id, event.status, target, stamp)
            .await?;

        let event_name = match &command {
            EventCommand::MarkSent { .. } => events::EVENT_SENT,
            EventCommand::Skip { .. } => events::EVENT_SKIPPED,
            EventCommand::Snooze => events::EVENTS_SNOOZED,
            EventCommand::Resume { .. } => events::EVENTS_RESUMED,
        };
        let _ = self
            .publisher
            .publish(
                event_name,
                json!({
                    "event_id": updated.id,
                    "estimate_id": updated.estimate_id,
                    "sequence_step_index": updated.sequence_step_index,
                    "from": event.status,
                    "to": updated.status,
                    "command": command.command_type(),
                }),
            )
            .await;

        tracing::debug!(
            event_id = updated.id,
            estimate_id = updated.estimate_id,
            from = %event.status,
            to = %updated.status,
            command = command.command_type(),
            "Follow-up event transitioned"
        );

        Ok(updated)
    }

    /// Update the content of an event under review
    ///
    /// Permitted only while the event is `pending_review`; the edit marks
    /// `comfort_pro_edited` when a human actor made it.
    pub async fn edit_content(
        &self,
        event_id: i64,
        content: &str,
        actor: Actor,
    ) -> StateMachineResult<FollowUpEvent> {
        if content.trim().is_empty() {
            return Err(StateMachineError::EmptyContent);
        }

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(StateMachineError::EventNotFound(event_id))?;
        if !event.status.is_editable() {
            return Err(StateMachineError::InvalidState {
                event_id,
                actual: event.status,
                requirement: "pending_review",
            });
        }

        let updated = self
            .store
            .update_event_content(event_id, content, actor.is_human())
            .await?;

        let _ = self
            .publisher
            .publish(
                events::EVENT_CONTENT_EDITED,
                json!({
                    "event_id": updated.id,
                    "estimate_id": updated.estimate_id,
                    "actor": actor.to_string(),
                }),
            )
            .await;

        Ok(updated)
    }

    /// Park all of an estimate's active events for an estimate-level snooze
    ///
    /// `sent` and `skipped` events are untouched and the step index does not
    /// move; the sequence resumes from the same point later.
    pub async fn snooze_estimate_events(&self, estimate_id: i64) -> StateMachineResult<u64> {
        let count = self
            .store
            .bulk_transition_events(
                estimate_id,
                status_groups::SNOOZABLE_STATES,
                EventState::Snoozed,
                None,
            )
            .await?;

        if count > 0 {
            let _ = self
                .publisher
                .publish(
                    events::EVENTS_SNOOZED,
                    json!({ "estimate_id": estimate_id, "count": count }),
                )
                .await;
        }

        Ok(count)
    }

    /// Guard conditions checked before a transition persists
    fn check_guards(&self, event: &FollowUpEvent, command: &EventCommand) -> StateMachineResult<()> {
        if matches!(command, EventCommand::MarkSent { .. }) && !event.has_content() {
            return Err(StateMachineError::ContentMissing(event.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_sent() -> EventCommand {
        EventCommand::MarkSent {
            external_message_id: Some("prov-1".to_string()),
        }
    }

    #[test]
    fn test_active_states_accept_send_skip_snooze() {
        for from in [EventState::PendingReview, EventState::Scheduled] {
            assert_eq!(
                determine_target_state(from, &mark_sent()).unwrap(),
                EventState::Sent
            );
            assert_eq!(
                determine_target_state(from, &EventCommand::skip_silent()).unwrap(),
                EventState::Skipped
            );
            assert_eq!(
                determine_target_state(from, &EventCommand::Snooze).unwrap(),
                EventState::Snoozed
            );
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for from in [EventState::Sent, EventState::Skipped] {
            for command in [
                mark_sent(),
                EventCommand::skip_silent(),
                EventCommand::Snooze,
                EventCommand::Resume { as_scheduled: true },
            ] {
                assert!(determine_target_state(from, &command).is_err());
            }
        }
    }

    #[test]
    fn test_snoozed_resumes_or_skips_only() {
        assert_eq!(
            determine_target_state(
                EventState::Snoozed,
                &EventCommand::Resume { as_scheduled: false }
            )
            .unwrap(),
            EventState::PendingReview
        );
        assert_eq!(
            determine_target_state(
                EventState::Snoozed,
                &EventCommand::Resume { as_scheduled: true }
            )
            .unwrap(),
            EventState::Scheduled
        );
        assert_eq!(
            determine_target_state(EventState::Snoozed, &EventCommand::skip_silent()).unwrap(),
            EventState::Skipped
        );
        assert!(determine_target_state(EventState::Snoozed, &mark_sent()).is_err());
        assert!(determine_target_state(EventState::Snoozed, &EventCommand::Snooze).is_err());
    }

    #[test]
    fn test_resume_rejected_from_active_states() {
        for from in [EventState::PendingReview, EventState::Scheduled] {
            assert!(determine_target_state(
                from,
                &EventCommand::Resume { as_scheduled: false }
            )
            .is_err());
        }
    }
}
