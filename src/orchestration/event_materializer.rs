//! # Event Materializer
//!
//! Turns "this estimate is due for its next touchpoint" into a concrete
//! `follow_up_event` row, exactly once.
//!
//! ## Overview
//!
//! The external scheduler polls every active estimate through
//! [`EventMaterializer::materialize_next_step`]. The materializer checks the
//! preconditions (active estimate, active sequence, sequence not complete),
//! returns the existing active event when one already occupies the current
//! step slot, gates on the step's day offset, and otherwise inserts exactly
//! one event. Overlapping polls fall through to the storage layer's
//! active-slot uniqueness, so two racing invocations converge on the same row.
//!
//! No event is ever created for a step index beyond the estimate's current
//! pointer.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use serde_json::json;

use crate::constants::events;
use crate::dispatch::ContentGenerator;
use crate::events::EventPublisher;
use crate::models::{FollowUpEvent, NewFollowUpEvent, SequenceStep};
use crate::state_machine::states::{EstimateStatus, EventState};
use crate::storage::{SequencerStore, StorageError};

/// Decide the initial state for a freshly materialized event
///
/// Call tasks always need a human; automated channels go straight to
/// `scheduled` only when content was generated and the deployment does not
/// require review of generated content.
pub(crate) fn initial_event_state(
    step: &SequenceStep,
    has_content: bool,
    require_content_review: bool,
) -> EventState {
    if step.is_call_task || !step.channel.is_automated() {
        EventState::PendingReview
    } else if has_content && !require_content_review {
        EventState::Scheduled
    } else {
        EventState::PendingReview
    }
}

/// Materializes due sequence steps into follow-up events
pub struct EventMaterializer<S> {
    store: Arc<S>,
    content_generator: Arc<dyn ContentGenerator>,
    publisher: EventPublisher,
    require_content_review: bool,
}

impl<S: SequencerStore> EventMaterializer<S> {
    pub fn new(
        store: Arc<S>,
        content_generator: Arc<dyn ContentGenerator>,
        publisher: EventPublisher,
        require_content_review: bool,
    ) -> Self {
        Self {
            store,
            content_generator,
            publisher,
            require_content_review,
        }
    }

    /// Materialize the estimate's next step if it is due
    ///
    /// Returns the active event for the current step (existing or freshly
    /// created), or `None` when the step is not yet due.
    pub async fn materialize_next_step(
        &self,
        estimate_id: i64,
    ) -> Result<Option<FollowUpEvent>, MaterializeError> {
        self.materialize_at(estimate_id, Utc::now().naive_utc())
            .await
    }

    /// Clock-injected variant of [`materialize_next_step`]
    ///
    /// [`materialize_next_step`]: Self::materialize_next_step
    pub async fn materialize_at(
        &self,
        estimate_id: i64,
        now: NaiveDateTime,
    ) -> Result<Option<FollowUpEvent>, MaterializeError> {
        let estimate = self
            .store
            .get_estimate(estimate_id)
            .await?
            .ok_or(MaterializeError::EstimateNotFound(estimate_id))?;

        if !estimate.status.allows_materialization() {
            return Err(MaterializeError::EstimateNotActive {
                estimate_id,
                status: estimate.status,
            });
        }

        let sequence_id = estimate
            .sequence_id
            .ok_or(MaterializeError::NoSequenceAssigned(estimate_id))?;

        let sequence = match self.store.get_sequence(sequence_id).await {
            Ok(Some(sequence)) => sequence,
            Ok(None) => return Err(MaterializeError::NoSequenceAssigned(estimate_id)),
            Err(StorageError::MalformedSteps { reason, .. }) => {
                tracing::warn!(
                    estimate_id,
                    sequence_id,
                    reason = %reason,
                    "Sequence step list failed validation; treating as unassigned"
                );
                return Err(MaterializeError::NoSequenceAssigned(estimate_id));
            }
            Err(e) => return Err(e.into()),
        };

        if !sequence.is_active {
            return Err(MaterializeError::SequenceInactive(sequence_id));
        }

        if estimate.sequence_complete(sequence.len()) {
            return Err(MaterializeError::SequenceComplete {
                estimate_id,
                step_count: sequence.len(),
            });
        }

        if let Some(pinned) = estimate.sequence_revision {
            if pinned != sequence.revision {
                tracing::warn!(
                    estimate_id,
                    sequence_id,
                    pinned_revision = pinned,
                    current_revision = sequence.revision,
                    "Sequence steps were replaced mid-flight; continuing with the current revision"
                );
            }
        }

        let step_index = estimate.sequence_step_index;
        let step = sequence
            .step_at(step_index)
            .copied()
            .ok_or(MaterializeError::SequenceComplete {
                estimate_id,
                step_count: sequence.len(),
            })?;

        // Idempotent re-invocation: the current slot may already be occupied
        if let Some(existing) = self.store.find_active_event(estimate_id, step_index).await? {
            return Ok(Some(existing));
        }

        let due_at = estimate.sequence_epoch() + Duration::days(i64::from(step.day_offset));
        if now < due_at {
            return Ok(None);
        }

        let content = self.content_generator.generate(&estimate, &step).await;
        let status = initial_event_state(&step, content.is_some(), self.require_content_review);

        let inserted = self
            .store
            .insert_event(NewFollowUpEvent {
                estimate_id,
                sequence_step_index: step_index,
                channel: step.channel,
                status,
                content,
                note: None,
            })
            .await?;

        let was_created = inserted.was_created();
        let event = inserted.into_event();

        if was_created {
            let _ = self
                .publisher
                .publish(
                    events::EVENT_MATERIALIZED,
                    json!({
                        "event_id": event.id,
                        "estimate_id": estimate_id,
                        "sequence_step_index": step_index,
                        "channel": event.channel,
                        "status": event.status,
                    }),
                )
                .await;
            tracing::info!(
                estimate_id,
                event_id = event.id,
                step_index,
                channel = %event.channel,
                status = %event.status,
                "Materialized follow-up event"
            );
        }

        Ok(Some(event))
    }
}

/// Errors that can occur during event materialization
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("Estimate not found: {0}")]
    EstimateNotFound(i64),

    #[error("Estimate {estimate_id} is {status}; only active estimates materialize")]
    EstimateNotActive {
        estimate_id: i64,
        status: EstimateStatus,
    },

    #[error("Estimate {0} has no usable sequence assigned")]
    NoSequenceAssigned(i64),

    #[error("Sequence {0} is inactive")]
    SequenceInactive(i64),

    #[error("Estimate {estimate_id} has consumed all {step_count} sequence steps")]
    SequenceComplete {
        estimate_id: i64,
        step_count: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;

    #[test]
    fn test_call_tasks_always_pend_review() {
        let step = SequenceStep::new(5, Channel::Call, true);
        assert_eq!(
            initial_event_state(&step, true, false),
            EventState::PendingReview
        );
        assert_eq!(
            initial_event_state(&step, false, true),
            EventState::PendingReview
        );
    }

    #[test]
    fn test_generated_content_schedules_when_review_not_required() {
        let step = SequenceStep::new(0, Channel::Sms, false);
        assert_eq!(initial_event_state(&step, true, false), EventState::Scheduled);
    }

    #[test]
    fn test_review_requirement_holds_generated_content() {
        let step = SequenceStep::new(0, Channel::Email, false);
        assert_eq!(
            initial_event_state(&step, true, true),
            EventState::PendingReview
        );
    }

    #[test]
    fn test_missing_content_always_pends_review() {
        let step = SequenceStep::new(2, Channel::Sms, false);
        assert_eq!(
            initial_event_state(&step, false, false),
            EventState::PendingReview
        );
    }
}
