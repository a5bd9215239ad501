//! # Estimate Progression Controller
//!
//! Owns every transition of an estimate's status and the cascading effects on
//! its follow-up events and options.
//!
//! ## Overview
//!
//! The controller is where outcome changes (won/lost), snoozes, reactivation,
//! and step advancement live. Event-level mechanics are delegated to the
//! [`EventStateMachine`]; the controller sequences them and owns the
//! partial-failure policy: external declines are attempted before the local
//! status mutation is finalized for a lost estimate, but an unreachable
//! provider never blocks local consistency. The local state always reflects
//! the contractor's view.
//!
//! ## Advancement guarantees
//!
//! `sequence_step_index` moves forward by exactly one per completed or skipped
//! step, never backwards, and never past the step count. Advances are
//! persisted as a compare-and-set on the previous index, so two concurrent
//! dispatch retries cannot both advance.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;

use crate::constants::{events, status_groups, system_notes};
use crate::dispatch::{BoundedDispatcher, DispatchAdapter};
use crate::events::EventPublisher;
use crate::identity::Actor;
use crate::models::{Estimate, FollowUpEvent, NewFollowUpEvent};
use crate::state_machine::errors::StateMachineError;
use crate::state_machine::events::EventCommand;
use crate::state_machine::states::{EstimateStatus, EventState};
use crate::state_machine::EventStateMachine;
use crate::storage::{SequencerStore, StorageError};

/// Result of an estimate status change
#[derive(Debug, Clone)]
pub struct StatusChangeResult {
    pub estimate: Estimate,
    /// Events bulk-transitioned to `skipped` by outcome reconciliation
    pub events_skipped: u64,
    /// Snoozed events re-entered on reactivation
    pub events_resumed: u64,
    /// Options locally declined by the lost path
    pub options_declined: u64,
    /// Error text of a failed external decline, absorbed per policy
    pub decline_failure: Option<String>,
}

/// Result of snoozing an estimate
#[derive(Debug, Clone)]
pub struct SnoozeResult {
    pub estimate: Estimate,
    pub events_snoozed: u64,
}

/// Result of skipping the current step
#[derive(Debug, Clone)]
pub struct SkipResult {
    pub estimate: Estimate,
    pub event: FollowUpEvent,
}

/// Controls estimate status transitions and step advancement
pub struct ProgressionController<S> {
    store: Arc<S>,
    dispatcher: BoundedDispatcher,
    state_machine: EventStateMachine<S>,
    publisher: EventPublisher,
    require_content_review: bool,
}

impl<S: SequencerStore> ProgressionController<S> {
    pub fn new(
        store: Arc<S>,
        dispatcher: BoundedDispatcher,
        state_machine: EventStateMachine<S>,
        publisher: EventPublisher,
        require_content_review: bool,
    ) -> Self {
        Self {
            store,
            dispatcher,
            state_machine,
            publisher,
            require_content_review,
        }
    }

    /// Advance the step index by exactly one; no-op once the sequence is
    /// complete
    pub async fn advance_step(&self, estimate_id: i64) -> Result<Estimate, ProgressionError> {
        let estimate = self.require_estimate(estimate_id).await?;

        if let Some(sequence_id) = estimate.sequence_id {
            if let Some(sequence) = self.store.get_sequence(sequence_id).await? {
                if estimate.sequence_complete(sequence.len()) {
                    return Ok(estimate);
                }
            }
        } else {
            // No sequence, nothing to advance through
            return Ok(estimate);
        }

        let advanced = self
            .store
            .advance_step_index(estimate_id, estimate.sequence_step_index)
            .await?;
        if !advanced {
            return Err(ProgressionError::Storage(StorageError::Conflict(format!(
                "estimate {estimate_id} advanced concurrently past index {}",
                estimate.sequence_step_index
            ))));
        }

        let updated = self.require_estimate(estimate_id).await?;
        self.publish_step_advanced(&updated).await;
        Ok(updated)
    }

    /// Advance the step index for a just-completed event
    ///
    /// The advance happens only when the estimate's pointer still equals the
    /// step the event represents, which keeps a concurrent dispatch retry
    /// from advancing twice. Returns whether an advance occurred.
    pub async fn advance_for_event(
        &self,
        event: &FollowUpEvent,
    ) -> Result<bool, ProgressionError> {
        let estimate = self.require_estimate(event.estimate_id).await?;
        if estimate.sequence_step_index != event.sequence_step_index {
            tracing::debug!(
                estimate_id = estimate.id,
                event_id = event.id,
                current_index = estimate.sequence_step_index,
                event_index = event.sequence_step_index,
                "Step index already moved past this event; not advancing"
            );
            return Ok(false);
        }

        let advanced = self
            .store
            .advance_step_index(event.estimate_id, event.sequence_step_index)
            .await?;
        if advanced {
            let updated = self.require_estimate(event.estimate_id).await?;
            self.publish_step_advanced(&updated).await;
        }
        Ok(advanced)
    }

    /// Set the estimate status to `active`, `won`, or `lost`
    ///
    /// Outcomes reconcile outstanding work: `lost` declines pending options
    /// (externally best-effort, locally always) and both outcomes bulk-skip
    /// every event still in an active or snoozed state. Reactivation from a
    /// snooze re-enters the parked events; reactivation from an outcome
    /// regenerates nothing and lets the next materializer pass resume.
    pub async fn set_status(
        &self,
        estimate_id: i64,
        new_status: EstimateStatus,
        actor: Actor,
    ) -> Result<StatusChangeResult, ProgressionError> {
        let estimate = self.require_estimate(estimate_id).await?;

        match new_status {
            EstimateStatus::Won | EstimateStatus::Lost => {
                self.apply_outcome(estimate, new_status, actor).await
            }
            EstimateStatus::Active => self.reactivate(estimate, actor).await,
            EstimateStatus::Snoozed => Err(ProgressionError::InvalidStatusChange {
                estimate_id,
                from: estimate.status,
                to: new_status,
            }),
        }
    }

    /// Snooze the estimate until a timestamp, with a required note
    ///
    /// Active events are parked as `snoozed`; the step index does not move,
    /// so the sequence resumes from the same point on reactivation.
    pub async fn snooze(
        &self,
        estimate_id: i64,
        until: NaiveDateTime,
        note: &str,
        actor: Actor,
    ) -> Result<SnoozeResult, ProgressionError> {
        if note.trim().is_empty() {
            return Err(ProgressionError::SnoozeDetailsRequired);
        }

        let estimate = self.require_estimate(estimate_id).await?;
        if estimate.status.is_outcome() {
            return Err(ProgressionError::InvalidStatusChange {
                estimate_id,
                from: estimate.status,
                to: EstimateStatus::Snoozed,
            });
        }

        let updated = self
            .store
            .set_estimate_snooze(estimate_id, until, note)
            .await?;
        let events_snoozed = self.state_machine.snooze_estimate_events(estimate_id).await?;

        let _ = self
            .publisher
            .publish(
                events::ESTIMATE_SNOOZED,
                json!({
                    "estimate_id": estimate_id,
                    "until": until,
                    "events_snoozed": events_snoozed,
                    "actor": actor.to_string(),
                }),
            )
            .await;
        tracing::info!(
            estimate_id,
            events_snoozed,
            actor = %actor,
            "Estimate snoozed"
        );

        Ok(SnoozeResult {
            estimate: updated,
            events_snoozed,
        })
    }

    /// Skip the current step: transition its active event in place, or insert
    /// a skipped event when none was ever materialized, then advance
    pub async fn skip_current_step(
        &self,
        estimate_id: i64,
        note: Option<String>,
        actor: Actor,
    ) -> Result<SkipResult, ProgressionError> {
        let estimate = self.require_estimate(estimate_id).await?;
        if estimate.status != EstimateStatus::Active {
            return Err(ProgressionError::EstimateNotActive {
                estimate_id,
                status: estimate.status,
            });
        }

        let sequence_id = estimate
            .sequence_id
            .ok_or(ProgressionError::NoSequenceAssigned(estimate_id))?;
        let sequence = self
            .store
            .get_sequence(sequence_id)
            .await?
            .ok_or(ProgressionError::NoSequenceAssigned(estimate_id))?;
        if estimate.sequence_complete(sequence.len()) {
            return Err(ProgressionError::SequenceComplete(estimate_id));
        }

        let step_index = estimate.sequence_step_index;
        let event = match self.store.find_active_event(estimate_id, step_index).await? {
            Some(active) => {
                let command = match note {
                    Some(note) => EventCommand::skip_with_note(note),
                    None => EventCommand::skip_silent(),
                };
                self.state_machine.apply(active.id, command).await?
            }
            None => {
                // Nothing was materialized for this step; record the skip
                // directly so the audit trail stays complete
                let step = sequence.step_at(step_index).copied().ok_or(
                    ProgressionError::SequenceComplete(estimate_id),
                )?;
                let inserted = self
                    .store
                    .insert_event(NewFollowUpEvent {
                        estimate_id,
                        sequence_step_index: step_index,
                        channel: step.channel,
                        status: EventState::Skipped,
                        content: None,
                        note: Some(
                            note.unwrap_or_else(|| {
                                system_notes::SKIPPED_UNMATERIALIZED.to_string()
                            }),
                        ),
                    })
                    .await?
                    .into_event();
                let _ = self
                    .publisher
                    .publish(
                        events::EVENT_SKIPPED,
                        json!({
                            "event_id": inserted.id,
                            "estimate_id": estimate_id,
                            "sequence_step_index": step_index,
                            "materialized": false,
                        }),
                    )
                    .await;
                inserted
            }
        };

        let advanced = self.store.advance_step_index(estimate_id, step_index).await?;
        if !advanced {
            return Err(ProgressionError::Storage(StorageError::Conflict(format!(
                "estimate {estimate_id} advanced concurrently during skip of step {step_index}"
            ))));
        }
        let updated = self.require_estimate(estimate_id).await?;
        self.publish_step_advanced(&updated).await;

        tracing::info!(
            estimate_id,
            step_index,
            event_id = event.id,
            actor = %actor,
            "Follow-up step skipped"
        );

        Ok(SkipResult {
            estimate: updated,
            event,
        })
    }

    // --- internals ---

    async fn apply_outcome(
        &self,
        estimate: Estimate,
        outcome: EstimateStatus,
        actor: Actor,
    ) -> Result<StatusChangeResult, ProgressionError> {
        let estimate_id = estimate.id;
        let mut options_declined = 0u64;
        let mut decline_failure = None;

        if outcome == EstimateStatus::Lost {
            let pending = self.store.list_pending_options(estimate_id).await?;
            if !pending.is_empty() {
                let external_ids: Vec<String> = pending
                    .iter()
                    .map(|o| o.external_option_id.clone())
                    .collect();
                // Best-effort: the contractor's view must not depend on the
                // external platform being reachable
                if let Err(e) = self.dispatcher.decline_options(&external_ids).await {
                    tracing::warn!(
                        estimate_id,
                        error = %e,
                        option_count = external_ids.len(),
                        "External option decline failed; declining locally anyway"
                    );
                    decline_failure = Some(e.to_string());
                }

                let ids: Vec<i64> = pending.iter().map(|o| o.id).collect();
                options_declined = self.store.decline_options(&ids).await?;
                let _ = self
                    .publisher
                    .publish(
                        events::OPTIONS_DECLINED,
                        json!({
                            "estimate_id": estimate_id,
                            "count": options_declined,
                            "external_decline_failed": decline_failure.is_some(),
                        }),
                    )
                    .await;
            }
        }

        let updated = self.store.set_estimate_status(estimate_id, outcome).await?;

        let events_skipped = self
            .store
            .bulk_transition_events(
                estimate_id,
                status_groups::OUTCOME_RECONCILED_STATES,
                EventState::Skipped,
                Some(system_notes::OUTCOME_RECONCILED),
            )
            .await?;

        self.publish_status_changed(&estimate, &updated, actor).await;
        tracing::info!(
            estimate_id,
            outcome = %outcome,
            events_skipped,
            options_declined,
            "Estimate outcome applied"
        );

        Ok(StatusChangeResult {
            estimate: updated,
            events_skipped,
            events_resumed: 0,
            options_declined,
            decline_failure,
        })
    }

    async fn reactivate(
        &self,
        estimate: Estimate,
        actor: Actor,
    ) -> Result<StatusChangeResult, ProgressionError> {
        let estimate_id = estimate.id;
        let was_snoozed = estimate.status == EstimateStatus::Snoozed;

        let updated = self
            .store
            .set_estimate_status(estimate_id, EstimateStatus::Active)
            .await?;

        // Only a snooze leaves parked events behind; outcome reversal lets
        // the next materializer pass resume from the current index instead
        let mut events_resumed = 0u64;
        if was_snoozed {
            let parked = self
                .store
                .list_events_in_states(estimate_id, &[EventState::Snoozed])
                .await?;
            for event in parked {
                let as_scheduled = event.channel.is_automated()
                    && event.has_content()
                    && !self.require_content_review;
                self.state_machine
                    .apply(event.id, EventCommand::Resume { as_scheduled })
                    .await?;
                events_resumed += 1;
            }
        }

        self.publish_status_changed(&estimate, &updated, actor).await;
        tracing::info!(estimate_id, events_resumed, "Estimate reactivated");

        Ok(StatusChangeResult {
            estimate: updated,
            events_skipped: 0,
            events_resumed,
            options_declined: 0,
            decline_failure: None,
        })
    }

    async fn require_estimate(&self, estimate_id: i64) -> Result<Estimate, ProgressionError> {
        self.store
            .get_estimate(estimate_id)
            .await?
            .ok_or(ProgressionError::EstimateNotFound(estimate_id))
    }

    async fn publish_step_advanced(&self, estimate: &Estimate) {
        let _ = self
            .publisher
            .publish(
                events::ESTIMATE_STEP_ADVANCED,
                json!({
                    "estimate_id": estimate.id,
                    "sequence_step_index": estimate.sequence_step_index,
                }),
            )
            .await;
    }

    async fn publish_status_changed(&self, before: &Estimate, after: &Estimate, actor: Actor) {
        let _ = self
            .publisher
            .publish(
                events::ESTIMATE_STATUS_CHANGED,
                json!({
                    "estimate_id": after.id,
                    "from": before.status,
                    "to": after.status,
                    "actor": actor.to_string(),
                }),
            )
            .await;
    }
}

/// Errors that can occur during estimate progression
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    #[error("Estimate not found: {0}")]
    EstimateNotFound(i64),

    #[error("Estimate {estimate_id} cannot change from {from} to {to}")]
    InvalidStatusChange {
        estimate_id: i64,
        from: EstimateStatus,
        to: EstimateStatus,
    },

    #[error("Estimate {estimate_id} is {status}; operation requires an active estimate")]
    EstimateNotActive {
        estimate_id: i64,
        status: EstimateStatus,
    },

    #[error("Snoozing requires both a wake-up time and a note")]
    SnoozeDetailsRequired,

    #[error("Estimate {0} has no usable sequence assigned")]
    NoSequenceAssigned(i64),

    #[error("Estimate {0} has consumed all of its sequence steps")]
    SequenceComplete(i64),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
