//! # Sequence Engine
//!
//! Composition root and facade for the follow-up sequencer.
//!
//! ## Overview
//!
//! The engine wires the store, dispatch adapter, content generator, and
//! lifecycle publisher into the three core components (materializer, event
//! state machine, progression controller) and exposes the operations the
//! surrounding web layer calls:
//!
//! - the scheduler poll path: [`SequenceEngine::materialize_next_step`]
//! - the reviewer path: [`SequenceEngine::edit_event_content`],
//!   [`SequenceEngine::send_event`], [`SequenceEngine::complete_call_task`],
//!   [`SequenceEngine::skip_current_step`]
//! - the estimate path: [`SequenceEngine::set_estimate_status`],
//!   [`SequenceEngine::snooze_estimate`]
//! - sequence administration: [`SequenceEngine::create_sequence`],
//!   [`SequenceEngine::replace_sequence_steps`],
//!   [`SequenceEngine::set_sequence_active`]
//!
//! Every operation runs to completion before returning; there are no
//! background tasks. Callers are expected to serialize operations per
//! estimate; the compare-and-set guards underneath turn violations of that
//! expectation into typed conflicts.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use crate::config::SequencerConfig;
use crate::dispatch::{
    BoundedDispatcher, ContentGenerator, DispatchAdapter, DispatchError,
};
use crate::events::{EventPublisher, PublishedEvent};
use crate::identity::Actor;
use crate::models::{Estimate, FollowUpEvent, NewEstimate, Sequence, SequenceStep};
use crate::state_machine::errors::StateMachineError;
use crate::state_machine::events::EventCommand;
use crate::state_machine::EventStateMachine;
use crate::state_machine::states::EstimateStatus;
use crate::storage::{SequencerStore, StorageError};

use super::event_materializer::{EventMaterializer, MaterializeError};
use super::progression_controller::{
    ProgressionController, ProgressionError, SkipResult, SnoozeResult, StatusChangeResult,
};
use super::sequence_admin::{SequenceAdmin, SequenceAdminError};

/// Facade over the follow-up sequencer core
pub struct SequenceEngine<S> {
    store: Arc<S>,
    publisher: EventPublisher,
    dispatcher: BoundedDispatcher,
    materializer: EventMaterializer<S>,
    state_machine: EventStateMachine<S>,
    controller: ProgressionController<S>,
    admin: SequenceAdmin<S>,
}

impl<S: SequencerStore> SequenceEngine<S> {
    /// Wire up an engine from its collaborators and configuration
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<dyn DispatchAdapter>,
        content_generator: Arc<dyn ContentGenerator>,
        config: &SequencerConfig,
    ) -> Self {
        let publisher = EventPublisher::new(config.event_channel_capacity);
        let dispatcher = BoundedDispatcher::new(dispatcher, config.dispatch_timeout());
        let state_machine = EventStateMachine::new(store.clone(), publisher.clone());
        let materializer = EventMaterializer::new(
            store.clone(),
            content_generator,
            publisher.clone(),
            config.require_content_review,
        );
        let controller = ProgressionController::new(
            store.clone(),
            dispatcher.clone(),
            state_machine.clone(),
            publisher.clone(),
            config.require_content_review,
        );
        let admin = SequenceAdmin::new(store.clone(), publisher.clone());

        Self {
            store,
            publisher,
            dispatcher,
            materializer,
            state_machine,
            controller,
            admin,
        }
    }

    // --- scheduler path ---

    /// Materialize the next due step for an estimate, idempotently
    pub async fn materialize_next_step(
        &self,
        estimate_id: i64,
    ) -> Result<Option<FollowUpEvent>, EngineError> {
        Ok(self.materializer.materialize_next_step(estimate_id).await?)
    }

    /// Clock-injected materialization, for deterministic schedulers and tests
    pub async fn materialize_at(
        &self,
        estimate_id: i64,
        now: NaiveDateTime,
    ) -> Result<Option<FollowUpEvent>, EngineError> {
        Ok(self.materializer.materialize_at(estimate_id, now).await?)
    }

    // --- reviewer path ---

    /// Edit the content of an event under review
    pub async fn edit_event_content(
        &self,
        event_id: i64,
        content: &str,
        actor: Actor,
    ) -> Result<FollowUpEvent, EngineError> {
        Ok(self.state_machine.edit_content(event_id, content, actor).await?)
    }

    /// Dispatch an automated event and mark it sent
    ///
    /// Dispatch must succeed before any state changes; a provider failure or
    /// timeout leaves the event untouched and retryable. On success the event
    /// is marked sent and the estimate advances one step, guarded against
    /// double-advance from concurrent retries.
    pub async fn send_event(
        &self,
        event_id: i64,
        actor: Actor,
    ) -> Result<FollowUpEvent, EngineError> {
        let event = self.require_event(event_id).await?;

        if !event.status.is_active() {
            return Err(StateMachineError::InvalidState {
                event_id,
                actual: event.status,
                requirement: "pending_review or scheduled",
            }
            .into());
        }
        if !event.has_content() {
            return Err(StateMachineError::ContentMissing(event_id).into());
        }
        if !event.channel.is_automated() {
            return Err(EngineError::Dispatch(DispatchError::ChannelUnsupported(
                event.channel,
            )));
        }

        let message_id = self.dispatcher.send(&event).await?;

        let sent = self
            .state_machine
            .apply(
                event_id,
                EventCommand::MarkSent {
                    external_message_id: Some(message_id.0),
                },
            )
            .await?;
        self.controller.advance_for_event(&sent).await?;

        tracing::info!(
            event_id,
            estimate_id = sent.estimate_id,
            channel = %sent.channel,
            actor = %actor,
            "Follow-up event dispatched"
        );
        Ok(sent)
    }

    /// Mark a call task completed, advancing the estimate one step
    ///
    /// Call tasks never touch the dispatch adapter; the comfort pro makes the
    /// call and records the result here. Content (the call notes or script)
    /// is still required before completion.
    pub async fn complete_call_task(
        &self,
        event_id: i64,
        actor: Actor,
    ) -> Result<FollowUpEvent, EngineError> {
        let event = self.require_event(event_id).await?;
        if event.channel.is_automated() {
            return Err(EngineError::NotACallTask(event_id));
        }

        let completed = self
            .state_machine
            .apply(
                event_id,
                EventCommand::MarkSent {
                    external_message_id: None,
                },
            )
            .await?;
        self.controller.advance_for_event(&completed).await?;

        tracing::info!(
            event_id,
            estimate_id = completed.estimate_id,
            actor = %actor,
            "Call task completed"
        );
        Ok(completed)
    }

    /// Skip exactly one step for an estimate
    pub async fn skip_current_step(
        &self,
        estimate_id: i64,
        note: Option<String>,
        actor: Actor,
    ) -> Result<SkipResult, EngineError> {
        Ok(self
            .controller
            .skip_current_step(estimate_id, note, actor)
            .await?)
    }

    // --- estimate path ---

    /// Set an estimate to `active`, `won`, or `lost`, with outcome cascades
    pub async fn set_estimate_status(
        &self,
        estimate_id: i64,
        status: EstimateStatus,
        actor: Actor,
    ) -> Result<StatusChangeResult, EngineError> {
        Ok(self.controller.set_status(estimate_id, status, actor).await?)
    }

    /// Snooze an estimate until a timestamp, with a required note
    pub async fn snooze_estimate(
        &self,
        estimate_id: i64,
        until: NaiveDateTime,
        note: &str,
        actor: Actor,
    ) -> Result<SnoozeResult, EngineError> {
        Ok(self.controller.snooze(estimate_id, until, note, actor).await?)
    }

    /// Advance the step index by one (no-op once complete)
    pub async fn advance_step(&self, estimate_id: i64) -> Result<Estimate, EngineError> {
        Ok(self.controller.advance_step(estimate_id).await?)
    }

    /// Create an estimate, pinning the sequence revision at assignment
    pub async fn create_estimate(
        &self,
        customer_name: impl Into<String>,
        external_job_id: Option<String>,
        sequence_id: Option<i64>,
        actor: Actor,
    ) -> Result<Estimate, EngineError> {
        let (sequence_revision, sequence_assigned_at) = match sequence_id {
            Some(id) => {
                let sequence = self
                    .store
                    .get_sequence(id)
                    .await?
                    .ok_or(SequenceAdminError::SequenceNotFound(id))?;
                (Some(sequence.revision), Some(Utc::now().naive_utc()))
            }
            None => (None, None),
        };

        let estimate = self
            .store
            .insert_estimate(NewEstimate {
                external_job_id,
                customer_name: customer_name.into(),
                sequence_id,
                sequence_revision,
                sequence_assigned_at,
            })
            .await?;

        tracing::info!(
            estimate_id = estimate.id,
            sequence_id,
            actor = %actor,
            "Estimate created"
        );
        Ok(estimate)
    }

    // --- sequence administration ---

    pub async fn create_sequence(
        &self,
        name: impl Into<String>,
        steps: Vec<SequenceStep>,
        actor: Actor,
    ) -> Result<Sequence, EngineError> {
        Ok(self.admin.create_sequence(name, steps, actor).await?)
    }

    pub async fn replace_sequence_steps(
        &self,
        sequence_id: i64,
        steps: Vec<SequenceStep>,
        actor: Actor,
    ) -> Result<Sequence, EngineError> {
        Ok(self.admin.replace_steps(sequence_id, steps, actor).await?)
    }

    pub async fn set_sequence_active(
        &self,
        sequence_id: i64,
        is_active: bool,
        actor: Actor,
    ) -> Result<Sequence, EngineError> {
        Ok(self.admin.set_active(sequence_id, is_active, actor).await?)
    }

    // --- read access ---

    pub async fn get_estimate(&self, estimate_id: i64) -> Result<Option<Estimate>, EngineError> {
        Ok(self.store.get_estimate(estimate_id).await?)
    }

    pub async fn find_estimate_by_external_job(
        &self,
        external_job_id: &str,
    ) -> Result<Option<Estimate>, EngineError> {
        Ok(self
            .store
            .find_estimate_by_external_job(external_job_id)
            .await?)
    }

    pub async fn list_events(
        &self,
        estimate_id: i64,
    ) -> Result<Vec<FollowUpEvent>, EngineError> {
        Ok(self.store.list_events(estimate_id).await?)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// The underlying store, for collaborators that need direct reads
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn require_event(&self, event_id: i64) -> Result<FollowUpEvent, EngineError> {
        Ok(self
            .store
            .get_event(event_id)
            .await?
            .ok_or(StateMachineError::EventNotFound(event_id))?)
    }
}

/// Errors surfaced by the engine facade
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Event {0} is on an automated channel; use send_event")]
    NotACallTask(i64),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error(transparent)]
    Admin(#[from] SequenceAdminError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
