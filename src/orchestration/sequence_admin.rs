//! # Sequence Administration
//!
//! Create sequences, replace step lists wholesale, and toggle activation.
//!
//! Replacing steps while estimates are mid-sequence silently changes what
//! their current index means, so every replacement bumps the sequence
//! revision and logs how many in-flight estimates are still pinned to the
//! prior one. The materializer warns per estimate when it observes the drift.

use std::sync::Arc;

use serde_json::json;

use crate::constants::events;
use crate::events::EventPublisher;
use crate::identity::Actor;
use crate::models::{NewSequence, Sequence, SequenceStep};
use crate::storage::{SequencerStore, StorageError};

/// Administrative operations on sequence definitions
pub struct SequenceAdmin<S> {
    store: Arc<S>,
    publisher: EventPublisher,
}

impl<S: SequencerStore> SequenceAdmin<S> {
    pub fn new(store: Arc<S>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Create a new active sequence
    pub async fn create_sequence(
        &self,
        name: impl Into<String>,
        steps: Vec<SequenceStep>,
        actor: Actor,
    ) -> Result<Sequence, SequenceAdminError> {
        SequenceStep::validate_list(&steps).map_err(SequenceAdminError::InvalidSteps)?;

        let sequence = self
            .store
            .insert_sequence(NewSequence {
                name: name.into(),
                is_active: true,
                steps,
            })
            .await?;

        tracing::info!(
            sequence_id = sequence.id,
            name = %sequence.name,
            step_count = sequence.len(),
            actor = %actor,
            "Sequence created"
        );
        Ok(sequence)
    }

    /// Replace a sequence's step list wholesale
    ///
    /// Indices already consumed by in-flight estimates are not renumbered;
    /// the revision bump makes the change observable downstream.
    pub async fn replace_steps(
        &self,
        sequence_id: i64,
        steps: Vec<SequenceStep>,
        actor: Actor,
    ) -> Result<Sequence, SequenceAdminError> {
        SequenceStep::validate_list(&steps).map_err(SequenceAdminError::InvalidSteps)?;

        let in_flight = self.store.count_estimates_in_flight(sequence_id).await?;
        let sequence = self
            .store
            .replace_sequence_steps(sequence_id, steps)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => SequenceAdminError::SequenceNotFound(sequence_id),
                other => SequenceAdminError::Storage(other),
            })?;

        if in_flight > 0 {
            tracing::warn!(
                sequence_id,
                in_flight,
                revision = sequence.revision,
                "Replaced steps with estimates mid-sequence; their current step meaning may shift"
            );
        }

        let _ = self
            .publisher
            .publish(
                events::SEQUENCE_STEPS_REPLACED,
                json!({
                    "sequence_id": sequence_id,
                    "revision": sequence.revision,
                    "step_count": sequence.len(),
                    "in_flight_estimates": in_flight,
                    "actor": actor.to_string(),
                }),
            )
            .await;

        Ok(sequence)
    }

    /// Toggle whether the materializer produces events for this sequence
    pub async fn set_active(
        &self,
        sequence_id: i64,
        is_active: bool,
        actor: Actor,
    ) -> Result<Sequence, SequenceAdminError> {
        let sequence = self
            .store
            .set_sequence_active(sequence_id, is_active)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => SequenceAdminError::SequenceNotFound(sequence_id),
                other => SequenceAdminError::Storage(other),
            })?;

        tracing::info!(
            sequence_id,
            is_active,
            actor = %actor,
            "Sequence activation toggled"
        );
        Ok(sequence)
    }
}

/// Errors raised by sequence administration
#[derive(Debug, thiserror::Error)]
pub enum SequenceAdminError {
    #[error("Sequence not found: {0}")]
    SequenceNotFound(i64),

    #[error("Invalid step list: {0}")]
    InvalidSteps(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
