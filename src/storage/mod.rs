//! # Storage Layer
//!
//! Persistence boundary for the follow-up sequencer.
//!
//! ## Overview
//!
//! All core components talk to a [`SequencerStore`] rather than a concrete
//! database, so the engine runs identically against Postgres
//! ([`postgres::PgStore`]) and the in-memory store ([`memory::MemoryStore`])
//! used by tests and single-process embeds.
//!
//! ## Concurrency discipline
//!
//! The sequencer has no locks of its own; callers serialize per estimate and
//! the store turns violated assumptions into typed conflicts:
//!
//! - [`SequencerStore::advance_step_index`] is a compare-and-set on the
//!   previous index, so two concurrent dispatch retries cannot both advance.
//! - [`SequencerStore::transition_event`] is a compare-and-set on the expected
//!   current state, so a concurrent writer surfaces as
//!   [`StorageError::Conflict`] instead of a lost update.
//! - [`SequencerStore::insert_event`] refuses to create a second active event
//!   for the same `(estimate_id, sequence_step_index)` slot and reports the
//!   existing row instead, which is what keeps concurrent materializer polls
//!   idempotent.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::models::{
    Estimate, EstimateOption, FollowUpEvent, NewEstimate, NewEstimateOption, NewFollowUpEvent,
    NewSequence, Sequence, SequenceStep,
};
use crate::state_machine::states::{EstimateStatus, EventState};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors raised at the persistence boundary
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Malformed step list for sequence {sequence_id}: {reason}")]
    MalformedSteps { sequence_id: i64, reason: String },

    #[error("Invalid row state: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a conditional event insert
///
/// `ExistingActive` means another event already occupies the active slot for
/// that `(estimate_id, sequence_step_index)`; the caller treats the insert as
/// an idempotent re-invocation, not a failure.
#[derive(Debug, Clone)]
pub enum EventInsert {
    Created(FollowUpEvent),
    ExistingActive(FollowUpEvent),
}

impl EventInsert {
    /// The row that now occupies the slot, created or pre-existing
    pub fn into_event(self) -> FollowUpEvent {
        match self {
            Self::Created(event) | Self::ExistingActive(event) => event,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Field stamps applied atomically with an event state transition
#[derive(Debug, Clone, Default)]
pub struct TransitionStamp {
    pub sent_at: Option<NaiveDateTime>,
    pub external_message_id: Option<String>,
    pub note: Option<String>,
}

impl TransitionStamp {
    /// Stamp for a completed touchpoint
    pub fn sent(sent_at: NaiveDateTime, external_message_id: Option<String>) -> Self {
        Self {
            sent_at: Some(sent_at),
            external_message_id,
            note: None,
        }
    }

    /// Stamp carrying a skip or snooze annotation
    pub fn noted(note: impl Into<String>) -> Self {
        Self {
            sent_at: None,
            external_message_id: None,
            note: Some(note.into()),
        }
    }
}

/// Persistence operations the sequencer core depends on
#[async_trait]
pub trait SequencerStore: Send + Sync {
    // --- sequences ---

    async fn insert_sequence(&self, sequence: NewSequence) -> StorageResult<Sequence>;

    async fn get_sequence(&self, id: i64) -> StorageResult<Option<Sequence>>;

    /// Replace a sequence's step list wholesale, bumping its revision
    async fn replace_sequence_steps(
        &self,
        id: i64,
        steps: Vec<SequenceStep>,
    ) -> StorageResult<Sequence>;

    async fn set_sequence_active(&self, id: i64, is_active: bool) -> StorageResult<Sequence>;

    /// Count active or snoozed estimates still working through a sequence
    async fn count_estimates_in_flight(&self, sequence_id: i64) -> StorageResult<u64>;

    // --- estimates ---

    async fn insert_estimate(&self, estimate: NewEstimate) -> StorageResult<Estimate>;

    async fn get_estimate(&self, id: i64) -> StorageResult<Option<Estimate>>;

    async fn find_estimate_by_external_job(
        &self,
        external_job_id: &str,
    ) -> StorageResult<Option<Estimate>>;

    /// Set the estimate status; snooze fields are cleared whenever the new
    /// status is not `Snoozed`
    async fn set_estimate_status(
        &self,
        id: i64,
        status: EstimateStatus,
    ) -> StorageResult<Estimate>;

    /// Set status to `Snoozed` and store the snooze window and note
    async fn set_estimate_snooze(
        &self,
        id: i64,
        until: NaiveDateTime,
        note: &str,
    ) -> StorageResult<Estimate>;

    /// Compare-and-set advance of the step index by exactly one
    ///
    /// Returns `false` when the stored index no longer equals
    /// `expected_current`, which callers treat as "another writer advanced
    /// first".
    async fn advance_step_index(&self, id: i64, expected_current: i32) -> StorageResult<bool>;

    // --- follow-up events ---

    /// Insert an event, refusing to duplicate an active slot
    ///
    /// When `event.status` is active and an active event already exists for
    /// the same `(estimate_id, sequence_step_index)`, no row is inserted and
    /// the existing one is returned. Terminal-state inserts (direct skips)
    /// bypass the check.
    async fn insert_event(&self, event: NewFollowUpEvent) -> StorageResult<EventInsert>;

    async fn get_event(&self, id: i64) -> StorageResult<Option<FollowUpEvent>>;

    async fn find_active_event(
        &self,
        estimate_id: i64,
        step_index: i32,
    ) -> StorageResult<Option<FollowUpEvent>>;

    async fn list_events(&self, estimate_id: i64) -> StorageResult<Vec<FollowUpEvent>>;

    async fn list_events_in_states(
        &self,
        estimate_id: i64,
        states: &[EventState],
    ) -> StorageResult<Vec<FollowUpEvent>>;

    /// Update content on a `pending_review` event, marking the edit
    ///
    /// The state condition is applied in the same write; a row that left
    /// `pending_review` concurrently surfaces as [`StorageError::Conflict`].
    async fn update_event_content(
        &self,
        id: i64,
        content: &str,
        comfort_pro_edited: bool,
    ) -> StorageResult<FollowUpEvent>;

    /// Compare-and-set state transition with field stamps
    async fn transition_event(
        &self,
        id: i64,
        from: EventState,
        to: EventState,
        stamp: TransitionStamp,
    ) -> StorageResult<FollowUpEvent>;

    /// Transition every event of an estimate currently in one of `from` to
    /// `to`, returning the number of rows touched
    async fn bulk_transition_events(
        &self,
        estimate_id: i64,
        from: &[EventState],
        to: EventState,
        note: Option<&str>,
    ) -> StorageResult<u64>;

    // --- estimate options ---

    async fn insert_option(&self, option: NewEstimateOption) -> StorageResult<EstimateOption>;

    async fn list_pending_options(&self, estimate_id: i64) -> StorageResult<Vec<EstimateOption>>;

    /// Locally decline the given options, returning the number transitioned
    async fn decline_options(&self, ids: &[i64]) -> StorageResult<u64>;
}
