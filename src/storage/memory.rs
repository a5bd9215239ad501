//! In-memory [`SequencerStore`] backed by lock-guarded maps.
//!
//! Used by the test suite and by single-process embeds that do not need
//! durability. Every guarantee the Postgres store provides with transactions
//! and its partial unique index is provided here under one mutex, so the two
//! implementations are interchangeable from the core's point of view.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use parking_lot::Mutex;

use crate::models::{
    Estimate, EstimateOption, FollowUpEvent, NewEstimate, NewEstimateOption, NewFollowUpEvent,
    NewSequence, Sequence, SequenceStep,
};
use crate::state_machine::states::{EstimateStatus, EventState, OptionState};

use super::{
    EventInsert, SequencerStore, StorageError, StorageResult, TransitionStamp,
};

#[derive(Default)]
struct Inner {
    sequences: BTreeMap<i64, Sequence>,
    estimates: BTreeMap<i64, Estimate>,
    events: BTreeMap<i64, FollowUpEvent>,
    options: BTreeMap<i64, EstimateOption>,
    next_sequence_id: i64,
    next_estimate_id: i64,
    next_event_id: i64,
    next_option_id: i64,
}

impl Inner {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// Map-backed store with the same conflict semantics as [`super::PgStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[async_trait]
impl SequencerStore for MemoryStore {
    async fn insert_sequence(&self, sequence: NewSequence) -> StorageResult<Sequence> {
        let mut inner = self.inner.lock();
        let id = Inner::next_id(&mut inner.next_sequence_id);
        let ts = now();
        let row = Sequence {
            id,
            name: sequence.name,
            is_active: sequence.is_active,
            revision: 1,
            steps: sequence.steps,
            created_at: ts,
            updated_at: ts,
        };
        inner.sequences.insert(id, row.clone());
        Ok(row)
    }

    async fn get_sequence(&self, id: i64) -> StorageResult<Option<Sequence>> {
        Ok(self.inner.lock().sequences.get(&id).cloned())
    }

    async fn replace_sequence_steps(
        &self,
        id: i64,
        steps: Vec<SequenceStep>,
    ) -> StorageResult<Sequence> {
        let mut inner = self.inner.lock();
        let row = inner
            .sequences
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("sequence", id))?;
        row.steps = steps;
        row.revision += 1;
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn set_sequence_active(&self, id: i64, is_active: bool) -> StorageResult<Sequence> {
        let mut inner = self.inner.lock();
        let row = inner
            .sequences
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("sequence", id))?;
        row.is_active = is_active;
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn count_estimates_in_flight(&self, sequence_id: i64) -> StorageResult<u64> {
        let inner = self.inner.lock();
        let step_count = inner
            .sequences
            .get(&sequence_id)
            .map(|s| s.steps.len() as i32)
            .unwrap_or(0);
        let count = inner
            .estimates
            .values()
            .filter(|e| {
                e.sequence_id == Some(sequence_id)
                    && matches!(e.status, EstimateStatus::Active | EstimateStatus::Snoozed)
                    && e.sequence_step_index < step_count
            })
            .count();
        Ok(count as u64)
    }

    async fn insert_estimate(&self, estimate: NewEstimate) -> StorageResult<Estimate> {
        let mut inner = self.inner.lock();
        let id = Inner::next_id(&mut inner.next_estimate_id);
        let ts = now();
        let row = Estimate {
            id,
            external_job_id: estimate.external_job_id,
            customer_name: estimate.customer_name,
            status: EstimateStatus::Active,
            sequence_id: estimate.sequence_id,
            sequence_revision: estimate.sequence_revision,
            sequence_step_index: 0,
            sequence_assigned_at: estimate.sequence_assigned_at,
            snooze_until: None,
            snooze_note: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.estimates.insert(id, row.clone());
        Ok(row)
    }

    async fn get_estimate(&self, id: i64) -> StorageResult<Option<Estimate>> {
        Ok(self.inner.lock().estimates.get(&id).cloned())
    }

    async fn find_estimate_by_external_job(
        &self,
        external_job_id: &str,
    ) -> StorageResult<Option<Estimate>> {
        Ok(self
            .inner
            .lock()
            .estimates
            .values()
            .find(|e| e.external_job_id.as_deref() == Some(external_job_id))
            .cloned())
    }

    async fn set_estimate_status(
        &self,
        id: i64,
        status: EstimateStatus,
    ) -> StorageResult<Estimate> {
        let mut inner = self.inner.lock();
        let row = inner
            .estimates
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("estimate", id))?;
        row.status = status;
        if status != EstimateStatus::Snoozed {
            row.snooze_until = None;
            row.snooze_note = None;
        }
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn set_estimate_snooze(
        &self,
        id: i64,
        until: NaiveDateTime,
        note: &str,
    ) -> StorageResult<Estimate> {
        let mut inner = self.inner.lock();
        let row = inner
            .estimates
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("estimate", id))?;
        row.status = EstimateStatus::Snoozed;
        row.snooze_until = Some(until);
        row.snooze_note = Some(note.to_string());
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn advance_step_index(&self, id: i64, expected_current: i32) -> StorageResult<bool> {
        let mut inner = self.inner.lock();
        let row = inner
            .estimates
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("estimate", id))?;
        if row.sequence_step_index != expected_current {
            return Ok(false);
        }
        row.sequence_step_index += 1;
        row.updated_at = now();
        Ok(true)
    }

    async fn insert_event(&self, event: NewFollowUpEvent) -> StorageResult<EventInsert> {
        let mut inner = self.inner.lock();
        if event.status.is_active() {
            let existing = inner
                .events
                .values()
                .find(|e| {
                    e.estimate_id == event.estimate_id
                        && e.sequence_step_index == event.sequence_step_index
                        && e.status.is_active()
                })
                .cloned();
            if let Some(existing) = existing {
                return Ok(EventInsert::ExistingActive(existing));
            }
        }
        let id = Inner::next_id(&mut inner.next_event_id);
        let ts = now();
        let row = FollowUpEvent {
            id,
            estimate_id: event.estimate_id,
            sequence_step_index: event.sequence_step_index,
            channel: event.channel,
            status: event.status,
            content: event.content,
            sent_at: None,
            external_message_id: None,
            comfort_pro_edited: false,
            note: event.note,
            created_at: ts,
            updated_at: ts,
        };
        inner.events.insert(id, row.clone());
        Ok(EventInsert::Created(row))
    }

    async fn get_event(&self, id: i64) -> StorageResult<Option<FollowUpEvent>> {
        Ok(self.inner.lock().events.get(&id).cloned())
    }

    async fn find_active_event(
        &self,
        estimate_id: i64,
        step_index: i32,
    ) -> StorageResult<Option<FollowUpEvent>> {
        Ok(self
            .inner
            .lock()
            .events
            .values()
            .find(|e| {
                e.estimate_id == estimate_id
                    && e.sequence_step_index == step_index
                    && e.status.is_active()
            })
            .cloned())
    }

    async fn list_events(&self, estimate_id: i64) -> StorageResult<Vec<FollowUpEvent>> {
        Ok(self
            .inner
            .lock()
            .events
            .values()
            .filter(|e| e.estimate_id == estimate_id)
            .cloned()
            .collect())
    }

    async fn list_events_in_states(
        &self,
        estimate_id: i64,
        states: &[EventState],
    ) -> StorageResult<Vec<FollowUpEvent>> {
        Ok(self
            .inner
            .lock()
            .events
            .values()
            .filter(|e| e.estimate_id == estimate_id && states.contains(&e.status))
            .cloned()
            .collect())
    }

    async fn update_event_content(
        &self,
        id: i64,
        content: &str,
        comfort_pro_edited: bool,
    ) -> StorageResult<FollowUpEvent> {
        let mut inner = self.inner.lock();
        let row = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("follow_up_event", id))?;
        if row.status != EventState::PendingReview {
            return Err(StorageError::Conflict(format!(
                "event {id} left pending_review before the edit landed (now {})",
                row.status
            )));
        }
        row.content = Some(content.to_string());
        row.comfort_pro_edited = row.comfort_pro_edited || comfort_pro_edited;
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn transition_event(
        &self,
        id: i64,
        from: EventState,
        to: EventState,
        stamp: TransitionStamp,
    ) -> StorageResult<FollowUpEvent> {
        let mut inner = self.inner.lock();
        let row = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("follow_up_event", id))?;
        if row.status != from {
            return Err(StorageError::Conflict(format!(
                "event {id} is {}, expected {from}",
                row.status
            )));
        }
        row.status = to;
        if let Some(sent_at) = stamp.sent_at {
            row.sent_at = Some(sent_at);
        }
        if let Some(message_id) = stamp.external_message_id {
            row.external_message_id = Some(message_id);
        }
        if let Some(note) = stamp.note {
            row.note = Some(note);
        }
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn bulk_transition_events(
        &self,
        estimate_id: i64,
        from: &[EventState],
        to: EventState,
        note: Option<&str>,
    ) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let ts = now();
        let mut touched = 0u64;
        for row in inner.events.values_mut() {
            if row.estimate_id == estimate_id && from.contains(&row.status) {
                row.status = to;
                if let Some(note) = note {
                    if row.note.is_none() {
                        row.note = Some(note.to_string());
                    }
                }
                row.updated_at = ts;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn insert_option(&self, option: NewEstimateOption) -> StorageResult<EstimateOption> {
        let mut inner = self.inner.lock();
        let id = Inner::next_id(&mut inner.next_option_id);
        let ts = now();
        let row = EstimateOption {
            id,
            estimate_id: option.estimate_id,
            external_option_id: option.external_option_id,
            status: option.status,
            declined_at: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.options.insert(id, row.clone());
        Ok(row)
    }

    async fn list_pending_options(&self, estimate_id: i64) -> StorageResult<Vec<EstimateOption>> {
        Ok(self
            .inner
            .lock()
            .options
            .values()
            .filter(|o| o.estimate_id == estimate_id && o.status == OptionState::Pending)
            .cloned()
            .collect())
    }

    async fn decline_options(&self, ids: &[i64]) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let ts = now();
        let mut touched = 0u64;
        for id in ids {
            if let Some(row) = inner.options.get_mut(id) {
                if row.status == OptionState::Pending {
                    row.status = OptionState::Declined;
                    row.declined_at = Some(ts);
                    row.updated_at = ts;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;

    fn sms_event(estimate_id: i64, index: i32, status: EventState) -> NewFollowUpEvent {
        NewFollowUpEvent {
            estimate_id,
            sequence_step_index: index,
            channel: Channel::Sms,
            status,
            content: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_insert_event_refuses_duplicate_active_slot() {
        let store = MemoryStore::new();
        let first = store
            .insert_event(sms_event(1, 0, EventState::PendingReview))
            .await
            .unwrap();
        assert!(first.was_created());

        let second = store
            .insert_event(sms_event(1, 0, EventState::Scheduled))
            .await
            .unwrap();
        assert!(!second.was_created());
        assert_eq!(second.into_event().id, first.into_event().id);
    }

    #[tokio::test]
    async fn test_insert_event_allows_terminal_alongside_active_history() {
        let store = MemoryStore::new();
        store
            .insert_event(sms_event(1, 0, EventState::Snoozed))
            .await
            .unwrap();

        // A snoozed row does not occupy the active slot
        let fresh = store
            .insert_event(sms_event(1, 0, EventState::PendingReview))
            .await
            .unwrap();
        assert!(fresh.was_created());

        // And a direct skip insert bypasses the check entirely
        let skipped = store
            .insert_event(sms_event(1, 0, EventState::Skipped))
            .await
            .unwrap();
        assert!(skipped.was_created());
    }

    #[tokio::test]
    async fn test_advance_step_index_is_compare_and_set() {
        let store = MemoryStore::new();
        let est = store
            .insert_estimate(NewEstimate {
                external_job_id: None,
                customer_name: "Ray Alvarez".to_string(),
                sequence_id: None,
                sequence_revision: None,
                sequence_assigned_at: None,
            })
            .await
            .unwrap();

        assert!(store.advance_step_index(est.id, 0).await.unwrap());
        // Retry with the stale expectation loses
        assert!(!store.advance_step_index(est.id, 0).await.unwrap());
        assert!(store.advance_step_index(est.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_transition_event_conflicts_on_stale_state() {
        let store = MemoryStore::new();
        let event = store
            .insert_event(sms_event(1, 0, EventState::PendingReview))
            .await
            .unwrap()
            .into_event();

        store
            .transition_event(
                event.id,
                EventState::PendingReview,
                EventState::Skipped,
                TransitionStamp::noted("manual skip"),
            )
            .await
            .unwrap();

        let err = store
            .transition_event(
                event.id,
                EventState::PendingReview,
                EventState::Snoozed,
                TransitionStamp::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_decline_options_skips_accepted() {
        let store = MemoryStore::new();
        let pending = store
            .insert_option(NewEstimateOption {
                estimate_id: 1,
                external_option_id: "opt-1".to_string(),
                status: OptionState::Pending,
            })
            .await
            .unwrap();
        let accepted = store
            .insert_option(NewEstimateOption {
                estimate_id: 1,
                external_option_id: "opt-2".to_string(),
                status: OptionState::Accepted,
            })
            .await
            .unwrap();

        let touched = store
            .decline_options(&[pending.id, accepted.id])
            .await
            .unwrap();
        assert_eq!(touched, 1);
    }
}
