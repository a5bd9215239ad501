//! Postgres [`SequencerStore`] implementation.
//!
//! Queries use the runtime-checked sqlx API so the crate builds without a
//! live `DATABASE_URL`. The active-event uniqueness invariant is enforced by
//! the `followup_events_one_active` partial unique index (see
//! `migrations/0001_followup_schema.sql`): concurrent materializer polls race
//! on `ON CONFLICT DO NOTHING`, the loser re-reads the winner's row, and both
//! return the same event.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{
    Estimate, EstimateOption, FollowUpEvent, NewEstimate, NewEstimateOption, NewFollowUpEvent,
    NewSequence, Sequence, SequenceStep,
};
use crate::state_machine::states::{EstimateStatus, EventState};

use super::{
    EventInsert, SequencerStore, StorageError, StorageResult, TransitionStamp,
};

/// sqlx-backed store over the `followup_*` tables
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> StorageResult<T> {
    raw.parse().map_err(StorageError::InvalidRow)
}

fn sequence_from_row(row: &PgRow) -> StorageResult<Sequence> {
    let id: i64 = row.try_get("id")?;
    let steps_json: serde_json::Value = row.try_get("steps")?;
    let steps = SequenceStep::parse_list(&steps_json).map_err(|reason| {
        StorageError::MalformedSteps {
            sequence_id: id,
            reason,
        }
    })?;
    Ok(Sequence {
        id,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        revision: row.try_get("revision")?,
        steps,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn estimate_from_row(row: &PgRow) -> StorageResult<Estimate> {
    let status: String = row.try_get("status")?;
    Ok(Estimate {
        id: row.try_get("id")?,
        external_job_id: row.try_get("external_job_id")?,
        customer_name: row.try_get("customer_name")?,
        status: parse_enum(&status)?,
        sequence_id: row.try_get("sequence_id")?,
        sequence_revision: row.try_get("sequence_revision")?,
        sequence_step_index: row.try_get("sequence_step_index")?,
        sequence_assigned_at: row.try_get("sequence_assigned_at")?,
        snooze_until: row.try_get("snooze_until")?,
        snooze_note: row.try_get("snooze_note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> StorageResult<FollowUpEvent> {
    let status: String = row.try_get("status")?;
    let channel: String = row.try_get("channel")?;
    Ok(FollowUpEvent {
        id: row.try_get("id")?,
        estimate_id: row.try_get("estimate_id")?,
        sequence_step_index: row.try_get("sequence_step_index")?,
        channel: parse_enum(&channel)?,
        status: parse_enum(&status)?,
        content: row.try_get("content")?,
        sent_at: row.try_get("sent_at")?,
        external_message_id: row.try_get("external_message_id")?,
        comfort_pro_edited: row.try_get("comfort_pro_edited")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn option_from_row(row: &PgRow) -> StorageResult<EstimateOption> {
    let status: String = row.try_get("status")?;
    Ok(EstimateOption {
        id: row.try_get("id")?,
        estimate_id: row.try_get("estimate_id")?,
        external_option_id: row.try_get("external_option_id")?,
        status: parse_enum(&status)?,
        declined_at: row.try_get("declined_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn states_to_strings(states: &[EventState]) -> Vec<String> {
    states.iter().map(ToString::to_string).collect()
}

#[async_trait]
impl SequencerStore for PgStore {
    async fn insert_sequence(&self, sequence: NewSequence) -> StorageResult<Sequence> {
        let row = sqlx::query(
            r#"
            INSERT INTO followup_sequences (name, is_active, revision, steps, created_at, updated_at)
            VALUES ($1, $2, 1, $3, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&sequence.name)
        .bind(sequence.is_active)
        .bind(Sequence::steps_to_json(&sequence.steps))
        .fetch_one(&self.pool)
        .await?;
        sequence_from_row(&row)
    }

    async fn get_sequence(&self, id: i64) -> StorageResult<Option<Sequence>> {
        let row = sqlx::query("SELECT * FROM followup_sequences WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sequence_from_row).transpose()
    }

    async fn replace_sequence_steps(
        &self,
        id: i64,
        steps: Vec<SequenceStep>,
    ) -> StorageResult<Sequence> {
        let row = sqlx::query(
            r#"
            UPDATE followup_sequences
            SET steps = $2, revision = revision + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Sequence::steps_to_json(&steps))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("sequence", id))?;
        sequence_from_row(&row)
    }

    async fn set_sequence_active(&self, id: i64, is_active: bool) -> StorageResult<Sequence> {
        let row = sqlx::query(
            r#"
            UPDATE followup_sequences
            SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("sequence", id))?;
        sequence_from_row(&row)
    }

    async fn count_estimates_in_flight(&self, sequence_id: i64) -> StorageResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS in_flight
            FROM followup_estimates e
            JOIN followup_sequences s ON s.id = e.sequence_id
            WHERE e.sequence_id = $1
              AND e.status IN ('active', 'snoozed')
              AND e.sequence_step_index < jsonb_array_length(s.steps)
            "#,
        )
        .bind(sequence_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("in_flight")?;
        Ok(count.max(0) as u64)
    }

    async fn insert_estimate(&self, estimate: NewEstimate) -> StorageResult<Estimate> {
        let row = sqlx::query(
            r#"
            INSERT INTO followup_estimates (
                external_job_id, customer_name, status, sequence_id, sequence_revision,
                sequence_step_index, sequence_assigned_at, created_at, updated_at
            )
            VALUES ($1, $2, 'active', $3, $4, 0, $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&estimate.external_job_id)
        .bind(&estimate.customer_name)
        .bind(estimate.sequence_id)
        .bind(estimate.sequence_revision)
        .bind(estimate.sequence_assigned_at)
        .fetch_one(&self.pool)
        .await?;
        estimate_from_row(&row)
    }

    async fn get_estimate(&self, id: i64) -> StorageResult<Option<Estimate>> {
        let row = sqlx::query("SELECT * FROM followup_estimates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(estimate_from_row).transpose()
    }

    async fn find_estimate_by_external_job(
        &self,
        external_job_id: &str,
    ) -> StorageResult<Option<Estimate>> {
        let row = sqlx::query("SELECT * FROM followup_estimates WHERE external_job_id = $1")
            .bind(external_job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(estimate_from_row).transpose()
    }

    async fn set_estimate_status(
        &self,
        id: i64,
        status: EstimateStatus,
    ) -> StorageResult<Estimate> {
        let row = sqlx::query(
            r#"
            UPDATE followup_estimates
            SET status = $2,
                snooze_until = CASE WHEN $2 = 'snoozed' THEN snooze_until ELSE NULL END,
                snooze_note = CASE WHEN $2 = 'snoozed' THEN snooze_note ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("estimate", id))?;
        estimate_from_row(&row)
    }

    async fn set_estimate_snooze(
        &self,
        id: i64,
        until: NaiveDateTime,
        note: &str,
    ) -> StorageResult<Estimate> {
        let row = sqlx::query(
            r#"
            UPDATE followup_estimates
            SET status = 'snoozed', snooze_until = $2, snooze_note = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(until)
        .bind(note)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found("estimate", id))?;
        estimate_from_row(&row)
    }

    async fn advance_step_index(&self, id: i64, expected_current: i32) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE followup_estimates
            SET sequence_step_index = sequence_step_index + 1, updated_at = NOW()
            WHERE id = $1 AND sequence_step_index = $2
            "#,
        )
        .bind(id)
        .bind(expected_current)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish a lost CAS from a missing row
        let exists = sqlx::query("SELECT 1 FROM followup_estimates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StorageError::not_found("estimate", id));
        }
        Ok(false)
    }

    async fn insert_event(&self, event: NewFollowUpEvent) -> StorageResult<EventInsert> {
        if event.status.is_active() {
            let row = sqlx::query(
                r#"
                INSERT INTO followup_events (
                    estimate_id, sequence_step_index, channel, status, content,
                    comfort_pro_edited, note, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, FALSE, $6, NOW(), NOW())
                ON CONFLICT (estimate_id, sequence_step_index)
                    WHERE status IN ('pending_review', 'scheduled')
                    DO NOTHING
                RETURNING *
                "#,
            )
            .bind(event.estimate_id)
            .bind(event.sequence_step_index)
            .bind(event.channel.to_string())
            .bind(event.status.to_string())
            .bind(&event.content)
            .bind(&event.note)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(EventInsert::Created(event_from_row(&row)?));
            }
            // Lost the insert race; the winner's row is the active slot holder
            return self
                .find_active_event(event.estimate_id, event.sequence_step_index)
                .await?
                .map(EventInsert::ExistingActive)
                .ok_or_else(|| {
                    StorageError::Conflict(format!(
                        "active slot for estimate {} step {} vanished mid-insert",
                        event.estimate_id, event.sequence_step_index
                    ))
                });
        }

        let row = sqlx::query(
            r#"
            INSERT INTO followup_events (
                estimate_id, sequence_step_index, channel, status, content,
                comfort_pro_edited, note, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(event.estimate_id)
        .bind(event.sequence_step_index)
        .bind(event.channel.to_string())
        .bind(event.status.to_string())
        .bind(&event.content)
        .bind(&event.note)
        .fetch_one(&self.pool)
        .await?;
        Ok(EventInsert::Created(event_from_row(&row)?))
    }

    async fn get_event(&self, id: i64) -> StorageResult<Option<FollowUpEvent>> {
        let row = sqlx::query("SELECT * FROM followup_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn find_active_event(
        &self,
        estimate_id: i64,
        step_index: i32,
    ) -> StorageResult<Option<FollowUpEvent>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM followup_events
            WHERE estimate_id = $1
              AND sequence_step_index = $2
              AND status IN ('pending_review', 'scheduled')
            LIMIT 1
            "#,
        )
        .bind(estimate_id)
        .bind(step_index)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_events(&self, estimate_id: i64) -> StorageResult<Vec<FollowUpEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM followup_events WHERE estimate_id = $1 ORDER BY sequence_step_index, id",
        )
        .bind(estimate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn list_events_in_states(
        &self,
        estimate_id: i64,
        states: &[EventState],
    ) -> StorageResult<Vec<FollowUpEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM followup_events
            WHERE estimate_id = $1 AND status = ANY($2)
            ORDER BY sequence_step_index, id
            "#,
        )
        .bind(estimate_id)
        .bind(states_to_strings(states))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn update_event_content(
        &self,
        id: i64,
        content: &str,
        comfort_pro_edited: bool,
    ) -> StorageResult<FollowUpEvent> {
        let row = sqlx::query(
            r#"
            UPDATE followup_events
            SET content = $2,
                comfort_pro_edited = comfort_pro_edited OR $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending_review'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(content)
        .bind(comfort_pro_edited)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return event_from_row(&row);
        }
        match self.get_event(id).await? {
            None => Err(StorageError::not_found("follow_up_event", id)),
            Some(event) => Err(StorageError::Conflict(format!(
                "event {id} left pending_review before the edit landed (now {})",
                event.status
            ))),
        }
    }

    async fn transition_event(
        &self,
        id: i64,
        from: EventState,
        to: EventState,
        stamp: TransitionStamp,
    ) -> StorageResult<FollowUpEvent> {
        let row = sqlx::query(
            r#"
            UPDATE followup_events
            SET status = $3,
                sent_at = COALESCE($4, sent_at),
                external_message_id = COALESCE($5, external_message_id),
                note = COALESCE($6, note),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(stamp.sent_at)
        .bind(&stamp.external_message_id)
        .bind(&stamp.note)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return event_from_row(&row);
        }
        match self.get_event(id).await? {
            None => Err(StorageError::not_found("follow_up_event", id)),
            Some(event) => Err(StorageError::Conflict(format!(
                "event {id} is {}, expected {from}",
                event.status
            ))),
        }
    }

    async fn bulk_transition_events(
        &self,
        estimate_id: i64,
        from: &[EventState],
        to: EventState,
        note: Option<&str>,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE followup_events
            SET status = $3, note = COALESCE(note, $4), updated_at = NOW()
            WHERE estimate_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(estimate_id)
        .bind(states_to_strings(from))
        .bind(to.to_string())
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_option(&self, option: NewEstimateOption) -> StorageResult<EstimateOption> {
        let row = sqlx::query(
            r#"
            INSERT INTO followup_estimate_options (
                estimate_id, external_option_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(option.estimate_id)
        .bind(&option.external_option_id)
        .bind(option.status.to_string())
        .fetch_one(&self.pool)
        .await?;
        option_from_row(&row)
    }

    async fn list_pending_options(&self, estimate_id: i64) -> StorageResult<Vec<EstimateOption>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM followup_estimate_options
            WHERE estimate_id = $1 AND status = 'pending'
            ORDER BY id
            "#,
        )
        .bind(estimate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(option_from_row).collect()
    }

    async fn decline_options(&self, ids: &[i64]) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE followup_estimate_options
            SET status = 'declined', declined_at = NOW(), updated_at = NOW()
            WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
