//! # Estimate Model
//!
//! The estimate is the unit of follow-up: a priced proposal working its way
//! through a sequence until the customer decides or the contractor gives up.
//!
//! ## Overview
//!
//! Only the sequencer-relevant slice of the CRM's estimate lives here:
//! status, the sequence reference, the progress pointer, and snooze bookkeeping.
//! Line items, pricing, and proposal rendering belong to the surrounding
//! application.
//!
//! ## Invariants
//!
//! - `sequence_step_index` is monotonically non-decreasing over the estimate's
//!   lifetime and never exceeds the step count of the assigned sequence. The
//!   storage layer enforces the monotone advance with a compare-and-set.
//! - Once the index equals the step count the sequence is complete and the
//!   materializer produces nothing further.
//! - `sequence_revision` pins the sequence revision current at assignment,
//!   letting the materializer detect step lists replaced mid-flight.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::state_machine::states::EstimateStatus;

/// Represents the follow-up view of one estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: i64,
    /// Identifier in the external field-service platform, when linked
    pub external_job_id: Option<String>,
    pub customer_name: String,
    pub status: EstimateStatus,
    pub sequence_id: Option<i64>,
    /// Sequence revision pinned at assignment time
    pub sequence_revision: Option<i32>,
    pub sequence_step_index: i32,
    pub sequence_assigned_at: Option<NaiveDateTime>,
    pub snooze_until: Option<NaiveDateTime>,
    pub snooze_note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Estimate {
    /// Check whether the progress pointer has consumed every step
    pub fn sequence_complete(&self, step_count: usize) -> bool {
        usize::try_from(self.sequence_step_index)
            .map(|idx| idx >= step_count)
            .unwrap_or(false)
    }

    /// The instant follow-up timing is measured from
    ///
    /// Sequences assigned after creation measure day offsets from the
    /// assignment; estimates created directly onto a sequence fall back to
    /// their creation time.
    pub fn sequence_epoch(&self) -> NaiveDateTime {
        self.sequence_assigned_at.unwrap_or(self.created_at)
    }
}

/// New estimate for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEstimate {
    pub external_job_id: Option<String>,
    pub customer_name: String,
    pub sequence_id: Option<i64>,
    pub sequence_revision: Option<i32>,
    pub sequence_assigned_at: Option<NaiveDateTime>,
}
