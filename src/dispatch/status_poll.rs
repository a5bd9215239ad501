//! Inbound job-status poll boundary.
//!
//! A periodic external trigger fetches updated job states from the
//! field-service platform and feeds won/lost/new-estimate signals into the
//! progression controller through the engine facade. Per-item failures are
//! logged and counted, never aborting the batch: one bad job must not stall
//! the rest of the pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::identity::Actor;
use crate::orchestration::{EngineError, SequenceEngine};
use crate::state_machine::states::EstimateStatus;
use crate::storage::SequencerStore;

use super::DispatchError;

/// Signal extracted from one external job update
#[derive(Debug, Clone, PartialEq)]
pub enum JobSignal {
    /// The job sold; the estimate is won
    Won,
    /// The job was declined or abandoned; the estimate is lost
    Lost,
    /// A job with no matching estimate appeared
    New { customer_name: String },
}

/// One update fetched from the external job system
#[derive(Debug, Clone)]
pub struct JobStatusUpdate {
    pub external_job_id: String,
    pub signal: JobSignal,
}

/// Source of external job updates (the field-service platform client)
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_updates(&self) -> Result<Vec<JobStatusUpdate>, DispatchError>;
}

/// Summary of one poll pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Status signals applied to known estimates
    pub applied: u32,
    /// Estimates created from new-job signals
    pub created: u32,
    /// Updates that were already reflected locally
    pub unchanged: u32,
    /// Signals with no matching estimate
    pub unmatched: u32,
    /// Updates that failed to apply
    pub failed: u32,
}

/// Applies external job updates to the sequencer
pub struct StatusPoller<S> {
    source: Arc<dyn JobStatusSource>,
    engine: Arc<SequenceEngine<S>>,
    default_sequence_id: Option<i64>,
}

enum Applied {
    Status,
    Created,
    Unchanged,
    Unmatched,
}

impl<S: SequencerStore> StatusPoller<S> {
    pub fn new(
        source: Arc<dyn JobStatusSource>,
        engine: Arc<SequenceEngine<S>>,
        default_sequence_id: Option<i64>,
    ) -> Self {
        Self {
            source,
            engine,
            default_sequence_id,
        }
    }

    /// Fetch one batch of updates and apply them
    pub async fn run_once(&self) -> Result<PollOutcome, DispatchError> {
        let updates = self.source.fetch_updates().await?;
        let mut outcome = PollOutcome::default();

        for update in updates {
            match self.apply_update(&update).await {
                Ok(Applied::Status) => outcome.applied += 1,
                Ok(Applied::Created) => outcome.created += 1,
                Ok(Applied::Unchanged) => outcome.unchanged += 1,
                Ok(Applied::Unmatched) => outcome.unmatched += 1,
                Err(e) => {
                    tracing::warn!(
                        external_job_id = %update.external_job_id,
                        error = %e,
                        "Failed to apply job status update"
                    );
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            applied = outcome.applied,
            created = outcome.created,
            unchanged = outcome.unchanged,
            unmatched = outcome.unmatched,
            failed = outcome.failed,
            "Job status poll pass complete"
        );
        Ok(outcome)
    }

    async fn apply_update(&self, update: &JobStatusUpdate) -> Result<Applied, EngineError> {
        match &update.signal {
            JobSignal::Won | JobSignal::Lost => {
                let target = if update.signal == JobSignal::Won {
                    EstimateStatus::Won
                } else {
                    EstimateStatus::Lost
                };

                let Some(estimate) = self
                    .engine
                    .find_estimate_by_external_job(&update.external_job_id)
                    .await?
                else {
                    tracing::warn!(
                        external_job_id = %update.external_job_id,
                        "Outcome signal for unknown job"
                    );
                    return Ok(Applied::Unmatched);
                };

                if estimate.status == target {
                    return Ok(Applied::Unchanged);
                }

                self.engine
                    .set_estimate_status(estimate.id, target, Actor::system())
                    .await?;
                Ok(Applied::Status)
            }
            JobSignal::New { customer_name } => {
                if self
                    .engine
                    .find_estimate_by_external_job(&update.external_job_id)
                    .await?
                    .is_some()
                {
                    return Ok(Applied::Unchanged);
                }

                self.engine
                    .create_estimate(
                        customer_name.clone(),
                        Some(update.external_job_id.clone()),
                        self.default_sequence_id,
                        Actor::system(),
                    )
                    .await?;
                Ok(Applied::Created)
            }
        }
    }
}
