//! Shared constants: state groupings and lifecycle event names.

use crate::state_machine::states::EventState;

/// State groupings used by reconciliation and the materializer
pub mod status_groups {
    use super::EventState;

    /// States in which an event occupies its step's active slot
    pub const ACTIVE_EVENT_STATES: &[EventState] =
        &[EventState::PendingReview, EventState::Scheduled];

    /// States cleared when an estimate reaches an outcome (won or lost)
    pub const OUTCOME_RECONCILED_STATES: &[EventState] = &[
        EventState::PendingReview,
        EventState::Scheduled,
        EventState::Snoozed,
    ];

    /// States parked by an estimate-level snooze
    pub const SNOOZABLE_STATES: &[EventState] =
        &[EventState::PendingReview, EventState::Scheduled];
}

/// Lifecycle event names published through the event publisher
pub mod events {
    pub const EVENT_MATERIALIZED: &str = "followup.event.materialized";
    pub const EVENT_CONTENT_EDITED: &str = "followup.event.content_edited";
    pub const EVENT_SENT: &str = "followup.event.sent";
    pub const EVENT_SKIPPED: &str = "followup.event.skipped";
    pub const EVENTS_SNOOZED: &str = "followup.events.snoozed";
    pub const EVENTS_RESUMED: &str = "followup.events.resumed";
    pub const ESTIMATE_STATUS_CHANGED: &str = "followup.estimate.status_changed";
    pub const ESTIMATE_SNOOZED: &str = "followup.estimate.snoozed";
    pub const ESTIMATE_STEP_ADVANCED: &str = "followup.estimate.step_advanced";
    pub const OPTIONS_DECLINED: &str = "followup.options.declined";
    pub const SEQUENCE_STEPS_REPLACED: &str = "followup.sequence.steps_replaced";
}

/// System-authored annotations
pub mod system_notes {
    /// Note attached when a step is skipped before any event was materialized
    pub const SKIPPED_UNMATERIALIZED: &str = "Step skipped before an event was generated";

    /// Note attached when outcome reconciliation clears outstanding events
    pub const OUTCOME_RECONCILED: &str = "Cleared by estimate outcome";
}
