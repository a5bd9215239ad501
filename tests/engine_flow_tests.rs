//! End-to-end coverage of the sequencer through the engine facade, against
//! the in-memory store and mock dispatch adapter.

mod common;

use common::*;

use followup_core::dispatch::{DispatchError, JobSignal, JobStatusUpdate, StatusPoller};
use followup_core::models::{Channel, NewEstimateOption, SequenceStep};
use followup_core::orchestration::{EngineError, MaterializeError, ProgressionError};
use followup_core::state_machine::{EstimateStatus, EventState, OptionState, StateMachineError};
use followup_core::storage::SequencerStore;
use followup_core::SequencerConfig;

use std::sync::Arc;

#[tokio::test]
async fn three_step_scenario_end_to_end() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    // Pending option that should be declined when the estimate is lost
    h.engine
        .store()
        .insert_option(NewEstimateOption {
            estimate_id: estimate.id,
            external_option_id: "ext-opt-1".to_string(),
            status: OptionState::Pending,
        })
        .await
        .unwrap();

    // Day 0: the sms step materializes for review
    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .expect("day-zero step should be due");
    assert_eq!(event.sequence_step_index, 0);
    assert_eq!(event.channel, Channel::Sms);
    assert_eq!(event.status, EventState::PendingReview);
    assert!(event.content.is_none());

    // The comfort pro authors content and approves the send
    let edited = h
        .engine
        .edit_event_content(event.id, "Hi Dana, thanks for having us out today!", pro())
        .await
        .unwrap();
    assert!(edited.comfort_pro_edited);

    let sent = h.engine.send_event(event.id, pro()).await.unwrap();
    assert_eq!(sent.status, EventState::Sent);
    assert!(sent.sent_at.is_some());
    assert!(sent.external_message_id.is_some());
    assert_eq!(h.dispatcher.sent_count(), 1);

    let estimate_now = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_now.sequence_step_index, 1);

    // The email step is not due yet
    assert!(h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .is_none());

    // Two days later it materializes
    let email_event = h
        .engine
        .materialize_at(estimate.id, days_from_now(2))
        .await
        .unwrap()
        .expect("day-two step should be due");
    assert_eq!(email_event.sequence_step_index, 1);
    assert_eq!(email_event.channel, Channel::Email);
    assert_eq!(email_event.status, EventState::PendingReview);

    // The customer goes with a competitor before the email goes out
    let result = h
        .engine
        .set_estimate_status(estimate.id, EstimateStatus::Lost, admin())
        .await
        .unwrap();
    assert_eq!(result.estimate.status, EstimateStatus::Lost);
    assert_eq!(result.events_skipped, 1);
    assert_eq!(result.options_declined, 1);
    assert!(result.decline_failure.is_none());
    assert_eq!(h.dispatcher.declined_ids(), vec!["ext-opt-1".to_string()]);

    // Lost does not force-advance the pointer
    let estimate_after = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_after.sequence_step_index, 1);

    let events = h.engine.list_events(estimate.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, EventState::Sent);
    assert_eq!(events[1].status, EventState::Skipped);
}

#[tokio::test]
async fn materializing_twice_produces_one_active_event() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let first = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    let second = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.engine.list_events(estimate.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn materialize_precondition_failures_are_typed() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;

    // Unknown estimate
    let err = h.engine.materialize_at(999, now()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Materialize(MaterializeError::EstimateNotFound(999))
    ));

    // No sequence assigned
    let unassigned = h
        .engine
        .create_estimate("Sam Ortiz", None, None, admin())
        .await
        .unwrap();
    let err = h
        .engine
        .materialize_at(unassigned.id, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Materialize(MaterializeError::NoSequenceAssigned(_))
    ));

    // Snoozed estimate does not materialize
    let snoozed = estimate_on_sequence(&h, sequence.id).await;
    h.engine
        .snooze_estimate(snoozed.id, days_from_now(7), "waiting on financing", pro())
        .await
        .unwrap();
    let err = h
        .engine
        .materialize_at(snoozed.id, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Materialize(MaterializeError::EstimateNotActive { .. })
    ));

    // Deactivated sequence does not materialize
    let parked = estimate_on_sequence(&h, sequence.id).await;
    h.engine
        .set_sequence_active(sequence.id, false, admin())
        .await
        .unwrap();
    let err = h
        .engine
        .materialize_at(parked.id, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Materialize(MaterializeError::SequenceInactive(_))
    ));
}

#[tokio::test]
async fn consumed_sequence_reports_complete() {
    let h = harness();
    let sequence = h
        .engine
        .create_sequence(
            "single-touch",
            vec![SequenceStep::new(0, Channel::Sms, false)],
            admin(),
        )
        .await
        .unwrap();
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .edit_event_content(event.id, "Quick check-in!", pro())
        .await
        .unwrap();
    h.engine.send_event(event.id, pro()).await.unwrap();

    let err = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Materialize(MaterializeError::SequenceComplete { .. })
    ));

    // Advancing past the end is a no-op, not an error
    let estimate_after = h.engine.advance_step(estimate.id).await.unwrap();
    assert_eq!(estimate_after.sequence_step_index, 1);
}

#[tokio::test]
async fn skip_transitions_existing_event_in_place() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();

    let result = h
        .engine
        .skip_current_step(estimate.id, Some("texted from personal phone".to_string()), pro())
        .await
        .unwrap();

    assert_eq!(result.event.id, event.id);
    assert_eq!(result.event.status, EventState::Skipped);
    assert_eq!(result.estimate.sequence_step_index, 1);
    assert_eq!(h.engine.list_events(estimate.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn skip_without_event_inserts_skipped_row() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let result = h
        .engine
        .skip_current_step(estimate.id, None, pro())
        .await
        .unwrap();

    assert_eq!(result.event.status, EventState::Skipped);
    assert!(result.event.note.is_some());
    assert_eq!(result.estimate.sequence_step_index, 1);

    let events = h.engine.list_events(estimate.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence_step_index, 0);
}

#[tokio::test]
async fn lost_declines_locally_even_when_external_decline_fails() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    h.engine
        .store()
        .insert_option(NewEstimateOption {
            estimate_id: estimate.id,
            external_option_id: "ext-opt-9".to_string(),
            status: OptionState::Pending,
        })
        .await
        .unwrap();
    h.engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();

    h.dispatcher.set_fail_declines(true);
    let result = h
        .engine
        .set_estimate_status(estimate.id, EstimateStatus::Lost, admin())
        .await
        .unwrap();

    // External failure is absorbed; local state is consistent
    assert!(result.decline_failure.is_some());
    assert_eq!(result.options_declined, 1);
    assert_eq!(result.estimate.status, EstimateStatus::Lost);
    assert!(h
        .engine
        .store()
        .list_pending_options(estimate.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(result.events_skipped, 1);
}

#[tokio::test]
async fn outcomes_leave_no_outstanding_events() {
    for outcome in [EstimateStatus::Won, EstimateStatus::Lost] {
        let h = harness();
        let sequence = three_step_sequence(&h).await;
        let estimate = estimate_on_sequence(&h, sequence.id).await;

        // One active event, then snooze it so both parked and active states
        // are represented across the two loop iterations
        h.engine
            .materialize_at(estimate.id, now())
            .await
            .unwrap()
            .unwrap();
        h.engine
            .snooze_estimate(estimate.id, days_from_now(3), "left voicemail", pro())
            .await
            .unwrap();

        let result = h
            .engine
            .set_estimate_status(estimate.id, outcome, admin())
            .await
            .unwrap();
        assert_eq!(result.events_skipped, 1);

        let events = h.engine.list_events(estimate.id).await.unwrap();
        assert!(events.iter().all(|e| matches!(
            e.status,
            EventState::Sent | EventState::Skipped
        )));
    }
}

#[tokio::test]
async fn snooze_parks_only_active_events_and_keeps_the_index() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    // Step 0 goes out
    let first = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .edit_event_content(first.id, "Hi Dana, following up on the quote.", pro())
        .await
        .unwrap();
    h.engine.send_event(first.id, pro()).await.unwrap();

    // Step 1 materializes, then the customer asks for a pause
    let second = h
        .engine
        .materialize_at(estimate.id, days_from_now(2))
        .await
        .unwrap()
        .unwrap();

    let result = h
        .engine
        .snooze_estimate(estimate.id, days_from_now(14), "on vacation until the 20th", pro())
        .await
        .unwrap();
    assert_eq!(result.events_snoozed, 1);
    assert_eq!(result.estimate.status, EstimateStatus::Snoozed);
    assert!(result.estimate.snooze_until.is_some());
    assert_eq!(
        result.estimate.snooze_note.as_deref(),
        Some("on vacation until the 20th")
    );
    // The index does not move
    assert_eq!(result.estimate.sequence_step_index, 1);

    let events = h.engine.list_events(estimate.id).await.unwrap();
    let sent = events.iter().find(|e| e.id == first.id).unwrap();
    let parked = events.iter().find(|e| e.id == second.id).unwrap();
    assert_eq!(sent.status, EventState::Sent);
    assert_eq!(parked.status, EventState::Snoozed);
}

#[tokio::test]
async fn snooze_requires_a_note() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let err = h
        .engine
        .snooze_estimate(estimate.id, days_from_now(7), "   ", pro())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Progression(ProgressionError::SnoozeDetailsRequired)
    ));
}

#[tokio::test]
async fn reactivation_resumes_parked_events() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .snooze_estimate(estimate.id, days_from_now(7), "customer traveling", pro())
        .await
        .unwrap();

    let result = h
        .engine
        .set_estimate_status(estimate.id, EstimateStatus::Active, pro())
        .await
        .unwrap();
    assert_eq!(result.events_resumed, 1);
    assert_eq!(result.estimate.status, EstimateStatus::Active);
    assert!(result.estimate.snooze_until.is_none());
    assert!(result.estimate.snooze_note.is_none());

    let events = h.engine.list_events(estimate.id).await.unwrap();
    let resumed = events.iter().find(|e| e.id == event.id).unwrap();
    assert_eq!(resumed.status, EventState::PendingReview);

    // Reactivation did not duplicate the slot
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn editing_a_sent_event_is_invalid() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .edit_event_content(event.id, "Short and sweet.", pro())
        .await
        .unwrap();
    h.engine.send_event(event.id, pro()).await.unwrap();

    let err = h
        .engine
        .edit_event_content(event.id, "Too late to change this.", pro())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateMachine(StateMachineError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn sending_without_content_is_rejected() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    let err = h.engine.send_event(event.id, pro()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateMachine(StateMachineError::ContentMissing(_))
    ));
}

#[tokio::test]
async fn failed_dispatch_leaves_the_event_retryable() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .edit_event_content(event.id, "Hello from ComfortTrack.", pro())
        .await
        .unwrap();

    h.dispatcher.set_fail_sends(true);
    let err = h.engine.send_event(event.id, pro()).await.unwrap_err();
    assert!(matches!(err, EngineError::Dispatch(DispatchError::Provider(_))));

    // No state changed: still pending, index unmoved
    let events = h.engine.list_events(estimate.id).await.unwrap();
    assert_eq!(events[0].status, EventState::PendingReview);
    let estimate_now = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_now.sequence_step_index, 0);

    // The next invocation succeeds
    h.dispatcher.set_fail_sends(false);
    let sent = h.engine.send_event(event.id, pro()).await.unwrap();
    assert_eq!(sent.status, EventState::Sent);
    let estimate_now = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_now.sequence_step_index, 1);
}

#[tokio::test]
async fn resending_a_sent_event_cannot_double_advance() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .edit_event_content(event.id, "First and only send.", pro())
        .await
        .unwrap();
    h.engine.send_event(event.id, pro()).await.unwrap();

    let err = h.engine.send_event(event.id, pro()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateMachine(StateMachineError::InvalidState { .. })
    ));

    let estimate_now = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_now.sequence_step_index, 1);
    assert_eq!(h.dispatcher.sent_count(), 1);
}

#[tokio::test]
async fn call_tasks_complete_without_dispatch() {
    let h = harness();
    let sequence = h
        .engine
        .create_sequence(
            "call-only",
            vec![SequenceStep::new(0, Channel::Call, true)],
            admin(),
        )
        .await
        .unwrap();
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let task = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, EventState::PendingReview);

    // A call task cannot go through the dispatch adapter
    h.engine
        .edit_event_content(task.id, "Asked about the duct quote, left voicemail.", pro())
        .await
        .unwrap();
    let err = h.engine.send_event(task.id, pro()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Dispatch(DispatchError::ChannelUnsupported(Channel::Call))
    ));

    let done = h.engine.complete_call_task(task.id, pro()).await.unwrap();
    assert_eq!(done.status, EventState::Sent);
    assert!(done.external_message_id.is_none());
    assert_eq!(h.dispatcher.sent_count(), 0);

    let estimate_now = h.engine.get_estimate(estimate.id).await.unwrap().unwrap();
    assert_eq!(estimate_now.sequence_step_index, 1);
}

#[tokio::test]
async fn generated_content_schedules_when_review_is_off() {
    let config = SequencerConfig {
        require_content_review: false,
        ..SequencerConfig::default()
    };
    let h = harness_with(
        config,
        Some(Arc::new(StaticContentGenerator(
            "Hi! Just checking in on your estimate.",
        ))),
    );
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, EventState::Scheduled);
    assert!(event.has_content());

    // Scheduled events send without a review pass
    let sent = h.engine.send_event(event.id, pro()).await.unwrap();
    assert_eq!(sent.status, EventState::Sent);
}

#[tokio::test]
async fn snoozing_via_set_status_is_rejected() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    let err = h
        .engine
        .set_estimate_status(estimate.id, EstimateStatus::Snoozed, pro())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Progression(ProgressionError::InvalidStatusChange { .. })
    ));
}

#[tokio::test]
async fn step_replacement_bumps_revision_and_keeps_estimates_moving() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;
    assert_eq!(estimate.sequence_revision, Some(1));

    let replaced = h
        .engine
        .replace_sequence_steps(
            sequence.id,
            vec![
                SequenceStep::new(0, Channel::Email, false),
                SequenceStep::new(3, Channel::Call, true),
            ],
            admin(),
        )
        .await
        .unwrap();
    assert_eq!(replaced.revision, 2);

    // The pinned estimate continues against the current revision, with a
    // drift warning logged rather than a hard failure
    let event = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.channel, Channel::Email);
}

#[tokio::test]
async fn empty_step_lists_are_rejected() {
    let h = harness();
    let err = h
        .engine
        .create_sequence("hollow", vec![], admin())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Admin(_)));
}

#[tokio::test]
async fn status_poller_applies_outcome_and_new_job_signals() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    h.engine
        .create_estimate("Dana Whitfield", Some("job-1".to_string()), Some(sequence.id), admin())
        .await
        .unwrap();

    let source = Arc::new(MockJobSource::with_updates(vec![
        JobStatusUpdate {
            external_job_id: "job-1".to_string(),
            signal: JobSignal::Won,
        },
        JobStatusUpdate {
            external_job_id: "job-404".to_string(),
            signal: JobSignal::Lost,
        },
        JobStatusUpdate {
            external_job_id: "job-9".to_string(),
            signal: JobSignal::New {
                customer_name: "Pat Green".to_string(),
            },
        },
    ]));
    let poller = StatusPoller::new(source, h.engine.clone(), Some(sequence.id));

    let outcome = poller.run_once().await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.unmatched, 1);
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.failed, 0);

    let won = h
        .engine
        .find_estimate_by_external_job("job-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(won.status, EstimateStatus::Won);

    let created = h
        .engine
        .find_estimate_by_external_job("job-9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.customer_name, "Pat Green");
    assert_eq!(created.sequence_id, Some(sequence.id));
    assert_eq!(created.sequence_revision, Some(1));

    // A second pass is a no-op: everything already reflected locally
    let outcome = poller.run_once().await.unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.unchanged, 2);
    assert_eq!(outcome.unmatched, 1);
}

#[tokio::test]
async fn reactivation_after_loss_resumes_via_materializer() {
    let h = harness();
    let sequence = three_step_sequence(&h).await;
    let estimate = estimate_on_sequence(&h, sequence.id).await;

    h.engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    h.engine
        .set_estimate_status(estimate.id, EstimateStatus::Lost, admin())
        .await
        .unwrap();

    let result = h
        .engine
        .set_estimate_status(estimate.id, EstimateStatus::Active, admin())
        .await
        .unwrap();
    // No events regenerate on reactivation from an outcome
    assert_eq!(result.events_resumed, 0);

    // The next materializer pass resumes from the current index with a fresh
    // event; the skipped one remains as history
    let fresh = h
        .engine
        .materialize_at(estimate.id, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.sequence_step_index, 0);
    assert_eq!(fresh.status, EventState::PendingReview);
    assert_eq!(h.engine.list_events(estimate.id).await.unwrap().len(), 2);
}
