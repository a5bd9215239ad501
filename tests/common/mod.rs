//! Shared test support: mock collaborators and scenario builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use parking_lot::Mutex;

use followup_core::config::SequencerConfig;
use followup_core::dispatch::{
    ContentGenerator, DispatchAdapter, DispatchError, ExternalMessageId, JobStatusSource,
    JobStatusUpdate, NullContentGenerator,
};
use followup_core::identity::{Actor, ActorRole};
use followup_core::models::{Channel, Estimate, FollowUpEvent, Sequence, SequenceStep};
use followup_core::orchestration::SequenceEngine;
use followup_core::storage::MemoryStore;

/// Dispatch adapter double that records calls and can be told to fail
#[derive(Default)]
pub struct MockDispatcher {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub declined: Mutex<Vec<Vec<String>>>,
    pub fail_sends: AtomicBool,
    pub fail_declines: AtomicBool,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_declines(&self, fail: bool) {
        self.fail_declines.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn declined_ids(&self) -> Vec<String> {
        self.declined.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl DispatchAdapter for MockDispatcher {
    async fn send(&self, event: &FollowUpEvent) -> Result<ExternalMessageId, DispatchError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DispatchError::provider(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "sms provider unreachable",
            )));
        }
        self.sent
            .lock()
            .push((event.id, event.content.clone().unwrap_or_default()));
        Ok(ExternalMessageId(format!("prov-{}", event.id)))
    }

    async fn decline_options(&self, external_option_ids: &[String]) -> Result<(), DispatchError> {
        if self.fail_declines.load(Ordering::SeqCst) {
            return Err(DispatchError::provider(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "field service api down",
            )));
        }
        self.declined.lock().push(external_option_ids.to_vec());
        Ok(())
    }
}

/// Content generator that always produces the same body
pub struct StaticContentGenerator(pub &'static str);

#[async_trait]
impl ContentGenerator for StaticContentGenerator {
    async fn generate(&self, _estimate: &Estimate, _step: &SequenceStep) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Job status source double serving a fixed batch of updates
#[derive(Default)]
pub struct MockJobSource {
    pub updates: Mutex<Vec<JobStatusUpdate>>,
    pub fail: AtomicBool,
}

impl MockJobSource {
    pub fn with_updates(updates: Vec<JobStatusUpdate>) -> Self {
        Self {
            updates: Mutex::new(updates),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl JobStatusSource for MockJobSource {
    async fn fetch_updates(&self) -> Result<Vec<JobStatusUpdate>, DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::provider(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "job poll failed",
            )));
        }
        Ok(self.updates.lock().clone())
    }
}

/// Engine wired against the memory store and mock dispatcher
pub struct TestHarness {
    pub engine: Arc<SequenceEngine<MemoryStore>>,
    pub dispatcher: Arc<MockDispatcher>,
}

/// Default harness: null content generation, review required
pub fn harness() -> TestHarness {
    harness_with(SequencerConfig::default(), None)
}

/// Harness with a custom config and optional content generator
pub fn harness_with(
    config: SequencerConfig,
    generator: Option<Arc<dyn ContentGenerator>>,
) -> TestHarness {
    let dispatcher = Arc::new(MockDispatcher::new());
    let generator = generator.unwrap_or_else(|| Arc::new(NullContentGenerator));
    let engine = Arc::new(SequenceEngine::new(
        Arc::new(MemoryStore::new()),
        dispatcher.clone(),
        generator,
        &config,
    ));
    TestHarness { engine, dispatcher }
}

pub fn admin() -> Actor {
    Actor::new(1, ActorRole::Admin)
}

pub fn pro() -> Actor {
    Actor::new(2, ActorRole::ComfortPro)
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn days_from_now(days: i64) -> NaiveDateTime {
    now() + Duration::days(days)
}

/// The canonical three-step sequence: day0/sms, day2/email, day5/call
pub async fn three_step_sequence(harness: &TestHarness) -> Sequence {
    harness
        .engine
        .create_sequence(
            "residential-standard",
            vec![
                SequenceStep::new(0, Channel::Sms, false),
                SequenceStep::new(2, Channel::Email, false),
                SequenceStep::new(5, Channel::Call, true),
            ],
            admin(),
        )
        .await
        .unwrap()
}

/// Fresh active estimate attached to the given sequence
pub async fn estimate_on_sequence(harness: &TestHarness, sequence_id: i64) -> Estimate {
    harness
        .engine
        .create_estimate("Dana Whitfield", None, Some(sequence_id), admin())
        .await
        .unwrap()
}
