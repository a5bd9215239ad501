//! # Dispatch Boundary
//!
//! Trait contracts for everything that leaves or enters the sequencer:
//! outbound sends (SMS/email), external option declines, generated message
//! content, and the inbound job-status poll.
//!
//! The core never blocks indefinitely on a provider: [`BoundedDispatcher`]
//! wraps any adapter with the configured timeout, and a timeout is a failure,
//! never an assumed eventual success. Failures are typed so callers can decide
//! between retry-on-next-poll and the documented best-effort absorption in the
//! lost-outcome path.

pub mod content;
pub mod status_poll;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Channel, FollowUpEvent};

pub use content::{ContentGenerator, NullContentGenerator};
pub use status_poll::{JobSignal, JobStatusSource, JobStatusUpdate, PollOutcome, StatusPoller};

/// Provider-assigned identifier for a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMessageId(pub String);

impl ExternalMessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors crossing the dispatch boundary
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch timed out after {0:?}")]
    Timedout(Duration),

    #[error("Channel {0} does not support automated dispatch")]
    ChannelUnsupported(Channel),

    #[error("Provider error: {0}")]
    Provider(anyhow::Error),
}

impl DispatchError {
    /// Wrap an arbitrary provider failure
    pub fn provider(err: impl Into<anyhow::Error>) -> Self {
        Self::Provider(err.into())
    }
}

/// Boundary interface to outbound channels and option declines
#[async_trait]
pub trait DispatchAdapter: Send + Sync {
    /// Deliver a rendered message, returning the provider's message id
    async fn send(&self, event: &FollowUpEvent) -> Result<ExternalMessageId, DispatchError>;

    /// Decline a batch of options in the external field-service platform
    async fn decline_options(&self, external_option_ids: &[String]) -> Result<(), DispatchError>;
}

/// Timeout-bounding wrapper around any [`DispatchAdapter`]
///
/// Every call is raced against the configured timeout; an elapsed timer is
/// reported as [`DispatchError::Timedout`] and the operation is treated as
/// failed by the caller, retryable on the next scheduled invocation.
#[derive(Clone)]
pub struct BoundedDispatcher {
    inner: Arc<dyn DispatchAdapter>,
    timeout: Duration,
}

impl BoundedDispatcher {
    pub fn new(inner: Arc<dyn DispatchAdapter>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl DispatchAdapter for BoundedDispatcher {
    async fn send(&self, event: &FollowUpEvent) -> Result<ExternalMessageId, DispatchError> {
        match tokio::time::timeout(self.timeout, self.inner.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timedout(self.timeout)),
        }
    }

    async fn decline_options(&self, external_option_ids: &[String]) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.timeout, self.inner.decline_options(external_option_ids))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timedout(self.timeout)),
        }
    }
}
