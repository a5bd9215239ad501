use crate::error::{CoreError, Result};
use std::time::Duration;

/// Runtime configuration for the follow-up sequencer
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub database_url: String,
    /// Upper bound on any single dispatch adapter call, in milliseconds
    pub dispatch_timeout_ms: u64,
    /// Hold generated content in `pending_review` instead of scheduling it
    pub require_content_review: bool,
    /// Sequence attached to estimates created by the job-status poll
    pub default_sequence_id: Option<i64>,
    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/followup_development".to_string(),
            dispatch_timeout_ms: 10_000,
            require_content_review: true,
            default_sequence_id: None,
            event_channel_capacity: 1000,
        }
    }
}

impl SequencerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(timeout) = std::env::var("FOLLOWUP_DISPATCH_TIMEOUT_MS") {
            config.dispatch_timeout_ms = timeout.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid dispatch_timeout_ms: {e}"))
            })?;
        }

        if let Ok(require_review) = std::env::var("FOLLOWUP_REQUIRE_CONTENT_REVIEW") {
            config.require_content_review = require_review.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid require_content_review: {e}"))
            })?;
        }

        if let Ok(sequence_id) = std::env::var("FOLLOWUP_DEFAULT_SEQUENCE_ID") {
            config.default_sequence_id = Some(sequence_id.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid default_sequence_id: {e}"))
            })?);
        }

        if let Ok(capacity) = std::env::var("FOLLOWUP_EVENT_CHANNEL_CAPACITY") {
            config.event_channel_capacity = capacity.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid event_channel_capacity: {e}"))
            })?;
        }

        Ok(config)
    }

    /// Dispatch timeout as a [`Duration`]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SequencerConfig::default();
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(10));
        assert!(config.require_content_review);
        assert!(config.default_sequence_id.is_none());
    }
}
