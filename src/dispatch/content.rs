//! Content generation collaborator.
//!
//! Message bodies come from outside the core (template rendering, an LLM, a
//! canned library). The materializer asks the generator once at event
//! creation; a `None` leaves content null pending manual authoring, which in
//! turn keeps the event in `pending_review`.

use async_trait::async_trait;

use crate::models::{Estimate, SequenceStep};

/// Produces message content for a step about to be materialized
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate content for this estimate and step, or decline to
    async fn generate(&self, estimate: &Estimate, step: &SequenceStep) -> Option<String>;
}

/// Generator that never produces content
///
/// Every materialized event lands in `pending_review` for manual authoring.
pub struct NullContentGenerator;

#[async_trait]
impl ContentGenerator for NullContentGenerator {
    async fn generate(&self, _estimate: &Estimate, _step: &SequenceStep) -> Option<String> {
        None
    }
}
