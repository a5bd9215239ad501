// Lifecycle event publishing for the follow-up sequencer.
//
// Observability only: core operations publish after their state change lands
// and never fail because nobody is listening.

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
