pub mod estimate;
pub mod estimate_option;
pub mod follow_up_event;
pub mod sequence;

// Re-export core models for easy access
pub use estimate::{Estimate, NewEstimate};
pub use estimate_option::{EstimateOption, NewEstimateOption};
pub use follow_up_event::{FollowUpEvent, NewFollowUpEvent};
pub use sequence::{Channel, NewSequence, Sequence, SequenceStep};
