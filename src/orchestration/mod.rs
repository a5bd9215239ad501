//! # Orchestration
//!
//! The components that drive estimates through their follow-up sequences.
//!
//! ## Core Components
//!
//! - **EventMaterializer**: turns due sequence steps into follow-up events,
//!   exactly once per step
//! - **ProgressionController**: owns estimate status transitions, step
//!   advancement, and the cascading effects on events and options
//! - **SequenceAdmin**: sequence creation, step replacement, activation
//! - **SequenceEngine**: composition root and facade the web layer embeds
//!
//! Control flow is poll- and request-driven: an external scheduler invokes
//! the materializer per active estimate, human reviewers drive the event
//! operations, and the job-status poll feeds outcome signals into the
//! progression controller. Nothing here owns a background task.

pub mod engine;
pub mod event_materializer;
pub mod progression_controller;
pub mod sequence_admin;

pub use engine::{EngineError, SequenceEngine};
pub use event_materializer::{EventMaterializer, MaterializeError};
pub use progression_controller::{
    ProgressionController, ProgressionError, SkipResult, SnoozeResult, StatusChangeResult,
};
pub use sequence_admin::{SequenceAdmin, SequenceAdminError};
