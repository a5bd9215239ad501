// State machine module for the follow-up sequencer.
//
// Transition legality is computed as a pure function over (state, command);
// persistence applies transitions with compare-and-set semantics at the
// storage boundary.

pub mod errors;
pub mod event_state_machine;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use event_state_machine::{determine_target_state, EventStateMachine};
pub use events::EventCommand;
pub use states::{EstimateStatus, EventState, OptionState};
