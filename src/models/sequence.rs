//! # Sequence Model
//!
//! Named, ordered follow-up step definitions shared by many estimates.
//!
//! ## Overview
//!
//! A `Sequence` is the template side of the follow-up engine: an ordered list
//! of [`SequenceStep`] value objects describing when (day offset from
//! assignment) and how (channel, call-task flag) a customer should be touched.
//! Estimates reference a sequence by id and carry their own progress pointer,
//! so steps themselves have no identity outside their sequence.
//!
//! ## Step storage
//!
//! Steps persist as a single JSONB column and are parsed and validated once at
//! the storage boundary. The core only ever sees `Vec<SequenceStep>`; a
//! malformed step document is a storage-level error, never a loosely-typed
//! value flowing through the engine.
//!
//! ## Revisioning
//!
//! Wholesale step replacement bumps `revision`. Estimates pin the revision
//! current at assignment time, which lets the materializer notice (and warn
//! about) in-flight estimates whose step list changed under them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbound channel for one follow-up touchpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Call,
}

impl Channel {
    /// Check if this channel delivers through the dispatch adapter
    ///
    /// Call steps produce a human task; nothing is dispatched for them.
    pub fn is_automated(&self) -> bool {
        matches!(self, Self::Sms | Self::Email)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Email => write!(f, "email"),
            Self::Call => write!(f, "call"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "call" => Ok(Self::Call),
            _ => Err(format!("Invalid channel: {s}")),
        }
    }
}

/// One scheduled touchpoint definition within a sequence
///
/// `day_offset` counts days after the estimate was assigned to the sequence.
/// `is_call_task` marks steps that produce a human task instead of an
/// automated send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub day_offset: u32,
    pub channel: Channel,
    pub is_call_task: bool,
}

impl SequenceStep {
    pub fn new(day_offset: u32, channel: Channel, is_call_task: bool) -> Self {
        Self {
            day_offset,
            channel,
            is_call_task,
        }
    }

    /// Parse and validate a step list from its JSONB representation
    ///
    /// This is the single point where loosely-typed step documents become
    /// typed values; everything downstream works with the parsed list.
    pub fn parse_list(value: &serde_json::Value) -> Result<Vec<SequenceStep>, String> {
        let steps: Vec<SequenceStep> = serde_json::from_value(value.clone())
            .map_err(|e| format!("Malformed step list: {e}"))?;
        Self::validate_list(&steps)?;
        Ok(steps)
    }

    /// Validate a typed step list
    pub fn validate_list(steps: &[SequenceStep]) -> Result<(), String> {
        if steps.is_empty() {
            return Err("A sequence requires at least one step".to_string());
        }
        Ok(())
    }
}

/// Represents a named follow-up sequence with its ordered step list.
///
/// Sequences are shared: many estimates reference one sequence, each carrying
/// its own `sequence_step_index`. Deactivating a sequence stops
/// materialization for every estimate attached to it without touching their
/// progress pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub revision: i32,
    pub steps: Vec<SequenceStep>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Sequence {
    /// Number of steps in this sequence
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Look up the step at a progress pointer, if the sequence is not complete
    pub fn step_at(&self, index: i32) -> Option<&SequenceStep> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }

    /// Serialize the step list for JSONB storage
    pub fn steps_to_json(steps: &[SequenceStep]) -> serde_json::Value {
        serde_json::to_value(steps).unwrap_or_else(|_| serde_json::Value::Array(vec![]))
    }
}

/// New sequence for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSequence {
    pub name: String,
    pub is_active: bool,
    pub steps: Vec<SequenceStep>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_automation() {
        assert!(Channel::Sms.is_automated());
        assert!(Channel::Email.is_automated());
        assert!(!Channel::Call.is_automated());
    }

    #[test]
    fn test_parse_list_accepts_valid_steps() {
        let value = json!([
            {"day_offset": 0, "channel": "sms", "is_call_task": false},
            {"day_offset": 2, "channel": "email", "is_call_task": false},
            {"day_offset": 5, "channel": "call", "is_call_task": true},
        ]);
        let steps = SequenceStep::parse_list(&value).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].channel, Channel::Email);
        assert!(steps[2].is_call_task);
    }

    #[test]
    fn test_parse_list_rejects_malformed_document() {
        let value = json!([{"day_offset": -1, "channel": "sms", "is_call_task": false}]);
        assert!(SequenceStep::parse_list(&value).is_err());

        let value = json!([{"channel": "fax"}]);
        assert!(SequenceStep::parse_list(&value).is_err());

        let value = json!({"not": "a list"});
        assert!(SequenceStep::parse_list(&value).is_err());
    }

    #[test]
    fn test_parse_list_rejects_empty() {
        assert!(SequenceStep::parse_list(&json!([])).is_err());
    }

    #[test]
    fn test_step_lookup_bounds() {
        let seq = Sequence {
            id: 1,
            name: "residential-standard".to_string(),
            is_active: true,
            revision: 1,
            steps: vec![SequenceStep::new(0, Channel::Sms, false)],
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        assert!(seq.step_at(0).is_some());
        assert!(seq.step_at(1).is_none());
        assert!(seq.step_at(-1).is_none());
    }
}
