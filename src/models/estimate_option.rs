//! # Estimate Option Model
//!
//! Priced options presented to the customer on a proposal. The sequencer only
//! cares about their decision state: marking an estimate lost declines every
//! pending option, locally always and externally best-effort.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::state_machine::states::OptionState;

/// Represents one priced option attached to an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateOption {
    pub id: i64,
    pub estimate_id: i64,
    /// Identifier of the option in the external field-service platform
    pub external_option_id: String,
    pub status: OptionState,
    pub declined_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// New estimate option for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEstimateOption {
    pub estimate_id: i64,
    pub external_option_id: String,
    pub status: OptionState,
}
