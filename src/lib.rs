#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Followup Core
//!
//! Rust core of the estimate follow-up sequence engine for the ComfortTrack
//! CRM.
//!
//! ## Overview
//!
//! Estimates progress through an ordered list of per-sequence steps (day
//! offset, channel, call-task flag). Each due step materializes into exactly
//! one follow-up event that a comfort pro can edit, send, skip, or snooze,
//! with transitions gated by time, human action, and estimate outcome
//! (won/lost). The surrounding web application owns rendering, authentication,
//! and the third-party API clients; this crate owns the scheduling and
//! state-machine semantics underneath them.
//!
//! ## Architecture
//!
//! Everything is poll- and request-driven. An external cron-style scheduler
//! invokes the [`orchestration::EventMaterializer`] per active estimate; human
//! actions and the job-status poll drive the
//! [`orchestration::ProgressionController`]; outbound sends cross the
//! [`dispatch::DispatchAdapter`] boundary with a bounded timeout. Persistence
//! sits behind [`storage::SequencerStore`], with Postgres and in-memory
//! implementations.
//!
//! ## Module Organization
//!
//! - [`models`] - Sequences, estimates, follow-up events, options
//! - [`state_machine`] - Event lifecycle states, commands, and transitions
//! - [`orchestration`] - Materializer, progression controller, engine facade
//! - [`storage`] - Store trait plus Postgres and in-memory implementations
//! - [`dispatch`] - Outbound send/decline contracts and the inbound poll
//! - [`events`] - Lifecycle event publishing
//! - [`config`] - Runtime configuration
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use followup_core::config::SequencerConfig;
//! use followup_core::dispatch::NullContentGenerator;
//! use followup_core::orchestration::SequenceEngine;
//! use followup_core::storage::MemoryStore;
//!
//! # use async_trait::async_trait;
//! # use followup_core::dispatch::{DispatchAdapter, DispatchError, ExternalMessageId};
//! # use followup_core::models::FollowUpEvent;
//! # struct MyAdapter;
//! # #[async_trait]
//! # impl DispatchAdapter for MyAdapter {
//! #     async fn send(&self, _e: &FollowUpEvent) -> Result<ExternalMessageId, DispatchError> {
//! #         Ok(ExternalMessageId("m".into()))
//! #     }
//! #     async fn decline_options(&self, _ids: &[String]) -> Result<(), DispatchError> {
//! #         Ok(())
//! #     }
//! # }
//! # async fn example() {
//! let config = SequencerConfig::default();
//! let engine = SequenceEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MyAdapter),
//!     Arc::new(NullContentGenerator),
//!     &config,
//! );
//!
//! // The scheduler polls each active estimate
//! // engine.materialize_next_step(estimate_id).await?;
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;

pub use config::SequencerConfig;
pub use error::{CoreError, Result};
pub use identity::{Actor, ActorRole};
pub use state_machine::{EstimateStatus, EventState, OptionState};
