//! Pageforge, an asynchronous coloring-page generation job pipeline.
//!
//! One user request ("make N illustrated pages", "make one character
//! reference sheet") becomes a batch of independently-retried,
//! quality-checked, safety-checked artifact generations with accurate
//! usage billing and clean cancellation.
//!
//! The flow: a caller creates a [`model::Job`] with pending
//! [`model::JobItem`]s and fires [`trigger::trigger_generation_job`]. The
//! [`orchestrator::JobOrchestrator`] plans the pending items through the
//! [`planner`], processes them in bounded concurrent batches through the
//! [`generator`], persists finished artifacts, and finalizes billing on
//! every exit path. Completion is observed by polling the job record.

pub mod billing;
pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod postprocess;
pub mod quality;
pub mod safety;
pub mod services;
pub mod trigger;

pub use config::PipelineConfig;
pub use error::{ErrorCategory, GenerateError, PipelineError};
pub use orchestrator::{JobOrchestrator, PipelineServices};
pub use trigger::{trigger_generation_job, trigger_hero_job};
