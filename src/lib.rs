//! Local, resource-aware job execution.
//!
//! Jobs declare what they need ([`ResourceDemand`]); a [`GreedySchedule`]
//! admits them against a fixed [`ResourcePool`] of cores and GPU ids, and the
//! [`Engine`] runs admitted jobs as concurrent OS processes, handing resources
//! back as each one exits.

pub mod config;
pub mod core;
pub mod utils;

pub use crate::core::batch::LocalBatch;
pub use crate::core::engine::{Engine, EngineConfig};
pub use crate::core::error::SchedError;
pub use crate::core::executor::{Executor, JobOutcome, OutputMode, ProcessExecutor};
pub use crate::core::job::{Job, JobId, JobState};
pub use crate::core::pool::{Grant, ResourcePool};
pub use crate::core::report::{JobReport, RunReport};
pub use crate::core::resources::{ComputeUnit, ResourceDemand, Resources};
pub use crate::core::schedule::{GreedySchedule, Schedule};
