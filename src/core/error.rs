use crate::core::job::{JobId, JobState};

pub type Result<T> = std::result::Result<T, SchedError>;

/// Faults that abort a run.
///
/// Individual job failures are never reported through this type; they land in
/// the run report instead.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// Nothing is in flight and no pending job fits the pool.
    #[error(
        "admission deadlock: {pending} job(s) pending but none fit a pool of {total_cores} core(s) and {total_gpus} GPU(s)"
    )]
    AdmissionDeadlock {
        pending: usize,
        total_cores: u32,
        total_gpus: usize,
    },

    /// A grant was released that the pool does not hold, or a job was
    /// completed without holding one.
    #[error("resource accounting error: {0}")]
    ResourceAccounting(String),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("invalid resource demand: {0}")]
    InvalidDemand(String),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
