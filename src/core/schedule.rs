use crate::core::error::{Result, SchedError};
use crate::core::job::{Job, JobId, JobState};
use crate::core::pool::{Grant, ResourcePool};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

/// A job that has been admitted: its resources are reserved until
/// [`Schedule::complete`] is called for `job_id`.
#[derive(Debug, Clone)]
pub struct Admission {
    pub job_id: JobId,
    pub job: Arc<Job>,
    pub cores: u32,
    pub gpu_ids: Vec<u32>,
}

/// Running totals, mostly useful for checking that every admitted job was
/// completed and every acquired core came back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub admitted: usize,
    pub completed: usize,
    pub cores_acquired: u64,
    pub cores_released: u64,
}

/// Admission policy driven by the engine.
///
/// Implementations are used from a single coordinating task and are never
/// re-entered.
pub trait Schedule {
    /// True once every job has been admitted. Says nothing about whether the
    /// admitted jobs have finished.
    fn empty(&self) -> bool;

    /// Admit the highest-priority job that fits right now, if any.
    ///
    /// `None` is the normal "nothing fits yet" answer, not an error.
    fn next_job(&mut self) -> Option<Admission>;

    /// Record that an admitted job has been launched.
    fn mark_running(&mut self, job_id: JobId) -> Result<()>;

    /// Mark the job completed and hand its resources back to the pool.
    fn complete(&mut self, job_id: JobId) -> Result<()>;

    /// Number of jobs not yet admitted.
    fn pending(&self) -> usize;

    fn pool(&self) -> &ResourcePool;
}

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    grant: Option<Grant>,
}

/// Longest-job-first greedy admission.
///
/// The priority order is computed once: descending wall-clock allowance (no
/// allowance sorts as zero), then descending core count, then submission
/// order. Each [`next_job`](Schedule::next_job) call walks the pending jobs in
/// that order and admits the first one the pool can satisfy, letting smaller
/// jobs backfill around large ones.
#[derive(Debug)]
pub struct GreedySchedule {
    pool: ResourcePool,
    jobs: Vec<Arc<Job>>,
    records: Vec<JobRecord>,
    order: Vec<JobId>,
    /// Unadmitted jobs, in priority order.
    pending: Vec<JobId>,
    stats: ScheduleStats,
}

impl GreedySchedule {
    pub fn new(jobs: impl IntoIterator<Item = Job>, pool: ResourcePool) -> Self {
        let jobs: Vec<Arc<Job>> = jobs.into_iter().map(Arc::new).collect();

        let mut order: Vec<JobId> = (0..jobs.len()).map(JobId).collect();
        order.sort_by_key(|id| {
            let job = &jobs[id.index()];
            Reverse((
                job.wall_clock().unwrap_or(Duration::ZERO),
                job.demand().core_count(),
            ))
        });

        let records = jobs
            .iter()
            .map(|_| JobRecord {
                state: JobState::Queued,
                grant: None,
            })
            .collect();

        tracing::debug!("Computed priority order for {} job(s): {:?}", jobs.len(), order);

        Self {
            pool,
            pending: order.clone(),
            order,
            jobs,
            records,
            stats: ScheduleStats::default(),
        }
    }

    /// Job ids from highest to lowest priority.
    pub fn priority_order(&self) -> &[JobId] {
        &self.order
    }

    pub fn job(&self, job_id: JobId) -> Option<&Arc<Job>> {
        self.jobs.get(job_id.index())
    }

    pub fn state(&self, job_id: JobId) -> Option<JobState> {
        self.records.get(job_id.index()).map(|r| r.state)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs admitted and not yet completed.
    pub fn in_use(&self) -> usize {
        self.records.iter().filter(|r| r.state.is_admitted()).count()
    }

    pub fn stats(&self) -> ScheduleStats {
        self.stats
    }

    pub fn into_pool(self) -> ResourcePool {
        self.pool
    }

    fn record_mut(&mut self, job_id: JobId) -> Result<&mut JobRecord> {
        self.records
            .get_mut(job_id.index())
            .ok_or(SchedError::UnknownJob(job_id))
    }

    fn transition(record: &mut JobRecord, job_id: JobId, to: JobState) -> Result<()> {
        if !record.state.can_transition_to(to) {
            return Err(SchedError::InvalidTransition {
                job_id,
                from: record.state,
                to,
            });
        }
        record.state = to;
        Ok(())
    }
}

impl Schedule for GreedySchedule {
    fn empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn next_job(&mut self) -> Option<Admission> {
        let (position, grant) = self.pending.iter().enumerate().find_map(|(pos, id)| {
            let demand = self.jobs[id.index()].demand();
            self.pool.acquire(demand).map(|grant| (pos, grant))
        })?;

        let job_id = self.pending.remove(position);
        let admission = Admission {
            job_id,
            job: Arc::clone(&self.jobs[job_id.index()]),
            cores: grant.cores(),
            gpu_ids: grant.gpu_ids().to_vec(),
        };

        self.stats.admitted += 1;
        self.stats.cores_acquired += u64::from(grant.cores());

        let record = &mut self.records[job_id.index()];
        debug_assert_eq!(record.state, JobState::Queued);
        record.state = JobState::Scheduled;
        record.grant = Some(grant);

        tracing::debug!(
            "Admitted job {} ({}) with {} core(s); {} pending",
            job_id,
            admission.job.display_name(),
            admission.cores,
            self.pending.len()
        );
        Some(admission)
    }

    fn mark_running(&mut self, job_id: JobId) -> Result<()> {
        let record = self.record_mut(job_id)?;
        Self::transition(record, job_id, JobState::Running)
    }

    fn complete(&mut self, job_id: JobId) -> Result<()> {
        let record = self.record_mut(job_id)?;
        if !record.state.is_admitted() {
            return Err(SchedError::ResourceAccounting(format!(
                "job {job_id} completed while {}",
                record.state
            )));
        }
        let grant = record.grant.take().ok_or_else(|| {
            SchedError::ResourceAccounting(format!("job {job_id} holds no grant"))
        })?;
        Self::transition(record, job_id, JobState::Completed)?;

        let cores = grant.cores();
        self.pool.release(grant)?;
        self.stats.completed += 1;
        self.stats.cores_released += u64::from(cores);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn pool(&self) -> &ResourcePool {
        &self.pool
    }
}
