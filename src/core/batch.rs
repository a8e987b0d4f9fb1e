use crate::core::engine::Engine;
use crate::core::error::Result;
use crate::core::job::{Job, JobId};
use crate::core::pool::ResourcePool;
use crate::core::report::RunReport;

/// Collect jobs first, run them all at once.
///
/// ```no_run
/// use corun::core::{batch::LocalBatch, engine::{Engine, EngineConfig}, job::Job, pool::ResourcePool};
///
/// let mut batch = LocalBatch::new(Engine::process(EngineConfig::default()), ResourcePool::from_host());
/// batch.submit(Job::builder().command(["echo", "hello"]).build());
/// let report = batch.run_blocking().unwrap();
/// assert!(report.all_succeeded());
/// ```
pub struct LocalBatch {
    engine: Engine,
    pool: ResourcePool,
    jobs: Vec<Job>,
}

impl LocalBatch {
    pub fn new(engine: Engine, pool: ResourcePool) -> Self {
        Self {
            engine,
            pool,
            jobs: Vec::new(),
        }
    }

    /// Queue a job; the returned id is what the run report uses.
    pub fn submit(&mut self, job: Job) -> JobId {
        self.jobs.push(job);
        JobId(self.jobs.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub async fn run(self) -> Result<RunReport> {
        tracing::debug!("Running batch of {} job(s)", self.jobs.len());
        self.engine.run_jobs(self.jobs, self.pool).await
    }

    pub fn run_blocking(self) -> Result<RunReport> {
        self.engine.run_blocking(self.jobs, self.pool)
    }
}
