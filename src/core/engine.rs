use crate::core::error::{Result, SchedError};
use crate::core::executor::{Executor, JobOutcome, LaunchSpec, OutputMode, ProcessExecutor};
use crate::core::job::{Job, JobId};
use crate::core::pool::ResourcePool;
use crate::core::report::{JobReport, RunReport};
use crate::core::schedule::{Admission, GreedySchedule, Schedule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::{Id, JoinSet};

pub const DEFAULT_GPU_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";
const OMP_ENV_VAR: &str = "OMP_NUM_THREADS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where job output goes when the engine builds its own executor.
    pub output: OutputMode,
    /// Variable that receives the comma-joined GPU ids granted to a job.
    pub gpu_env_var: String,
    /// Export `OMP_NUM_THREADS` for OpenMP jobs that do not set it.
    pub set_omp_threads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::default(),
            gpu_env_var: DEFAULT_GPU_ENV_VAR.to_string(),
            set_omp_threads: true,
        }
    }
}

/// A job that finished, as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    pub finished_at: SystemTime,
}

/// The set of launched, unfinished jobs.
///
/// Each job runs on its own tokio task; completions come back in the order
/// they actually finish.
#[derive(Default)]
pub struct InFlight {
    tasks: JoinSet<Completion>,
    ids: HashMap<Id, JobId>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch(&mut self, executor: Arc<dyn Executor>, spec: LaunchSpec) {
        let job_id = spec.job_id;
        let handle = self.tasks.spawn(async move {
            let outcome = executor.run(spec).await;
            Completion {
                job_id,
                outcome,
                finished_at: SystemTime::now(),
            }
        });
        self.ids.insert(handle.id(), job_id);
    }

    /// Wait for whichever job finishes first. `None` when nothing is in flight.
    pub async fn wait_any(&mut self) -> Option<Completion> {
        let joined = self.tasks.join_next_with_id().await?;
        let completion = match joined {
            Ok((id, completion)) => {
                self.ids.remove(&id);
                completion
            }
            Err(e) => {
                let job_id = self.ids.remove(&e.id())?;
                tracing::error!("Task for job {} did not finish: {}", job_id, e);
                Completion {
                    job_id,
                    outcome: JobOutcome::spawn_failed(format!("job task failed: {e}")),
                    finished_at: SystemTime::now(),
                }
            }
        };
        Some(completion)
    }

    /// Wait for every job still in flight, in finish order.
    pub async fn wait_all(&mut self) -> Vec<Completion> {
        let mut done = Vec::with_capacity(self.len());
        while let Some(completion) = self.wait_any().await {
            done.push(completion);
        }
        done
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

struct Started {
    name: String,
    cores: u32,
    gpu_ids: Vec<u32>,
    started_at: SystemTime,
}

/// Drives a [`Schedule`]: admits what fits, launches it, and feeds
/// completions back until every job has run.
///
/// Concurrency is bounded only by the schedule's pool. A failing job never
/// stops the run; only scheduling faults do.
pub struct Engine {
    executor: Arc<dyn Executor>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_config(executor, EngineConfig::default())
    }

    pub fn with_config(executor: Arc<dyn Executor>, config: EngineConfig) -> Self {
        Self { executor, config }
    }

    /// An engine that runs jobs as OS processes.
    pub fn process(config: EngineConfig) -> Self {
        let executor = Arc::new(ProcessExecutor::new(config.output.clone()));
        Self::with_config(executor, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn launch_spec(&self, admission: &Admission) -> LaunchSpec {
        let job = &admission.job;
        let mut env_overrides = BTreeMap::new();

        if !admission.gpu_ids.is_empty() {
            let ids = admission
                .gpu_ids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            env_overrides.insert(self.config.gpu_env_var.clone(), ids);
        }

        if self.config.set_omp_threads {
            if let Some(threads) = job.demand().omp_threads() {
                let already_set = job
                    .env
                    .as_ref()
                    .is_some_and(|env| env.contains_key(OMP_ENV_VAR));
                if !already_set {
                    env_overrides.insert(OMP_ENV_VAR.to_string(), threads.to_string());
                }
            }
        }

        LaunchSpec {
            job_id: admission.job_id,
            name: job.display_name().to_string(),
            command: job.command.clone(),
            cwd: job.cwd.clone(),
            env: job.env.clone(),
            env_overrides,
            gpu_ids: admission.gpu_ids.clone(),
        }
    }

    /// Run every job of `schedule` to completion.
    ///
    /// Fails fast with [`SchedError::AdmissionDeadlock`] when nothing is
    /// running and nothing pending fits, and with an accounting error if the
    /// schedule's bookkeeping is violated.
    pub async fn run<S: Schedule + ?Sized>(&self, schedule: &mut S) -> Result<RunReport> {
        let mut in_flight = InFlight::new();
        let mut started: HashMap<JobId, Started> = HashMap::new();
        let mut report = RunReport::default();

        while !schedule.empty() {
            if let Some(admission) = schedule.next_job() {
                let spec = self.launch_spec(&admission);
                tracing::info!(
                    "Launching job {} ({}) on {} core(s){}: {}",
                    spec.job_id,
                    spec.name,
                    admission.cores,
                    if spec.gpu_ids.is_empty() {
                        String::new()
                    } else {
                        format!(", GPUs {:?}", spec.gpu_ids)
                    },
                    spec.command_line()
                );
                started.insert(
                    admission.job_id,
                    Started {
                        name: spec.name.clone(),
                        cores: admission.cores,
                        gpu_ids: admission.gpu_ids.clone(),
                        started_at: SystemTime::now(),
                    },
                );
                in_flight.launch(Arc::clone(&self.executor), spec);
                schedule.mark_running(admission.job_id)?;
                continue;
            }

            if in_flight.is_empty() {
                let pool = schedule.pool();
                let err = SchedError::AdmissionDeadlock {
                    pending: schedule.pending(),
                    total_cores: pool.total_cores(),
                    total_gpus: pool.total_gpus(),
                };
                tracing::error!("{}", err);
                return Err(err);
            }

            tracing::debug!(
                "Nothing admissible, waiting on {} running job(s)",
                in_flight.len()
            );
            if let Some(completion) = in_flight.wait_any().await {
                Self::finish(schedule, &mut started, &mut report, completion)?;
            }
        }

        for completion in in_flight.wait_all().await {
            Self::finish(schedule, &mut started, &mut report, completion)?;
        }

        let failed = report.failures().count();
        tracing::info!(
            "Run finished: {} job(s), {} failed",
            report.len(),
            failed
        );
        Ok(report)
    }

    fn finish<S: Schedule + ?Sized>(
        schedule: &mut S,
        started: &mut HashMap<JobId, Started>,
        report: &mut RunReport,
        completion: Completion,
    ) -> Result<()> {
        schedule.complete(completion.job_id)?;
        let info = started.remove(&completion.job_id).ok_or_else(|| {
            SchedError::ResourceAccounting(format!(
                "job {} finished but was never launched",
                completion.job_id
            ))
        })?;

        if completion.outcome.success() {
            tracing::info!("Job {} ({}) finished", completion.job_id, info.name);
        } else {
            tracing::warn!(
                "Job {} ({}) failed: {}",
                completion.job_id,
                info.name,
                completion.outcome
            );
        }

        report.push(JobReport {
            job_id: completion.job_id,
            name: info.name,
            outcome: completion.outcome,
            cores: info.cores,
            gpu_ids: info.gpu_ids,
            started_at: info.started_at,
            finished_at: completion.finished_at,
        });
        Ok(())
    }

    /// Greedy-schedule `jobs` against `pool` and run them.
    pub async fn run_jobs(
        &self,
        jobs: impl IntoIterator<Item = Job>,
        pool: ResourcePool,
    ) -> Result<RunReport> {
        let mut schedule = GreedySchedule::new(jobs, pool);
        self.run(&mut schedule).await
    }

    /// Like [`run_jobs`](Self::run_jobs) on a private runtime, for callers
    /// without one. Must not be called from inside an async context.
    pub fn run_blocking(
        &self,
        jobs: impl IntoIterator<Item = Job>,
        pool: ResourcePool,
    ) -> Result<RunReport> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_jobs(jobs, pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::MockExecutor;
    use crate::core::resources::{ComputeUnit, ResourceDemand};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Start(JobId),
        End(JobId),
    }

    /// Sleeps instead of spawning, recording start/end order and the peak
    /// number of cores in use.
    #[derive(Default)]
    struct RecordingExecutor {
        events: Mutex<Vec<Event>>,
        cores: Mutex<HashMap<JobId, u32>>,
        in_use: AtomicU32,
        peak: AtomicU32,
        fail: Vec<JobId>,
    }

    impl RecordingExecutor {
        fn with_cores(cores: &[(usize, u32)]) -> Self {
            Self {
                cores: Mutex::new(cores.iter().map(|&(id, c)| (JobId(id), c)).collect()),
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn run(&self, spec: LaunchSpec) -> JobOutcome {
            let cores = self
                .cores
                .lock()
                .unwrap()
                .get(&spec.job_id)
                .copied()
                .unwrap_or(1);
            let now = self.in_use.fetch_add(cores, Ordering::SeqCst) + cores;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.events.lock().unwrap().push(Event::Start(spec.job_id));

            tokio::time::sleep(Duration::from_millis(20)).await;

            self.events.lock().unwrap().push(Event::End(spec.job_id));
            self.in_use.fetch_sub(cores, Ordering::SeqCst);
            if self.fail.contains(&spec.job_id) {
                JobOutcome::Exited { code: 1 }
            } else {
                JobOutcome::Exited { code: 0 }
            }
        }
    }

    fn cores_job(cores: u32) -> Job {
        Job::builder()
            .command(["true"])
            .demand(ResourceDemand::cores(cores).unwrap())
            .build()
    }

    fn position(events: &[Event], event: Event) -> usize {
        events.iter().position(|e| *e == event).unwrap()
    }

    #[tokio::test]
    async fn test_fifth_job_waits_for_a_free_core() {
        let exec = Arc::new(RecordingExecutor::default());
        let engine = Engine::new(exec.clone());

        let report = engine
            .run_jobs((0..5).map(|_| cores_job(1)), ResourcePool::new(4))
            .await
            .unwrap();

        assert_eq!(report.len(), 5);
        assert!(report.all_succeeded());

        let events = exec.events();
        let first_end = events
            .iter()
            .position(|e| matches!(e, Event::End(_)))
            .unwrap();
        for id in 0..4 {
            assert!(position(&events, Event::Start(JobId(id))) < first_end);
        }
        assert!(position(&events, Event::Start(JobId(4))) > first_end);
        assert!(exec.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_jobs_filling_the_pool_run_one_at_a_time() {
        let exec = Arc::new(RecordingExecutor::with_cores(&[(0, 2), (1, 2)]));
        let engine = Engine::new(exec.clone());

        let report = engine
            .run_jobs(vec![cores_job(2), cores_job(2)], ResourcePool::new(2))
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(
            exec.events(),
            vec![
                Event::Start(JobId(0)),
                Event::End(JobId(0)),
                Event::Start(JobId(1)),
                Event::End(JobId(1)),
            ]
        );
        assert_eq!(exec.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_core_usage_never_exceeds_capacity() {
        let demands = [3u32, 1, 2, 4, 1, 1, 2, 3, 1, 2];
        let exec = Arc::new(RecordingExecutor::with_cores(
            &demands.iter().copied().enumerate().collect::<Vec<_>>(),
        ));
        let engine = Engine::new(exec.clone());
        let mut schedule = GreedySchedule::new(
            demands.iter().map(|&c| cores_job(c)),
            ResourcePool::new(4),
        );

        let report = engine.run(&mut schedule).await.unwrap();

        assert_eq!(report.len(), demands.len());
        assert!(exec.peak.load(Ordering::SeqCst) <= 4);

        let stats = schedule.stats();
        assert_eq!(stats.admitted, demands.len());
        assert_eq!(stats.completed, demands.len());
        assert_eq!(stats.cores_acquired, stats.cores_released);
        assert_eq!(schedule.pool().available_cores(), 4);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_run() {
        let exec = Arc::new(RecordingExecutor {
            fail: vec![JobId(1)],
            ..Default::default()
        });
        let engine = Engine::new(exec);

        let report = engine
            .run_jobs((0..3).map(|_| cores_job(1)), ResourcePool::new(1))
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        let failed: Vec<JobId> = report.failures().map(|r| r.job_id).collect();
        assert_eq!(failed, vec![JobId(1)]);
        assert_eq!(report.get(JobId(1)).unwrap().exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_oversized_job_deadlocks() {
        let engine = Engine::new(Arc::new(RecordingExecutor::default()));
        let err = engine
            .run_jobs(vec![cores_job(1), cores_job(8)], ResourcePool::new(4))
            .await
            .unwrap_err();

        match err {
            SchedError::AdmissionDeadlock {
                pending,
                total_cores,
                ..
            } => {
                assert_eq!(pending, 1);
                assert_eq!(total_cores, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_deadlocks() {
        let engine = Engine::new(Arc::new(RecordingExecutor::default()));
        let err = engine
            .run_jobs(vec![cores_job(1)], ResourcePool::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::AdmissionDeadlock { .. }));
    }

    #[tokio::test]
    async fn test_no_jobs_is_an_empty_report() {
        let engine = Engine::new(Arc::new(RecordingExecutor::default()));
        let report = engine
            .run_jobs(Vec::new(), ResourcePool::new(0))
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_executor_called_once_per_job() {
        let mut mock = MockExecutor::new();
        mock.expect_run()
            .times(3)
            .returning(|_| JobOutcome::Exited { code: 0 });
        let engine = Engine::new(Arc::new(mock));

        let report = engine
            .run_jobs((0..3).map(|_| cores_job(1)), ResourcePool::new(2))
            .await
            .unwrap();
        assert_eq!(report.len(), 3);
    }

    #[tokio::test]
    async fn test_panicked_job_task_is_spawn_failure() {
        let mut mock = MockExecutor::new();
        mock.expect_run().times(3).returning(|spec| {
            if spec.job_id == JobId(0) {
                panic!("boom");
            }
            JobOutcome::Exited { code: 0 }
        });
        let engine = Engine::new(Arc::new(mock));
        let mut schedule =
            GreedySchedule::new((0..3).map(|_| cores_job(1)), ResourcePool::new(1));

        let report = engine.run(&mut schedule).await.unwrap();

        assert_eq!(report.len(), 3);
        assert!(matches!(
            report.get(JobId(0)).unwrap().outcome,
            JobOutcome::SpawnFailed { .. }
        ));
        assert!(!report.all_succeeded());
        assert_eq!(schedule.pool().available_cores(), 1);
        assert_eq!(schedule.pool().outstanding(), 0);
        assert_eq!(schedule.stats().completed, 3);
    }

    #[tokio::test]
    async fn test_launch_spec_environment() {
        let engine = Engine::new(Arc::new(MockExecutor::new()));
        let omp = Job::builder()
            .command(["solver"])
            .demand(ResourceDemand::mpi_omp(ComputeUnit::new(1, 4).unwrap(), 2).unwrap())
            .build();
        let mut schedule = GreedySchedule::new(
            vec![omp, Job::builder().command(["train"]).demand(ResourceDemand::gpus(2)).build()],
            ResourcePool::with_gpus(16, [3, 5, 7]),
        );

        let first = schedule.next_job().unwrap();
        let spec = engine.launch_spec(&first);
        assert_eq!(spec.env_overrides.get(OMP_ENV_VAR).map(String::as_str), Some("4"));
        assert!(!spec.env_overrides.contains_key(DEFAULT_GPU_ENV_VAR));

        let second = schedule.next_job().unwrap();
        let spec = engine.launch_spec(&second);
        assert_eq!(
            spec.env_overrides.get(DEFAULT_GPU_ENV_VAR).map(String::as_str),
            Some("3,5")
        );
        assert_eq!(spec.gpu_ids, vec![3, 5]);
    }

    #[tokio::test]
    async fn test_explicit_omp_threads_are_kept() {
        let engine = Engine::new(Arc::new(MockExecutor::new()));
        let job = Job::builder()
            .command(["solver"])
            .demand(ResourceDemand::omp(8).unwrap())
            .env(HashMap::from([(OMP_ENV_VAR.to_string(), "2".to_string())]))
            .build();
        let mut schedule = GreedySchedule::new(vec![job], ResourcePool::new(8));
        let spec = engine.launch_spec(&schedule.next_job().unwrap());
        assert!(!spec.env_overrides.contains_key(OMP_ENV_VAR));
    }

    #[tokio::test]
    async fn test_real_processes_with_spawn_failure() {
        let engine = Engine::process(EngineConfig {
            output: OutputMode::Null,
            ..Default::default()
        });
        let jobs = vec![
            Job::builder().command(["true"]).build(),
            Job::builder().command(["false"]).build(),
            Job::builder().command(["/no/such/binary"]).build(),
            Job::builder().command(["sh", "-c", "exit 3"]).build(),
        ];

        let report = engine.run_jobs(jobs, ResourcePool::new(2)).await.unwrap();

        assert_eq!(report.len(), 4);
        assert!(report.get(JobId(0)).unwrap().success());
        assert_eq!(report.get(JobId(1)).unwrap().exit_code(), Some(1));
        assert!(matches!(
            report.get(JobId(2)).unwrap().outcome,
            JobOutcome::SpawnFailed { .. }
        ));
        assert_eq!(report.get(JobId(3)).unwrap().exit_code(), Some(3));
    }

    #[test]
    fn test_run_blocking() {
        let engine = Engine::process(EngineConfig {
            output: OutputMode::Null,
            ..Default::default()
        });
        let report = engine
            .run_blocking((0..3).map(|_| cores_job(1)), ResourcePool::new(2))
            .unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.len(), 3);
    }

    #[tokio::test]
    async fn test_in_flight_wait_any_and_all() {
        let exec: Arc<dyn Executor> = Arc::new(RecordingExecutor::default());
        let mut in_flight = InFlight::new();
        assert!(in_flight.wait_any().await.is_none());

        let engine = Engine::new(exec.clone());
        let mut schedule = GreedySchedule::new((0..3).map(|_| cores_job(1)), ResourcePool::new(3));
        while let Some(a) = schedule.next_job() {
            in_flight.launch(exec.clone(), engine.launch_spec(&a));
        }
        assert_eq!(in_flight.len(), 3);

        let first = in_flight.wait_any().await.unwrap();
        assert!(first.outcome.success());
        assert_eq!(in_flight.len(), 2);

        let rest = in_flight.wait_all().await;
        assert_eq!(rest.len(), 2);
        assert!(in_flight.is_empty());
    }
}
