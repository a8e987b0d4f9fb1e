use crate::core::job::JobId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Exited { code: i32 },
    /// Terminated by a signal (Unix only).
    Signaled { signal: i32 },
    /// The process never started: missing executable, bad cwd, unwritable log.
    SpawnFailed { reason: String },
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        matches!(self, JobOutcome::Exited { code: 0 })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobOutcome::Exited { code } => Some(*code),
            _ => None,
        }
    }

    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        JobOutcome::SpawnFailed {
            reason: reason.into(),
        }
    }
}

impl From<ExitStatus> for JobOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return JobOutcome::Exited { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return JobOutcome::Signaled { signal };
            }
        }
        JobOutcome::Exited { code: -1 }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Exited { code } => write!(f, "exit {code}"),
            JobOutcome::Signaled { signal } => write!(f, "signal {signal}"),
            JobOutcome::SpawnFailed { reason } => write!(f, "spawn failed: {reason}"),
        }
    }
}

/// Where a job's stdout and stderr go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Inherit,
    Null,
    /// Both streams to `<dir>/<job_id>.log`.
    Log { dir: PathBuf },
}

impl OutputMode {
    pub fn log_file_path(dir: &std::path::Path, job_id: JobId) -> PathBuf {
        dir.join(format!("{job_id}.log"))
    }

    fn stdio(&self, job_id: JobId) -> std::io::Result<(Stdio, Stdio)> {
        match self {
            OutputMode::Inherit => Ok((Stdio::inherit(), Stdio::inherit())),
            OutputMode::Null => Ok((Stdio::null(), Stdio::null())),
            OutputMode::Log { dir } => {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)?;
                }
                let file = File::create(Self::log_file_path(dir, job_id))?;
                let err = file.try_clone()?;
                Ok((Stdio::from(file), Stdio::from(err)))
            }
        }
    }
}

/// Everything needed to start one admitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub job_id: JobId,
    pub name: String,
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Replaces the inherited environment when set.
    pub env: Option<HashMap<String, String>>,
    /// Applied on top of whichever environment the job ends up with.
    pub env_overrides: BTreeMap<String, String>,
    pub gpu_ids: Vec<u32>,
}

impl LaunchSpec {
    /// Shell-quoted command line, for logs.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| shell_escape::escape(Cow::Borrowed(arg.as_str())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs one job to completion.
///
/// The engine spawns every call on its own task, so implementations only need
/// to care about a single job. Failures are part of the outcome, never a
/// panic or an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, spec: LaunchSpec) -> JobOutcome;
}

/// One OS process per job, started directly from the argument vector.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    output: OutputMode,
}

impl ProcessExecutor {
    pub fn new(output: OutputMode) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &OutputMode {
        &self.output
    }

    fn build_command(&self, spec: &LaunchSpec) -> Result<tokio::process::Command, String> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &spec.env {
            cmd.env_clear();
            cmd.envs(env);
        }
        cmd.envs(&spec.env_overrides);

        let (stdout, stderr) = self
            .output
            .stdio(spec.job_id)
            .map_err(|e| format!("failed to set up output for job {}: {e}", spec.job_id))?;
        cmd.stdout(stdout).stderr(stderr);
        Ok(cmd)
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, spec: LaunchSpec) -> JobOutcome {
        let mut cmd = match self.build_command(&spec) {
            Ok(cmd) => cmd,
            Err(reason) => return JobOutcome::spawn_failed(reason),
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return JobOutcome::spawn_failed(format!(
                    "failed to start `{}`: {e}",
                    spec.command_line()
                ))
            }
        };

        tracing::debug!(
            "Job {} ({}) started as pid {:?}",
            spec.job_id,
            spec.name,
            child.id()
        );

        match child.wait().await {
            Ok(status) => JobOutcome::from(status),
            Err(e) => {
                JobOutcome::spawn_failed(format!("failed to wait for job {}: {e}", spec.job_id))
            }
        }
    }
}
