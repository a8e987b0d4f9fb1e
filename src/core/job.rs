use crate::core::resources::{ResourceDemand, Resources};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use strum::{Display, EnumIter};

/// Position of a job in the list it was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl JobId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash, Display, EnumIter)]
pub enum JobState {
    #[strum(to_string = "Queued")]
    Queued,
    #[strum(to_string = "Scheduled")]
    Scheduled,
    #[strum(to_string = "Running")]
    Running,
    #[strum(to_string = "Completed")]
    Completed,
}

impl JobState {
    /// Transitions only move forward. A scheduled job may complete without
    /// ever being marked running (e.g. its launch was refused).
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Scheduled) | (Scheduled, Running) | (Scheduled, Completed) | (Running, Completed)
        )
    }

    pub fn is_admitted(self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Running)
    }
}

/// A unit of work: a fully resolved argument vector plus what it needs to run.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Job {
    pub command: Vec<String>,
    pub resources: Resources,
    pub cwd: Option<PathBuf>,
    /// Replaces the inherited environment when set.
    pub env: Option<HashMap<String, String>>,
    pub name: Option<String>,
}

impl Job {
    pub fn new(command: Vec<String>, resources: impl Into<Resources>) -> Self {
        Self {
            command,
            resources: resources.into(),
            cwd: None,
            env: None,
            name: None,
        }
    }

    pub fn builder() -> JobBuilder {
        JobBuilder::new()
    }

    #[inline]
    pub fn demand(&self) -> &ResourceDemand {
        &self.resources.demand
    }

    #[inline]
    pub fn wall_clock(&self) -> Option<Duration> {
        self.resources.wall_clock
    }

    /// Name for logs: the job name if any, else the program.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.command.first().map(String::as_str))
            .unwrap_or("<empty>")
    }
}

#[derive(Default)]
pub struct JobBuilder {
    command: Vec<String>,
    demand: Option<ResourceDemand>,
    wall_clock: Option<Duration>,
    memory: Option<u64>,
    cwd: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    name: Option<String>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn demand(mut self, demand: ResourceDemand) -> Self {
        self.demand = Some(demand);
        self
    }

    pub fn wall_clock(mut self, wall_clock: Option<Duration>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn memory(mut self, bytes: Option<u64>) -> Self {
        self.memory = bytes;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Jobs without an explicit demand ask for a single core.
    pub fn build(self) -> Job {
        let demand = self
            .demand
            .unwrap_or(ResourceDemand::Cores { n_cores: 1 });
        Job {
            command: self.command,
            resources: Resources {
                demand,
                wall_clock: self.wall_clock,
                memory: self.memory,
            },
            cwd: self.cwd,
            env: self.env,
            name: self.name,
        }
    }
}
