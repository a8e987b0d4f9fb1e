use anyhow::{anyhow, Context, Result};
use corun::core::job::Job;
use corun::core::resources::ResourceDemand;
use corun::utils::{parse_memory, parse_time_limit};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobFile {
    #[serde(default, rename = "job")]
    jobs: Vec<JobEntry>,
}

/// Either an argument vector run as-is or a single string handed to `sh -c`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Argv(Vec<String>),
    Shell(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobEntry {
    command: CommandSpec,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default = "default_demand")]
    resources: ResourceDemand,
    #[serde(default)]
    wall_clock: Option<String>,
    #[serde(default)]
    memory: Option<String>,
}

fn default_demand() -> ResourceDemand {
    ResourceDemand::Cores { n_cores: 1 }
}

impl JobEntry {
    fn into_job(self) -> Result<Job> {
        let command = match self.command {
            CommandSpec::Argv(argv) => argv,
            CommandSpec::Shell(line) => vec!["sh".to_string(), "-c".to_string(), line],
        };
        if command.first().map_or(true, |program| program.is_empty()) {
            return Err(anyhow!("command cannot be empty"));
        }

        let wall_clock = self
            .wall_clock
            .as_deref()
            .map(parse_time_limit)
            .transpose()?;
        let memory = self.memory.as_deref().map(parse_memory).transpose()?;

        let mut builder = Job::builder()
            .command(command)
            .demand(self.resources)
            .wall_clock(wall_clock)
            .memory(memory);
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(cwd) = self.cwd {
            builder = builder.cwd(cwd);
        }
        if let Some(env) = self.env {
            builder = builder.env(env);
        }
        Ok(builder.build())
    }
}

/// Parse job-file content; job ids follow table order.
pub fn parse_jobs(content: &str) -> Result<Vec<Job>> {
    let file: JobFile = toml::from_str(content).context("Invalid job file")?;
    file.jobs
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            entry
                .into_job()
                .with_context(|| format!("Invalid job #{index}"))
        })
        .collect()
}

pub fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    parse_jobs(&content).with_context(|| format!("Failed to load {}", path.display()))
}
