use crate::core::engine::{EngineConfig, DEFAULT_GPU_ENV_VAR};
use crate::core::executor::OutputMode;
use crate::core::pool::ResourcePool;
use crate::core::{get_config_dir, get_log_dir};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PoolConfig {
    /// Cores available to jobs (None = host CPU count)
    #[serde(default)]
    pub cores: Option<u32>,
    /// GPU ids jobs may be given (None = no GPUs)
    #[serde(default)]
    pub gpus: Option<Vec<u32>>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Jobs write to this terminal
    #[default]
    Inherit,
    /// Job output is discarded
    Null,
    /// One log file per job
    Log,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineSettings {
    #[serde(default)]
    pub output: OutputKind,
    /// Directory for per-job logs when `output = "log"`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_gpu_env_var")]
    pub gpu_env_var: String,
    #[serde(default = "default_set_omp_threads")]
    pub set_omp_threads: bool,
}

fn default_gpu_env_var() -> String {
    DEFAULT_GPU_ENV_VAR.to_string()
}

fn default_set_omp_threads() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output: OutputKind::default(),
            log_dir: None,
            gpu_env_var: default_gpu_env_var(),
            set_omp_threads: default_set_omp_threads(),
        }
    }
}

impl Config {
    pub fn build_pool(&self) -> ResourcePool {
        let gpus = self.pool.gpus.clone().unwrap_or_default();
        match self.pool.cores {
            Some(cores) => ResourcePool::with_gpus(cores, gpus),
            None => ResourcePool::from_host_with_gpus(gpus),
        }
    }

    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let output = match self.engine.output {
            OutputKind::Inherit => OutputMode::Inherit,
            OutputKind::Null => OutputMode::Null,
            OutputKind::Log => OutputMode::Log {
                dir: match &self.engine.log_dir {
                    Some(dir) => dir.clone(),
                    None => get_log_dir()?,
                },
            },
        };
        Ok(EngineConfig {
            output,
            gpu_env_var: self.engine.gpu_env_var.clone(),
            set_omp_threads: self.engine.set_omp_threads,
        })
    }
}

/// Layer the explicit config file (if any), `<config_dir>/corun/corun.toml`
/// and `CORUN_*` environment variables, later sources winning.
///
/// Environment keys use `__` between sections, e.g. `CORUN_POOL__CORES=8` or
/// `CORUN_POOL__GPUS=0,1`.
pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("corun.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            tracing::warn!("Config file {config_path:?} not found.");
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("CORUN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pool.gpus"),
        )
        .build()?
        .try_deserialize()
}
