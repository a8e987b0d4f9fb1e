use crate::cli::{Commands, Corun, PoolArgs};
use anyhow::Context;
use clap::CommandFactory;
use clap_complete::generate;
use corun::config::{load_config, Config};

pub mod plan;
pub mod run;

/// Returns `false` when the run finished with failed jobs.
pub async fn handle_commands(
    config_path: &Option<std::path::PathBuf>,
    command: Commands,
) -> anyhow::Result<bool> {
    match command {
        Commands::Run {
            jobs,
            pool,
            output,
            job_log_dir,
            json,
        } => {
            let mut config = load_config(config_path.as_ref())?;
            apply_pool_args(&mut config, &pool)?;
            if let Some(output) = output {
                config.engine.output = output;
            }
            if job_log_dir.is_some() {
                config.engine.log_dir = job_log_dir;
            }
            return run::handle_run(&config, &jobs, json).await;
        }
        Commands::Plan { jobs, pool } => {
            let mut config = load_config(config_path.as_ref())?;
            apply_pool_args(&mut config, &pool)?;
            plan::handle_plan(&config, &jobs)?;
        }
        Commands::Completion { shell } => {
            let mut cmd = Corun::command();
            generate(shell, &mut cmd, "corun", &mut std::io::stdout());
        }
    }

    Ok(true)
}

/// CLI flags win over configuration values.
fn apply_pool_args(config: &mut Config, args: &PoolArgs) -> anyhow::Result<()> {
    if let Some(cores) = args.cores {
        config.pool.cores = Some(cores);
    }
    if let Some(gpus) = &args.gpus {
        let indices = corun::utils::parse_gpu_indices(gpus)
            .with_context(|| format!("Invalid --gpus value: {gpus}"))?;
        config.pool.gpus = Some(indices);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_args_override_config() {
        let mut config = Config::default();
        config.pool.cores = Some(2);
        config.pool.gpus = Some(vec![3]);

        apply_pool_args(
            &mut config,
            &PoolArgs {
                cores: Some(8),
                gpus: Some("0-1".to_string()),
            },
        )
        .unwrap();
        assert_eq!(config.pool.cores, Some(8));
        assert_eq!(config.pool.gpus, Some(vec![0, 1]));

        apply_pool_args(
            &mut config,
            &PoolArgs {
                cores: None,
                gpus: None,
            },
        )
        .unwrap();
        assert_eq!(config.pool.cores, Some(8));

        assert!(apply_pool_args(
            &mut config,
            &PoolArgs {
                cores: None,
                gpus: Some("gpu0".to_string()),
            },
        )
        .is_err());
    }
}
