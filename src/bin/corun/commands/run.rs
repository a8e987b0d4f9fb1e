use crate::jobfile::load_jobs;
use anyhow::{Context, Result};
use corun::config::Config;
use corun::core::batch::LocalBatch;
use corun::core::engine::Engine;
use corun::core::report::RunReport;
use corun::utils::format_elapsed;
use owo_colors::OwoColorize;
use std::path::Path;
use tabled::{builder::Builder, settings::style::Style};

pub async fn handle_run(config: &Config, jobs_path: &Path, json: bool) -> Result<bool> {
    let jobs = load_jobs(jobs_path)?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(true);
    }

    let pool = config.build_pool();
    tracing::info!(
        "Running {} job(s) on {} core(s), GPUs {:?}",
        jobs.len(),
        pool.total_cores(),
        pool.free_gpus()
    );

    let engine = Engine::process(config.engine_config()?);
    let mut batch = LocalBatch::new(engine, pool);
    for job in jobs {
        batch.submit(job);
    }

    let report = batch
        .run()
        .await
        .with_context(|| format!("Run of {} aborted", jobs_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_summary(&report));
    }

    let failed = report.failures().count();
    if failed > 0 {
        eprintln!(
            "{}",
            format!("{failed} of {} job(s) failed", report.len()).red()
        );
    }
    Ok(report.all_succeeded())
}

/// One row per job in submission order.
fn render_summary(report: &RunReport) -> String {
    let mut builder = Builder::default();
    builder.push_record(["ID", "NAME", "CORES", "GPUS", "ELAPSED", "RESULT"]);

    for record in report.by_job_id() {
        let gpus = if record.gpu_ids.is_empty() {
            "-".to_string()
        } else {
            record
                .gpu_ids
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let result = if record.success() {
            "ok".green().to_string()
        } else {
            record.outcome.to_string().red().to_string()
        };

        builder.push_record([
            record.job_id.to_string(),
            record.name.clone(),
            record.cores.to_string(),
            gpus,
            format_elapsed(record.elapsed()),
            result,
        ]);
    }

    builder.build().with(Style::rounded()).to_string()
}
