use crate::jobfile::load_jobs;
use anyhow::Result;
use corun::config::Config;
use corun::core::schedule::{GreedySchedule, Schedule};
use corun::utils::format_duration;
use owo_colors::OwoColorize;
use std::path::Path;
use tabled::{builder::Builder, settings::style::Style};

pub fn handle_plan(config: &Config, jobs_path: &Path) -> Result<()> {
    let jobs = load_jobs(jobs_path)?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    let schedule = GreedySchedule::new(jobs, config.build_pool());
    println!("{}", render_plan(&schedule));
    Ok(())
}

/// Jobs in the order admission considers them.
fn render_plan(schedule: &GreedySchedule) -> String {
    let mut builder = Builder::default();
    builder.push_record(["ORDER", "ID", "NAME", "CORES", "GPUS", "WALL CLOCK", "FITS"]);

    let pool = schedule.pool();
    for (position, &job_id) in schedule.priority_order().iter().enumerate() {
        let Some(job) = schedule.job(job_id) else {
            continue;
        };
        let fits = if pool.could_ever_fit(job.demand()) {
            "yes".green().to_string()
        } else {
            "never".red().to_string()
        };
        builder.push_record([
            position.to_string(),
            job_id.to_string(),
            job.display_name().to_string(),
            job.demand().core_count().to_string(),
            job.demand().gpu_count().to_string(),
            job.wall_clock()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            fits,
        ]);
    }

    builder.build().with(Style::rounded()).to_string()
}
