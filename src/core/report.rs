use crate::core::executor::JobOutcome;
use crate::core::job::JobId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Final status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub name: String,
    pub outcome: JobOutcome,
    pub cores: u32,
    pub gpu_ids: Vec<u32>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl JobReport {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.exit_code()
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

/// Outcome of a whole run, one record per job in the order they finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    records: Vec<JobReport>,
}

impl RunReport {
    pub(crate) fn push(&mut self, record: JobReport) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in completion order.
    pub fn iter(&self) -> std::slice::Iter<'_, JobReport> {
        self.records.iter()
    }

    pub fn all_succeeded(&self) -> bool {
        self.records.iter().all(JobReport::success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.records.iter().filter(|r| !r.success())
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobReport> {
        self.records.iter().find(|r| r.job_id == job_id)
    }

    /// Records sorted by job id, i.e. submission order.
    pub fn by_job_id(&self) -> Vec<&JobReport> {
        let mut sorted: Vec<&JobReport> = self.records.iter().collect();
        sorted.sort_by_key(|r| r.job_id);
        sorted
    }

    /// `(job_id, exit_code)` pairs in completion order. Jobs that never
    /// exited normally have no code.
    pub fn exit_codes(&self) -> Vec<(JobId, Option<i32>)> {
        self.records
            .iter()
            .map(|r| (r.job_id, r.exit_code()))
            .collect()
    }

    pub fn into_records(self) -> Vec<JobReport> {
        self.records
    }
}

impl<'a> IntoIterator for &'a RunReport {
    type Item = &'a JobReport;
    type IntoIter = std::slice::Iter<'a, JobReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
