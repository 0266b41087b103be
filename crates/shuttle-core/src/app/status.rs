//! JobStatusRegistry - process-wide state of the front-end's background jobs.
//!
//! One registry is created at startup and shared by `Arc`; all reads and
//! writes go through it.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::info;

use crate::domain::{JobInfo, JobName, JobStatus};

#[derive(Debug)]
pub struct JobStatusRegistry {
    jobs: RwLock<BTreeMap<JobName, JobInfo>>,
}

impl JobStatusRegistry {
    /// Every known job, paused.
    pub fn new() -> Self {
        let jobs = JobName::ALL
            .into_iter()
            .map(|name| (name, JobInfo::new(JobStatus::Paused, name.image())))
            .collect();
        Self {
            jobs: RwLock::new(jobs),
        }
    }

    pub fn update_status(&self, name: JobName, status: JobStatus) {
        let mut jobs = self.jobs.write();
        jobs.entry(name)
            .or_insert_with(|| JobInfo::new(status, name.image()))
            .status = status;
        info!(job = %name, ?status, "job status updated");
    }

    /// Flip Paused/Running and return the new status.
    pub fn toggle(&self, name: JobName) -> JobStatus {
        let mut jobs = self.jobs.write();
        let info = jobs
            .entry(name)
            .or_insert_with(|| JobInfo::new(JobStatus::Paused, name.image()));
        info.status = info.status.toggled();
        info!(job = %name, status = ?info.status, "job status toggled");
        info.status
    }

    pub fn get(&self, name: JobName) -> Option<JobInfo> {
        self.jobs.read().get(&name).cloned()
    }

    pub fn all(&self) -> BTreeMap<JobName, JobInfo> {
        self.jobs.read().clone()
    }
}

impl Default for JobStatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
