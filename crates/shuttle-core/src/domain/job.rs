//! Background job descriptors shown by the front-end.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of jobs the front-end knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobName {
    AirJob,
    BoatJob,
    SunJob,
    TruckJob,
}

impl JobName {
    pub const ALL: [JobName; 4] = [
        JobName::AirJob,
        JobName::BoatJob,
        JobName::SunJob,
        JobName::TruckJob,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobName::AirJob => "AirJob",
            JobName::BoatJob => "BoatJob",
            JobName::SunJob => "SunJob",
            JobName::TruckJob => "TruckJob",
        }
    }

    /// Icon shown next to the job.
    pub fn image(self) -> &'static str {
        match self {
            JobName::AirJob => "airplane.svg",
            JobName::BoatJob => "sailingBoat.svg",
            JobName::SunJob => "sunChair.svg",
            JobName::TruckJob => "truck.svg",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job name: {0}")]
pub struct UnknownJobName(pub String);

impl FromStr for JobName {
    type Err = UnknownJobName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownJobName(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Paused,
    Running,
}

impl JobStatus {
    pub fn toggled(self) -> Self {
        match self {
            JobStatus::Paused => JobStatus::Running,
            JobStatus::Running => JobStatus::Paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub status: JobStatus,
    pub image_name: String,
}

impl JobInfo {
    pub fn new(status: JobStatus, image_name: impl Into<String>) -> Self {
        Self {
            status,
            image_name: image_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_parse_case_insensitively() {
        assert_eq!("truckjob".parse::<JobName>().unwrap(), JobName::TruckJob);
        assert_eq!("AirJob".parse::<JobName>().unwrap(), JobName::AirJob);
        assert!("CarJob".parse::<JobName>().is_err());
    }

    #[test]
    fn status_serializes_as_string() {
        let info = JobInfo::new(JobStatus::Running, "truck.svg");
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["status"], "Running");
        assert_eq!(v["imageName"], "truck.svg");
    }
}
