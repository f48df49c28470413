use serde::{Deserialize, Serialize};

/// Scheduler-owned view of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub parallelism: usize,
    /// Seconds spent training so far.
    pub elapsed_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub state: JobState,
}

/// Everything the coordinator needs to run one training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainTask {
    pub job: Job,
    pub parameters: super::TrainRequest,
}
