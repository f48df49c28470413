//! Clients for the coordinator's external collaborators. Only the
//! interfaces the job consumes are implemented; the services live
//! elsewhere in the cluster.

use std::{error::Error, fmt, time::Duration};

use async_trait::async_trait;
use log::debug;

use api::{History, TrainTask};

use crate::config::JobConfig;
use crate::error::JobError;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a collaborator call.
#[derive(Debug)]
pub struct ClientError(String);

impl ClientError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        ClientError(value.to_string())
    }
}

/// Scheduler-facing side of the renegotiation protocol.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Asks the scheduler to renegotiate the job's parallelism. The
    /// reply arrives asynchronously on the job API's `/state` route.
    async fn update_job(&self, task: &TrainTask) -> Result<(), ClientError>;
}

/// Parameter-server surface notified when the job ends.
#[async_trait]
pub trait PsSurface: Send + Sync {
    /// Terminal signal: the job finished, with its exit error if any.
    async fn job_finished(&self, job_id: &str, err: Option<&JobError>) -> Result<(), ClientError>;
}

/// Receiver of the completed history document.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn save(&self, history: &History) -> Result<(), ClientError>;
}

/// HTTP implementations of all three collaborator seams.
pub struct HttpClients {
    client: reqwest::Client,
    scheduler_url: String,
    ps_url: String,
    history_url: String,
}

impl HttpClients {
    pub fn new(cfg: &JobConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;
        Ok(Self {
            client,
            scheduler_url: cfg.scheduler_url.clone(),
            ps_url: cfg.ps_url.clone(),
            history_url: cfg.history_url.clone(),
        })
    }

    fn check(response: reqwest::Response, what: &str) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError(format!("{what} replied {status}")))
        }
    }
}

#[async_trait]
impl Scheduler for HttpClients {
    async fn update_job(&self, task: &TrainTask) -> Result<(), ClientError> {
        debug!("requesting job update: job_id={}", task.job.job_id);
        let url = format!("{}/job/update", self.scheduler_url);
        let response = self.client.post(&url).json(task).send().await?;
        Self::check(response, "scheduler")
    }
}

#[async_trait]
impl PsSurface for HttpClients {
    async fn job_finished(&self, job_id: &str, err: Option<&JobError>) -> Result<(), ClientError> {
        debug!("sending finish signal: job_id={job_id}");
        let url = format!("{}/job/{}/finished", self.ps_url, job_id);
        let body = serde_json::json!({ "error": err.map(|e| e.to_string()) });
        let response = self.client.post(&url).json(&body).send().await?;
        Self::check(response, "parameter-server surface")
    }
}

#[async_trait]
impl HistorySink for HttpClients {
    async fn save(&self, history: &History) -> Result<(), ClientError> {
        debug!("persisting history: job_id={}", history.id);
        let url = format!("{}/history", self.history_url);
        let response = self.client.post(&url).json(history).send().await?;
        Self::check(response, "history writer")
    }
}
