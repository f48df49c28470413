//! Fan-out invocation of the worker functions through the router.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use log::{debug, warn};
use serde::Deserialize;

use api::TrainTask;

use crate::config::JobConfig;
use crate::error::InvokeError;
use crate::rendezvous::JobHandle;

/// Worker task kinds understood by the functions.
#[derive(Debug, Clone, Copy)]
pub enum WorkerTask {
    Init,
    Train,
    Val,
}

impl WorkerTask {
    fn as_str(self) -> &'static str {
        match self {
            WorkerTask::Init => "init",
            WorkerTask::Train => "train",
            WorkerTask::Val => "val",
        }
    }
}

/// Aggregated outcome of a train fan-out.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub mean_loss: f64,
    pub successes: usize,
}

/// Aggregated outcome of a validation fan-out.
#[derive(Debug, Clone, Copy)]
pub struct ValStats {
    pub accuracy: f64,
    pub loss: f64,
    pub successes: usize,
}

/// Issues the per-epoch worker invocations and aggregates their
/// summaries.
///
/// Implementations must not let one worker's failure abort its
/// siblings, and must wait for every invocation before returning.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Single init invocation; returns the model's layer names.
    async fn init(&self) -> Result<Vec<String>, InvokeError>;

    /// N parallel train invocations.
    async fn train(&self, n: usize) -> Result<EpochStats, InvokeError>;

    /// N parallel validation invocations.
    async fn validate(&self, n: usize) -> Result<ValStats, InvokeError>;
}

#[derive(Debug, Deserialize)]
struct FnSummary {
    results: HashMap<String, f64>,
}

/// Invoker that reaches the workers through the function router.
///
/// A worker whose invocation fails outright is reported to the
/// rendezvous as a dropout right away, so a barrier never waits on a
/// dead worker. A worker that answered 200 completed its protocol
/// (including its final check-in); a bad body from it only voids its
/// metrics.
pub struct HttpInvoker {
    client: reqwest::Client,
    router_url: String,
    function_name: String,
    job_id: String,
    api_port: u16,
    batch_size: usize,
    learning_rate: f64,
    handle: Arc<JobHandle>,
}

impl HttpInvoker {
    pub fn new(
        cfg: &JobConfig,
        task: &TrainTask,
        handle: Arc<JobHandle>,
    ) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.invoke_timeout)
            .build()?;

        Ok(Self {
            client,
            router_url: cfg.router_url.clone(),
            function_name: task.parameters.function_name.clone(),
            job_id: task.job.job_id.clone(),
            api_port: cfg.api_port,
            batch_size: task.parameters.batch_size,
            learning_rate: task.parameters.learning_rate,
            handle,
        })
    }

    async fn call(
        &self,
        task: WorkerTask,
        func_id: usize,
        n: usize,
    ) -> Result<reqwest::Response, InvokeError> {
        let url = format!("{}/{}", self.router_url, self.function_name);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("task", task.as_str().to_string()),
                ("psId", self.job_id.clone()),
                ("psPort", self.api_port.to_string()),
                ("N", n.to_string()),
                ("funcId", func_id.to_string()),
                ("batchSize", self.batch_size.to_string()),
                ("lr", self.learning_rate.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvokeError::Status {
                code: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn call_summary(
        &self,
        task: WorkerTask,
        func_id: usize,
        n: usize,
    ) -> Result<HashMap<String, f64>, InvokeError> {
        let response = self.call(task, func_id, n).await?;
        let summary: FnSummary = response
            .json()
            .await
            .map_err(|e| InvokeError::Body(e.to_string()))?;
        Ok(summary.results)
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn init(&self) -> Result<Vec<String>, InvokeError> {
        debug!("calling init function: job_id={}", self.job_id);
        let response = self.call(WorkerTask::Init, 0, 1).await?;
        response
            .json()
            .await
            .map_err(|e| InvokeError::Body(e.to_string()))
    }

    async fn train(&self, n: usize) -> Result<EpochStats, InvokeError> {
        debug!("invoking train functions: job_id={} n={n}", self.job_id);

        let calls = (0..n).map(|func_id| async move {
            match self.call_summary(WorkerTask::Train, func_id, n).await {
                Ok(results) => match results.get("loss") {
                    Some(&loss) => {
                        debug!("got result: func_id={func_id} loss={loss}");
                        Some(loss)
                    }
                    None => {
                        warn!("train function returned no loss: func_id={func_id}");
                        None
                    }
                },
                // a 200 with a bad body still means the worker ran its
                // protocol to completion; only a failed invocation
                // leaves a hole in the barrier group
                Err(InvokeError::Body(msg)) => {
                    warn!("could not parse the response body: func_id={func_id} err={msg}");
                    None
                }
                Err(e) => {
                    warn!("error when performing request: func_id={func_id} err={e}");
                    self.handle.drop_out(func_id).await;
                    None
                }
            }
        });

        let losses: Vec<f64> = future::join_all(calls).await.into_iter().flatten().collect();
        Ok(EpochStats {
            mean_loss: mean(&losses),
            successes: losses.len(),
        })
    }

    async fn validate(&self, n: usize) -> Result<ValStats, InvokeError> {
        debug!("invoking val functions: job_id={} n={n}", self.job_id);

        let calls = (0..n).map(|func_id| async move {
            match self.call_summary(WorkerTask::Val, func_id, n).await {
                Ok(results) => {
                    let accuracy = results.get("accuracy").copied();
                    let loss = results.get("loss").copied();
                    match (accuracy, loss) {
                        (Some(accuracy), Some(loss)) => Some((accuracy, loss)),
                        _ => {
                            warn!("val function summary incomplete: func_id={func_id}");
                            None
                        }
                    }
                }
                Err(e) => {
                    // the epoch's barriers are already over; validation
                    // failures only void this worker's metrics
                    warn!("error during validation: func_id={func_id} err={e}");
                    None
                }
            }
        });

        let results: Vec<(f64, f64)> = future::join_all(calls).await.into_iter().flatten().collect();
        let (accuracies, losses): (Vec<f64>, Vec<f64>) = results.into_iter().unzip();
        Ok(ValStats {
            accuracy: mean(&accuracies),
            loss: mean(&losses),
            successes: accuracies.len(),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_slice_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
    }
}
