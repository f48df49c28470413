//! Inbound HTTP API of a running job: worker rendezvous callbacks, the
//! scheduler's renegotiation replies, and the external stop signal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api::{JobState, TrainTask};

use crate::rendezvous::{CheckInError, JobHandle, MergeResult};

/// Shared state of the job API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub handle: Arc<JobHandle>,
    /// Present only in the standalone job process, which waits for its
    /// task to be submitted over the API.
    pub task_tx: Option<mpsc::Sender<TrainTask>>,
}

/// Body of a worker's `/finish` callback.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    pub func_id: usize,
    /// True when the worker has consumed its shard and will run no
    /// further rounds this epoch.
    #[serde(default)]
    pub finished: bool,
}

/// Reply to a `/finish` callback.
#[derive(Debug, Serialize)]
pub struct FinishResponse {
    pub result: &'static str,
}

impl From<MergeResult> for FinishResponse {
    fn from(value: MergeResult) -> Self {
        let result = match value {
            MergeResult::Succeeded => "succeeded",
            MergeResult::Failed => "failed",
        };
        Self { result }
    }
}

/// Builds the job API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/finish", post(finish))
        .route("/state", post(push_state))
        .route("/stop", post(stop))
        .route("/task", post(submit_task))
        .with_state(state)
}

/// Serves the job API until the process exits.
pub async fn serve(state: ApiState, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("job api listening: port={port}");
    axum::serve(listener, router(state)).await
}

async fn health() -> &'static str {
    "ok"
}

async fn finish(
    State(state): State<ApiState>,
    Json(request): Json<FinishRequest>,
) -> Result<Json<FinishResponse>, StatusCode> {
    debug!(
        "finish notification: func_id={} finished={}",
        request.func_id, request.finished
    );

    match state.handle.check_in(request.func_id, request.finished).await {
        Ok(result) => Ok(Json(result.into())),
        // a notification outside any barrier is a protocol violation
        Err(CheckInError::NoBarrier) => Err(StatusCode::CONFLICT),
        Err(CheckInError::BarrierGone) => Ok(Json(MergeResult::Failed.into())),
    }
}

async fn push_state(State(state): State<ApiState>, Json(update): Json<JobState>) -> StatusCode {
    debug!(
        "scheduler update received: parallelism={}",
        update.parallelism
    );
    if state.handle.push_state(update).await {
        StatusCode::OK
    } else {
        StatusCode::GONE
    }
}

async fn stop(State(state): State<ApiState>) -> StatusCode {
    info!("force stop requested");
    state.handle.request_stop();
    StatusCode::OK
}

async fn submit_task(
    State(state): State<ApiState>,
    Json(task): Json<TrainTask>,
) -> StatusCode {
    match &state.task_tx {
        Some(task_tx) => {
            info!("train task submitted: job_id={}", task.job.job_id);
            if task_tx.send(task).await.is_ok() {
                StatusCode::ACCEPTED
            } else {
                // a task was already accepted for this process
                StatusCode::CONFLICT
            }
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_request_uses_camel_case() {
        let request: FinishRequest =
            serde_json::from_str(r#"{"funcId": 3, "finished": true}"#).unwrap();
        assert_eq!(request.func_id, 3);
        assert!(request.finished);

        // finished defaults to false when omitted
        let request: FinishRequest = serde_json::from_str(r#"{"funcId": 0}"#).unwrap();
        assert!(!request.finished);
    }
}
