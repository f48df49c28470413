use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::mpsc;

use store::{RedisStore, TensorStore};
use train::clients::HttpClients;
use train::invoker::HttpInvoker;
use train::rpc::{self, ApiState};
use train::{job_channels, JobConfig, TrainJob};

/// Standalone job process: starts the job API, waits for a train task
/// to be submitted on it, then serves that job to completion.
#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cfg = JobConfig::from_env();

    let (handle, intake) = job_channels();
    let (task_tx, mut task_rx) = mpsc::channel(1);

    let api = ApiState {
        handle: Arc::clone(&handle),
        task_tx: Some(task_tx),
    };
    let port = cfg.api_port;
    tokio::spawn(async move {
        if let Err(e) = rpc::serve(api, port).await {
            error!("job api failed: err={e}");
        }
    });

    info!("waiting for the train task");
    let Some(task) = task_rx.recv().await else {
        error!("task channel closed before a task arrived");
        return ExitCode::FAILURE;
    };

    let store: Arc<dyn TensorStore> = match RedisStore::connect(&cfg.redis_url, cfg.pool_size) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("could not reach the tensor store: err={e}");
            return ExitCode::FAILURE;
        }
    };

    let invoker = match HttpInvoker::new(&cfg, &task, Arc::clone(&handle)) {
        Ok(invoker) => Arc::new(invoker),
        Err(e) => {
            error!("could not build the function invoker: err={e}");
            return ExitCode::FAILURE;
        }
    };

    let clients = match HttpClients::new(&cfg) {
        Ok(clients) => Arc::new(clients),
        Err(e) => {
            error!("could not build the collaborator clients: err={e}");
            return ExitCode::FAILURE;
        }
    };

    let job = TrainJob::new(
        task,
        cfg,
        store,
        invoker,
        Arc::clone(&clients) as Arc<dyn train::clients::Scheduler>,
        Arc::clone(&clients) as Arc<dyn train::clients::PsSurface>,
        clients as Arc<dyn train::clients::HistorySink>,
        handle,
        intake,
    );
    job.run().await;
    ExitCode::SUCCESS
}
