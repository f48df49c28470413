//! The per-job controller: init, the epoch loop, validation, goal and
//! stop checks, and unconditional teardown.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use api::{metrics, History, JobHistory, TrainTask};
use model::Model;
use store::{keys, TensorStore};

use crate::clients::{HistorySink, PsSurface, Scheduler};
use crate::config::JobConfig;
use crate::error::{InvokeError, JobError, MergeError};
use crate::invoker::{EpochStats, Invoker};
use crate::merger::{EpochSignal, Merger};
use crate::rendezvous::{JobHandle, JobIntake};

/// Channels tied to the merger task spawned at init.
struct MergePipeline {
    start_tx: mpsc::Sender<EpochSignal>,
    merged_rx: mpsc::Receiver<()>,
    _task: JoinHandle<()>,
}

/// The coordinator of a single training job.
///
/// Owns the job state, the history, and every synchronization channel;
/// the reference model is handed to the merger task at init and only
/// observed through the `merged` signal afterwards.
pub struct TrainJob {
    job_id: String,
    task: TrainTask,
    cfg: JobConfig,

    parallelism: usize,
    static_parallelism: bool,
    validate_every: usize,
    goal_accuracy: f64,
    epoch: usize,

    history: JobHistory,
    accuracy_reached: bool,
    exit_err: Option<JobError>,

    store: Arc<dyn TensorStore>,
    invoker: Arc<dyn Invoker>,
    scheduler: Arc<dyn Scheduler>,
    ps: Arc<dyn PsSurface>,
    history_sink: Arc<dyn HistorySink>,

    handle: Arc<JobHandle>,
    intake: JobIntake,

    // the final validation outside the loop may reach the goal with no
    // receiver left; the single-slot buffer absorbs that push
    accuracy_tx: mpsc::Sender<()>,
    accuracy_rx: mpsc::Receiver<()>,
}

impl TrainJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: TrainTask,
        cfg: JobConfig,
        store: Arc<dyn TensorStore>,
        invoker: Arc<dyn Invoker>,
        scheduler: Arc<dyn Scheduler>,
        ps: Arc<dyn PsSurface>,
        history_sink: Arc<dyn HistorySink>,
        handle: Arc<JobHandle>,
        intake: JobIntake,
    ) -> Self {
        let (accuracy_tx, accuracy_rx) = mpsc::channel(1);
        let parallelism = match task.job.state.parallelism {
            0 => task.parameters.options.default_parallelism,
            n => n,
        };

        Self {
            job_id: task.job.job_id.clone(),
            parallelism,
            static_parallelism: task.parameters.options.static_parallelism,
            validate_every: task.parameters.options.validate_every,
            goal_accuracy: task.parameters.options.goal_accuracy,
            epoch: 0,
            history: JobHistory::new(),
            accuracy_reached: false,
            exit_err: None,
            task,
            cfg,
            store,
            invoker,
            scheduler,
            ps,
            history_sink,
            handle,
            intake,
            accuracy_tx,
            accuracy_rx,
        }
    }

    pub fn handle(&self) -> Arc<JobHandle> {
        Arc::clone(&self.handle)
    }

    /// Runs the job to completion. Teardown (tensor namespace
    /// deletion, pool close, the `JobFinished` signal) runs on every
    /// exit path.
    pub async fn run(mut self) {
        info!("starting to serve train job: job_id={}", self.job_id);

        if let Err(e) = self.execute().await {
            error!("train job failed: job_id={} err={e}", self.job_id);
            self.exit_err = Some(e);
        }

        self.teardown().await;
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        let mut pipeline = self.init().await?;

        let epochs = self.task.parameters.epochs;
        self.epoch = 1;
        while self.epoch <= epochs {
            self.train_epoch(&mut pipeline).await?;

            // renegotiate parallelism between epochs; never when static
            if !self.static_parallelism && self.epoch < epochs {
                self.renegotiate().await;
            }

            // scheduled mid-training validation
            if self.validate_every > 0
                && self.epoch % self.validate_every == 0
                && self.epoch != epochs
            {
                if let Err(e) = self.validate().await {
                    error!("error performing validation: job_id={} err={e}", self.job_id);
                }
            }

            // stop and goal checks happen only at the epoch boundary
            if self.intake.stop_rx.try_recv().is_ok() {
                debug!("job stopping: job_id={}", self.job_id);
                self.accuracy_reached = true;
                self.exit_err = Some(JobError::ForcedStop);
                break;
            }
            if self.accuracy_rx.try_recv().is_ok() {
                debug!("goal accuracy reached, exiting: job_id={}", self.job_id);
                self.accuracy_reached = true;
                break;
            }

            self.epoch += 1;
        }

        // the goal path already validated; anything else gets one last
        // validation against the final merged model
        if !self.accuracy_reached {
            if let Err(e) = self.validate().await {
                error!("error performing validation: job_id={} err={e}", self.job_id);
            }
        }

        self.save_history().await;
        info!(
            "training finished: job_id={} epochs={}",
            self.job_id,
            self.epoch.min(epochs)
        );
        Ok(())
    }

    /// Launches the init function, builds the reference model, and
    /// spawns the merger that owns it from here on.
    async fn init(&mut self) -> Result<MergePipeline, JobError> {
        debug!("calling init function: job_id={}", self.job_id);
        let layers = self.invoker.init().await.map_err(JobError::InitInvoke)?;
        if layers.is_empty() {
            return Err(JobError::EmptyLayers);
        }
        debug!("received layers: job_id={} layers={layers:?}", self.job_id);

        let mut model = Model::new(self.job_id.clone(), layers, Arc::clone(&self.store));
        model.build().await.map_err(JobError::InitModel)?;
        model.summary();

        let (start_tx, start_rx) = mpsc::channel(1);
        let (merged_tx, merged_rx) = mpsc::channel(1);
        let merger = Merger::new(
            model,
            Arc::clone(&self.handle),
            start_rx,
            merged_tx,
            self.cfg.barrier_deadline,
        );

        Ok(MergePipeline {
            start_tx,
            merged_rx,
            _task: tokio::spawn(merger.run()),
        })
    }

    /// One epoch: arm the first barrier, hand the merger its error
    /// channel, fan out the train invocations, and wait for the merge.
    async fn train_epoch(&mut self, pipeline: &mut MergePipeline) -> Result<(), JobError> {
        info!(
            "started new epoch: job_id={} epoch={} parallelism={}",
            self.job_id, self.epoch, self.parallelism
        );

        let n = self.parallelism;
        let barrier_rx = self.handle.arm_barrier(n);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let signal = EpochSignal {
            n,
            barrier_rx,
            err_tx,
        };
        if pipeline.start_tx.send(signal).await.is_err() {
            return Err(JobError::Merge(MergeError::BarrierClosed));
        }

        let epoch_start = Instant::now();
        let stats = match self.invoker.train(n).await {
            Ok(stats) => stats,
            Err(e) => {
                // the merger reports the epoch's fate independently
                error!("error invoking functions: job_id={} err={e}", self.job_id);
                EpochStats {
                    mean_loss: 0.0,
                    successes: 0,
                }
            }
        };

        // non-blocking check for an asynchronous merge failure
        if let Ok(e) = err_rx.try_recv() {
            return Err(JobError::Merge(e));
        }

        if stats.successes < n {
            warn!(
                "epoch completed with failed workers: job_id={} ok={} n={n}",
                self.job_id, stats.successes
            );
        }

        let elapsed = epoch_start.elapsed().as_secs_f64();
        self.task.job.state.elapsed_time = elapsed;

        if stats.successes > 0 {
            info!(
                "epoch had average loss: job_id={} epoch={} loss={}",
                self.job_id, self.epoch, stats.mean_loss
            );
            self.history.append(metrics::TRAIN_LOSS, stats.mean_loss);
        }
        self.history.append(metrics::EPOCH_TIME, elapsed);
        self.history
            .append(metrics::PARALLELISM, self.parallelism as f64);

        // validation must observe a fully merged reference; block until
        // the merger reports the epoch done or failed
        debug!("waiting for merge to complete: job_id={}", self.job_id);
        tokio::select! {
            Some(e) = err_rx.recv() => Err(JobError::Merge(e)),
            merged = pipeline.merged_rx.recv() => match merged {
                Some(()) => Ok(()),
                None => Err(JobError::Merge(MergeError::BarrierClosed)),
            },
        }
    }

    /// Asks the scheduler for the next epoch's parallelism and waits
    /// for its asynchronous reply. A scheduler failure keeps the
    /// previous parallelism.
    async fn renegotiate(&mut self) {
        if let Err(e) = self.scheduler.update_job(&self.task).await {
            error!("error updating parallelism: job_id={} err={e}", self.job_id);
            return;
        }

        match self.intake.scheduler_rx.recv().await {
            Some(update) => {
                info!(
                    "received next config from the scheduler: job_id={} parallelism={}",
                    self.job_id, update.parallelism
                );
                self.task.job.state = update;
                if self.cfg.pin_parallelism {
                    debug!("parallelism pinned, ignoring update: job_id={}", self.job_id);
                } else if update.parallelism > 0 {
                    self.parallelism = update.parallelism;
                }
            }
            None => warn!("scheduler channel closed: job_id={}", self.job_id),
        }
    }

    /// Runs the validation fan-out, records its metrics, and pushes the
    /// goal notification when the accuracy target is met.
    async fn validate(&mut self) -> Result<(), InvokeError> {
        let stats = self.invoker.validate(self.parallelism).await?;
        if stats.successes == 0 {
            warn!("validation produced no results: job_id={}", self.job_id);
            return Ok(());
        }

        self.history.append(metrics::VAL_LOSS, stats.loss);
        self.history.append(metrics::ACCURACY, stats.accuracy);
        debug!(
            "history updated: job_id={} accuracy={}",
            self.job_id, stats.accuracy
        );

        if stats.accuracy >= self.goal_accuracy {
            debug!(
                "goal accuracy reached, sending message: goal={} acc={}",
                self.goal_accuracy, stats.accuracy
            );
            let _ = self.accuracy_tx.try_send(());
        }
        Ok(())
    }

    async fn save_history(&mut self) {
        let doc = History {
            id: self.job_id.clone(),
            data: self.history.clone(),
        };
        match self.history_sink.save(&doc).await {
            Ok(()) => info!("history persisted: job_id={}", self.job_id),
            Err(e) => error!(
                "could not persist the job history: job_id={} err={e}",
                self.job_id
            ),
        }
    }

    /// Unconditional teardown: drop the job's tensor namespace, close
    /// the pool, and report the exit to the parameter-server surface.
    async fn teardown(&mut self) {
        debug!("closing job: job_id={} err={:?}", self.job_id, self.exit_err);

        match self
            .store
            .delete_prefix(&keys::job_prefix(&self.job_id))
            .await
        {
            Ok(removed) => debug!(
                "cleared job tensors: job_id={} removed={removed}",
                self.job_id
            ),
            Err(e) => error!(
                "could not clear job tensors: job_id={} err={e}",
                self.job_id
            ),
        }
        self.store.close().await;

        if let Err(e) = self
            .ps
            .job_finished(&self.job_id, self.exit_err.as_ref())
            .await
        {
            error!(
                "could not report job completion: job_id={} err={e}",
                self.job_id
            );
        }
    }
}
