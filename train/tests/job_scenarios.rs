//! End-to-end coordinator scenarios driven by a simulated worker
//! fleet: the mock invoker stages deltas in an in-memory store and
//! checks in through the real rendezvous machinery, exactly as the
//! worker functions would over HTTP.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;

use api::{metrics, History, Job, JobState, TrainOptions, TrainRequest, TrainTask};
use store::{keys, MemStore, StoreError, TensorStore};
use train::clients::{ClientError, HistorySink, PsSurface, Scheduler};
use train::invoker::{EpochStats, Invoker, ValStats};
use train::{job_channels, InvokeError, JobConfig, JobError, JobHandle, MergeResult, TrainJob};

const JOB: &str = "job-e2e";
const LAYERS: [&str; 2] = ["fc1", "out"];

fn delta(value: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(&[2]), value)
}

/// Mock invoker that plays the whole worker fleet.
struct FleetInvoker {
    handle: Arc<JobHandle>,
    store: Arc<MemStore>,
    /// Local rounds each worker runs per epoch (barriers per epoch).
    rounds: usize,
    /// Worker whose invocation errors before it ever reports in.
    fail_func: Option<usize>,
    /// Worker 0 stages a mis-shaped delta, poisoning the merge.
    poison_shape: bool,
    /// Accuracy every validation reports.
    val_accuracy: f64,

    check_ins: AtomicUsize,
    val_calls: AtomicUsize,
    observed_weights: Mutex<Option<ArrayD<f32>>>,
}

impl FleetInvoker {
    fn new(handle: Arc<JobHandle>, store: Arc<MemStore>) -> Self {
        Self {
            handle,
            store,
            rounds: 1,
            fail_func: None,
            poison_shape: false,
            val_accuracy: 10.0,
            check_ins: AtomicUsize::new(0),
            val_calls: AtomicUsize::new(0),
            observed_weights: Mutex::new(None),
        }
    }

    async fn run_worker(&self, func_id: usize, _n: usize) -> Option<f64> {
        if self.fail_func == Some(func_id) {
            self.handle.drop_out(func_id).await;
            return None;
        }

        for round in 1..=self.rounds {
            for layer in LAYERS {
                let staged = if self.poison_shape && func_id == 0 {
                    ArrayD::from_elem(IxDyn(&[5]), 1.0)
                } else {
                    delta((func_id + 1) as f32)
                };
                self.store
                    .set(&keys::delta(JOB, layer, func_id), &staged)
                    .await
                    .ok()?;
            }

            self.check_ins.fetch_add(1, Ordering::SeqCst);
            let finished = round == self.rounds;
            match self.handle.check_in(func_id, finished).await {
                Ok(MergeResult::Succeeded) => {}
                Ok(MergeResult::Failed) | Err(_) => return None,
            }
        }
        Some(0.5)
    }
}

#[async_trait]
impl Invoker for FleetInvoker {
    async fn init(&self) -> Result<Vec<String>, InvokeError> {
        for layer in LAYERS {
            self.store
                .set(&keys::weights(JOB, layer), &delta(0.0))
                .await
                .map_err(|e| InvokeError::Body(e.to_string()))?;
        }
        Ok(LAYERS.iter().map(|s| s.to_string()).collect())
    }

    async fn train(&self, n: usize) -> Result<EpochStats, InvokeError> {
        let workers = (0..n).map(|func_id| self.run_worker(func_id, n));
        let losses: Vec<f64> = future::join_all(workers)
            .await
            .into_iter()
            .flatten()
            .collect();
        let successes = losses.len();
        let mean_loss = if successes == 0 {
            0.0
        } else {
            losses.iter().sum::<f64>() / successes as f64
        };
        Ok(EpochStats {
            mean_loss,
            successes,
        })
    }

    async fn validate(&self, n: usize) -> Result<ValStats, InvokeError> {
        self.val_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(weights) = self.store.get(&keys::weights(JOB, "fc1")).await {
            *self.observed_weights.lock() = Some(weights);
        }
        Ok(ValStats {
            accuracy: self.val_accuracy,
            loss: 0.3,
            successes: n,
        })
    }
}

/// Scheduler mock replying with a queue of parallelism values.
struct QueueScheduler {
    handle: Arc<JobHandle>,
    replies: Mutex<VecDeque<usize>>,
    calls: AtomicUsize,
}

#[async_trait]
impl Scheduler for QueueScheduler {
    async fn update_job(&self, _task: &TrainTask) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(parallelism) => {
                self.handle
                    .push_state(JobState {
                        parallelism,
                        elapsed_time: 0.0,
                    })
                    .await;
                Ok(())
            }
            None => Err(ClientError::new("scheduler out of replies")),
        }
    }
}

#[derive(Default)]
struct RecordingPs {
    finished: Mutex<Option<Option<String>>>,
}

#[async_trait]
impl PsSurface for RecordingPs {
    async fn job_finished(&self, _job_id: &str, err: Option<&JobError>) -> Result<(), ClientError> {
        *self.finished.lock() = Some(err.map(|e| e.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Option<History>>,
}

#[async_trait]
impl HistorySink for RecordingSink {
    async fn save(&self, history: &History) -> Result<(), ClientError> {
        *self.saved.lock() = Some(history.clone());
        Ok(())
    }
}

fn task(epochs: usize, options: TrainOptions) -> TrainTask {
    TrainTask {
        job: Job {
            job_id: JOB.to_string(),
            state: JobState {
                parallelism: options.default_parallelism,
                elapsed_time: 0.0,
            },
        },
        parameters: TrainRequest {
            model_type: "example".to_string(),
            batch_size: 64,
            epochs,
            dataset: "mnist".to_string(),
            learning_rate: 0.01,
            function_name: "network".to_string(),
            options,
        },
    }
}

struct Rig {
    store: Arc<MemStore>,
    invoker: Arc<FleetInvoker>,
    scheduler: Arc<QueueScheduler>,
    ps: Arc<RecordingPs>,
    sink: Arc<RecordingSink>,
}

fn rig(
    epochs: usize,
    options: TrainOptions,
    scheduler_replies: Vec<usize>,
    tweak: impl FnOnce(&mut FleetInvoker),
) -> (Rig, TrainJob) {
    let (handle, intake) = job_channels();
    let store = Arc::new(MemStore::new());

    let mut fleet = FleetInvoker::new(Arc::clone(&handle), Arc::clone(&store));
    tweak(&mut fleet);
    let invoker = Arc::new(fleet);

    let scheduler = Arc::new(QueueScheduler {
        handle: Arc::clone(&handle),
        replies: Mutex::new(scheduler_replies.into()),
        calls: AtomicUsize::new(0),
    });
    let ps = Arc::new(RecordingPs::default());
    let sink = Arc::new(RecordingSink::default());

    let cfg = JobConfig {
        barrier_deadline: Some(Duration::from_secs(5)),
        ..JobConfig::default()
    };

    let job = TrainJob::new(
        task(epochs, options),
        cfg,
        Arc::clone(&store) as Arc<dyn TensorStore>,
        Arc::clone(&invoker) as Arc<dyn Invoker>,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        Arc::clone(&ps) as Arc<dyn PsSurface>,
        Arc::clone(&sink) as Arc<dyn HistorySink>,
        handle,
        intake,
    );

    (
        Rig {
            store,
            invoker,
            scheduler,
            ps,
            sink,
        },
        job,
    )
}

fn exit_error(rig: &Rig) -> Option<String> {
    rig.ps
        .finished
        .lock()
        .clone()
        .expect("job never reported completion")
}

#[tokio::test]
async fn static_two_epochs_runs_two_barriers_and_a_final_validation() {
    let options = TrainOptions {
        default_parallelism: 2,
        static_parallelism: true,
        k: 1,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(2, options, Vec::new(), |_| {});

    job.run().await;

    assert_eq!(exit_error(&rig), None);
    assert_eq!(rig.scheduler.calls.load(Ordering::SeqCst), 0);
    // each worker checked in once per epoch
    assert_eq!(rig.invoker.check_ins.load(Ordering::SeqCst), 4);
    assert_eq!(rig.invoker.val_calls.load(Ordering::SeqCst), 1);

    let saved = rig.sink.saved.lock().clone().expect("history not persisted");
    assert_eq!(saved.id, JOB);
    assert_eq!(saved.data.len(metrics::TRAIN_LOSS), 2);
    assert_eq!(saved.data.get(metrics::PARALLELISM), Some(&[2.0, 2.0][..]));
    assert_eq!(saved.data.len(metrics::EPOCH_TIME), 2);
    assert_eq!(saved.data.len(metrics::ACCURACY), 1);
}

#[tokio::test]
async fn scheduler_raises_parallelism_between_epochs() {
    let options = TrainOptions {
        default_parallelism: 2,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(3, options, vec![4, 4], |_| {});

    job.run().await;

    assert_eq!(exit_error(&rig), None);
    assert_eq!(rig.scheduler.calls.load(Ordering::SeqCst), 2);

    let saved = rig.sink.saved.lock().clone().expect("history not persisted");
    assert_eq!(
        saved.data.get(metrics::PARALLELISM),
        Some(&[2.0, 4.0, 4.0][..])
    );
    assert_eq!(saved.data.len(metrics::TRAIN_LOSS), 3);
}

#[tokio::test]
async fn goal_accuracy_stops_the_job_early() {
    let options = TrainOptions {
        default_parallelism: 2,
        static_parallelism: true,
        validate_every: 1,
        goal_accuracy: 50.0,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(3, options, Vec::new(), |fleet| {
        fleet.val_accuracy = 60.0;
    });

    job.run().await;

    assert_eq!(exit_error(&rig), None);
    // the goal fired at epoch 1; epochs 2 and 3 never ran and the
    // final validation was skipped
    let saved = rig.sink.saved.lock().clone().expect("history not persisted");
    assert_eq!(saved.data.len(metrics::TRAIN_LOSS), 1);
    assert_eq!(saved.data.get(metrics::ACCURACY), Some(&[60.0][..]));
    assert_eq!(rig.invoker.val_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn force_stop_exits_between_epochs_with_history_persisted() {
    let options = TrainOptions {
        default_parallelism: 2,
        static_parallelism: true,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(3, options, Vec::new(), |_| {});

    // the stop lands in the buffered slot and is observed at the end
    // of epoch 1
    job.handle().request_stop();
    job.run().await;

    assert_eq!(exit_error(&rig), Some("job was force stopped".to_string()));
    let saved = rig.sink.saved.lock().clone().expect("history not persisted");
    assert_eq!(saved.data.len(metrics::TRAIN_LOSS), 1);
    // the stop path skips the final validation
    assert_eq!(rig.invoker.val_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn merge_failure_kills_the_job_but_teardown_still_runs() {
    let options = TrainOptions {
        default_parallelism: 2,
        static_parallelism: true,
        k: 1,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(2, options, Vec::new(), |fleet| {
        fleet.rounds = 2;
        fleet.poison_shape = true;
    });

    job.run().await;

    let err = exit_error(&rig).expect("job must fail");
    assert!(err.contains("error merging model"), "got: {err}");
    // fatal path: no history document
    assert!(rig.sink.saved.lock().is_none());
    // teardown closed the pool regardless
    assert!(matches!(
        rig.store.set("k", &delta(0.0)).await,
        Err(StoreError::Closed)
    ));
}

#[tokio::test]
async fn straggler_drop_shrinks_the_merge_group() {
    let options = TrainOptions {
        default_parallelism: 3,
        static_parallelism: true,
        ..TrainOptions::default()
    };
    let (rig, job) = rig(1, options, Vec::new(), |fleet| {
        fleet.fail_func = Some(2);
    });

    job.run().await;

    assert_eq!(exit_error(&rig), None);
    let saved = rig.sink.saved.lock().clone().expect("history not persisted");
    assert_eq!(saved.data.len(metrics::TRAIN_LOSS), 1);

    // the barrier released with workers 0 and 1 only, so the reference
    // is their mean, untouched by worker 2
    let observed = rig
        .invoker
        .observed_weights
        .lock()
        .clone()
        .expect("validation never saw the reference");
    for v in observed.iter() {
        assert!((v - 1.5).abs() < 1e-6);
    }
}
