//! The mutable-group-size rendezvous between workers and the merger.
//!
//! Every barrier gets fresh primitives: a bounded event channel whose
//! capacity equals the number of expected participants, swapped into
//! the [`BarrierGate`] at arm time and never reused across barriers.
//! The merger is the channel's only consumer, so group-size bookkeeping
//! needs no shared counters: a worker's final check-in (`resp: None`)
//! or an invoker dropout shrinks the next barrier's group.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use api::JobState;

const DROPOUT_RETRIES: usize = 50;
const DROPOUT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Outcome of one merge rendezvous, delivered to each waiting worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Succeeded,
    Failed,
}

/// A worker's barrier check-in.
///
/// `resp: None` is the sentinel for "no further rounds this epoch":
/// the worker is done with its shard and expects no reply.
#[derive(Debug)]
pub struct FinishNotification {
    pub func_id: usize,
    pub resp: Option<oneshot::Sender<MergeResult>>,
}

/// One slot of the current barrier's intake.
#[derive(Debug)]
pub enum BarrierEvent {
    /// A worker completed K local steps and reached the barrier.
    Reached(FinishNotification),
    /// A worker's invocation failed; it will never reach a barrier.
    Dropped { func_id: usize },
}

/// Swappable slot holding the current barrier's sender.
///
/// Disarmed between epochs; a send attempt while disarmed is a
/// protocol violation surfaced to the caller.
#[derive(Debug, Default)]
pub(crate) struct BarrierGate {
    tx: RwLock<Option<mpsc::Sender<BarrierEvent>>>,
}

impl BarrierGate {
    pub(crate) fn arm(&self, tx: mpsc::Sender<BarrierEvent>) {
        *self.tx.write() = Some(tx);
    }

    pub(crate) fn disarm(&self) {
        *self.tx.write() = None;
    }

    fn current(&self) -> Option<mpsc::Sender<BarrierEvent>> {
        self.tx.read().clone()
    }
}

/// A rejected barrier check-in.
#[derive(Debug, PartialEq, Eq)]
pub enum CheckInError {
    /// No barrier is armed: the notification arrived outside an epoch.
    NoBarrier,
    /// The barrier collapsed while the worker was waiting on it.
    BarrierGone,
}

impl std::fmt::Display for CheckInError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckInError::NoBarrier => write!(f, "no merge barrier is active"),
            CheckInError::BarrierGone => write!(f, "merge barrier collapsed while waiting"),
        }
    }
}

impl std::error::Error for CheckInError {}

/// Shared intake surface of one running job: barrier check-ins plus
/// the scheduler reply and stop signals coming in over the job API.
#[derive(Debug)]
pub struct JobHandle {
    gate: BarrierGate,
    scheduler_tx: mpsc::Sender<JobState>,
    stop_tx: mpsc::Sender<()>,
}

/// Receiving side of the signals that arrive through a [`JobHandle`].
pub struct JobIntake {
    pub(crate) scheduler_rx: mpsc::Receiver<JobState>,
    pub(crate) stop_rx: mpsc::Receiver<()>,
}

/// Creates the shared intake handle and its receiving side.
pub fn job_channels() -> (Arc<JobHandle>, JobIntake) {
    let (scheduler_tx, scheduler_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let handle = JobHandle {
        gate: BarrierGate::default(),
        scheduler_tx,
        stop_tx,
    };
    (
        Arc::new(handle),
        JobIntake {
            scheduler_rx,
            stop_rx,
        },
    )
}

impl JobHandle {
    pub(crate) fn gate(&self) -> &BarrierGate {
        &self.gate
    }

    /// Arms a fresh barrier expecting `participants` check-ins and
    /// returns its intake for the merger.
    pub fn arm_barrier(&self, participants: usize) -> mpsc::Receiver<BarrierEvent> {
        let (tx, rx) = mpsc::channel(participants.max(1));
        self.gate.arm(tx);
        rx
    }

    /// Checks a worker into the current barrier.
    ///
    /// With `finished == false` the call blocks until the merger
    /// releases the barrier and returns the merge outcome; with
    /// `finished == true` it registers the worker's epoch exit and
    /// returns immediately.
    pub async fn check_in(
        &self,
        func_id: usize,
        finished: bool,
    ) -> Result<MergeResult, CheckInError> {
        let Some(tx) = self.gate.current() else {
            error!("stray finish notification: func_id={func_id} (no barrier armed)");
            return Err(CheckInError::NoBarrier);
        };

        if finished {
            let event = BarrierEvent::Reached(FinishNotification {
                func_id,
                resp: None,
            });
            if tx.send(event).await.is_err() {
                error!("stray finish notification: func_id={func_id} (barrier already released)");
                return Err(CheckInError::NoBarrier);
            }
            debug!("worker exited epoch: func_id={func_id}");
            return Ok(MergeResult::Succeeded);
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let event = BarrierEvent::Reached(FinishNotification {
            func_id,
            resp: Some(resp_tx),
        });
        if tx.send(event).await.is_err() {
            error!("stray finish notification: func_id={func_id} (barrier already released)");
            return Err(CheckInError::NoBarrier);
        }

        resp_rx.await.map_err(|_| CheckInError::BarrierGone)
    }

    /// Records a worker that died mid-epoch so the barrier group can
    /// shrink without it. Retries briefly across a barrier re-arm.
    pub async fn drop_out(&self, func_id: usize) {
        for _ in 0..DROPOUT_RETRIES {
            match self.gate.current() {
                Some(tx) => {
                    if tx.send(BarrierEvent::Dropped { func_id }).await.is_ok() {
                        debug!("worker dropped from epoch: func_id={func_id}");
                        return;
                    }
                    // the merger is between barriers; its next arm
                    // swaps in a live sender
                    time::sleep(DROPOUT_RETRY_DELAY).await;
                }
                None => break,
            }
        }
        warn!("could not record worker dropout: func_id={func_id} (epoch already over)");
    }

    /// Delivers the scheduler's renegotiation reply.
    pub async fn push_state(&self, state: JobState) -> bool {
        self.scheduler_tx.send(state).await.is_ok()
    }

    /// Requests a force stop. Duplicate requests are ignored.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}
