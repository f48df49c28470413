//! The per-job merger task: drives each epoch's sequence of rendezvous
//! barriers and is the only writer of the reference model.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use model::Model;

use crate::error::MergeError;
use crate::rendezvous::{BarrierEvent, JobHandle, MergeResult};

/// Hand-off from the controller that starts one epoch of merging.
pub struct EpochSignal {
    /// Parallelism at epoch start.
    pub n: usize,
    /// Intake of the epoch's first barrier.
    pub barrier_rx: mpsc::Receiver<BarrierEvent>,
    /// Where asynchronous merge failures are reported.
    pub err_tx: mpsc::Sender<MergeError>,
}

/// Long-lived task owning the reference model.
///
/// Receives one [`EpochSignal`] per epoch and runs that epoch's
/// barriers until every worker has exited, then emits exactly one
/// `merged` signal. The barrier group shrinks as workers declare
/// themselves finished (a check-in without a response channel) or drop
/// out; each release re-arms the gate with fresh primitives sized for
/// the remaining group.
pub struct Merger {
    model: Model,
    handle: Arc<JobHandle>,
    start_rx: mpsc::Receiver<EpochSignal>,
    merged_tx: mpsc::Sender<()>,
    deadline: Option<Duration>,
}

impl Merger {
    pub fn new(
        model: Model,
        handle: Arc<JobHandle>,
        start_rx: mpsc::Receiver<EpochSignal>,
        merged_tx: mpsc::Sender<()>,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            model,
            handle,
            start_rx,
            merged_tx,
            deadline,
        }
    }

    /// Runs until the controller drops its start channel.
    pub async fn run(mut self) {
        while let Some(signal) = self.start_rx.recv().await {
            self.run_epoch(signal).await;
        }
        debug!("merger exiting: job_id={}", self.model.job_id());
    }

    async fn run_epoch(&mut self, signal: EpochSignal) {
        let EpochSignal {
            n,
            mut barrier_rx,
            err_tx,
        } = signal;

        // workers still expected at the current barrier
        let mut alive = n;
        // workers already known to have left the epoch; duplicate exit
        // signals (a finished worker whose invocation also errors) must
        // not shrink the group twice
        let mut gone: HashSet<usize> = HashSet::new();

        loop {
            self.model.clear();
            debug!("waiting for functions to finish: expected={alive}");

            let mut funcs = Vec::with_capacity(alive);
            let mut responders = Vec::with_capacity(alive);
            let mut exited = 0usize;
            let mut checked_in = 0usize;

            while checked_in < alive {
                let event = match self.next_event(&mut barrier_rx).await {
                    Ok(event) => event,
                    Err(e) => {
                        self.fail_epoch(e, responders, &err_tx).await;
                        return;
                    }
                };

                match event {
                    BarrierEvent::Reached(notification) => {
                        checked_in += 1;
                        funcs.push(notification.func_id);
                        match notification.resp {
                            Some(resp) => responders.push(resp),
                            None => {
                                gone.insert(notification.func_id);
                                exited += 1;
                            }
                        }
                    }
                    BarrierEvent::Dropped { func_id } => {
                        if gone.insert(func_id) {
                            debug!("absorbing dropped worker: func_id={func_id}");
                            checked_in += 1;
                            exited += 1;
                        } else {
                            warn!("duplicate exit signal ignored: func_id={func_id}");
                        }
                    }
                }
            }

            if funcs.is_empty() {
                self.fail_epoch(MergeError::NoParticipants, responders, &err_tx)
                    .await;
                return;
            }

            debug!("merging models after iteration: participants={funcs:?}");
            let merged = match self.model.average(&funcs).await {
                Ok(()) => self.model.save().await,
                Err(e) => Err(e),
            };
            if let Err(e) = merged {
                self.fail_epoch(MergeError::Model(e), responders, &err_tx)
                    .await;
                return;
            }

            alive -= exited;
            if alive == 0 {
                info!(
                    "all functions finished, epoch merged: job_id={}",
                    self.model.job_id()
                );
                self.handle.gate().disarm();
                if self.merged_tx.send(()).await.is_err() {
                    error!("controller dropped the merged channel");
                }
                return;
            }

            debug!("re-arming barrier: remaining={alive}");
            barrier_rx = self.handle.arm_barrier(alive);
            answer(MergeResult::Succeeded, responders);
        }
    }

    async fn next_event(
        &self,
        rx: &mut mpsc::Receiver<BarrierEvent>,
    ) -> Result<BarrierEvent, MergeError> {
        let received = match self.deadline {
            Some(deadline) => time::timeout(deadline, rx.recv()).await.map_err(|_| {
                MergeError::DeadlineExceeded {
                    waited_secs: deadline.as_secs(),
                }
            })?,
            None => rx.recv().await,
        };
        received.ok_or(MergeError::BarrierClosed)
    }

    /// Fails the epoch: disarms the gate, answers every waiting worker,
    /// and reports the error to the controller.
    async fn fail_epoch(
        &self,
        err: MergeError,
        responders: Vec<oneshot::Sender<MergeResult>>,
        err_tx: &mpsc::Sender<MergeError>,
    ) {
        error!(
            "epoch merge failed: job_id={} err={err}",
            self.model.job_id()
        );
        self.handle.gate().disarm();
        answer(MergeResult::Failed, responders);
        if err_tx.send(err).await.is_err() {
            error!("controller dropped the merge error channel");
        }
    }
}

/// Replies to every worker that is waiting for another round. Workers
/// that exited sent no response channel and receive nothing.
fn answer(result: MergeResult, responders: Vec<oneshot::Sender<MergeResult>>) {
    for resp in responders {
        let _ = resp.send(result);
    }
}
