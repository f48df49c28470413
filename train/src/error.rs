use std::{error::Error, fmt};

use model::ModelError;

/// Terminal job failures. Anything not listed here (scheduler,
/// validation, or single-worker invocation trouble) is logged and
/// survived.
#[derive(Debug)]
pub enum JobError {
    /// The init invocation failed; the job aborts before epoch 1.
    InitInvoke(InvokeError),
    /// The init invocation returned no layers.
    EmptyLayers,
    /// Building the reference model failed.
    InitModel(ModelError),
    /// A rendezvous merge failed; the epoch's error becomes the job's.
    Merge(MergeError),
    /// The job was stopped from outside.
    ForcedStop,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::InitInvoke(e) => write!(f, "error invoking init function: {e}"),
            JobError::EmptyLayers => write!(f, "init function returned no layers"),
            JobError::InitModel(e) => write!(f, "error building model: {e}"),
            JobError::Merge(e) => write!(f, "error merging model: {e}"),
            JobError::ForcedStop => write!(f, "job was force stopped"),
        }
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JobError::InitInvoke(e) => Some(e),
            JobError::InitModel(e) => Some(e),
            JobError::Merge(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MergeError> for JobError {
    fn from(value: MergeError) -> Self {
        JobError::Merge(value)
    }
}

/// Failures of the per-epoch merge rendezvous.
#[derive(Debug)]
pub enum MergeError {
    /// No worker reached the barrier.
    NoParticipants,
    /// The barrier deadline elapsed before everyone checked in.
    DeadlineExceeded { waited_secs: u64 },
    /// Averaging or persisting the reference model failed.
    Model(ModelError),
    /// The barrier channel collapsed mid-epoch.
    BarrierClosed,
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::NoParticipants => write!(f, "no functions returned for merging"),
            MergeError::DeadlineExceeded { waited_secs } => {
                write!(f, "barrier deadline exceeded after {waited_secs}s")
            }
            MergeError::Model(e) => write!(f, "{e}"),
            MergeError::BarrierClosed => {
                write!(f, "barrier channel closed before all participants checked in")
            }
        }
    }
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MergeError::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ModelError> for MergeError {
    fn from(value: ModelError) -> Self {
        MergeError::Model(value)
    }
}

/// A single worker invocation failure. Never fatal on its own: the
/// worker is absorbed as finished and its siblings keep running.
#[derive(Debug)]
pub enum InvokeError {
    /// The request never completed.
    Http(reqwest::Error),
    /// The router or function replied with a non-success status.
    Status { code: u16 },
    /// The response body did not parse.
    Body(String),
    /// The summary came back without the expected metric.
    MissingMetric(&'static str),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Http(e) => write!(f, "request failed: {e}"),
            InvokeError::Status { code } => write!(f, "unexpected status code {code}"),
            InvokeError::Body(msg) => write!(f, "malformed response body: {msg}"),
            InvokeError::MissingMetric(metric) => {
                write!(f, "response missing metric {metric}")
            }
        }
    }
}

impl Error for InvokeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InvokeError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for InvokeError {
    fn from(value: reqwest::Error) -> Self {
        InvokeError::Http(value)
    }
}
