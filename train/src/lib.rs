//! Per-job training coordinator: worker invocation fan-out, the K-AVG
//! rendezvous merger, scheduler renegotiation, and the job HTTP API.
//!
//! One coordinator process serves one job. The controller
//! ([`TrainJob`]) owns the epoch loop; a long-lived [`merger::Merger`]
//! task owns the reference model and releases the rendezvous barriers;
//! transient invoker tasks carry the HTTP fan-out to the worker
//! functions, which call back through [`rpc`].

pub mod clients;
pub mod config;
pub mod error;
pub mod invoker;
pub mod job;
pub mod merger;
pub mod rendezvous;
pub mod rpc;

pub use config::JobConfig;
pub use error::{InvokeError, JobError, MergeError};
pub use job::TrainJob;
pub use rendezvous::{job_channels, JobHandle, JobIntake, MergeResult};
