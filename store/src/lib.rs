//! Client for the shared in-memory tensor store.
//!
//! Tensors are addressed by `jobId/layerName/{weights|grad_<funcId>}`
//! keys (see [`keys`]) and stored as raw frames (see `codec`). The
//! Redis-backed implementation pools its connections; the in-memory
//! implementation backs tests and single-process runs.

mod codec;
mod error;
pub mod keys;
mod mem;
mod pool;
mod redis_store;

use async_trait::async_trait;
use ndarray::ArrayD;

pub use error::StoreError;
pub use mem::MemStore;
pub use pool::{ConnPool, PooledConn};
pub use redis_store::RedisStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared tensor storage for one job.
///
/// Implementations must be safe for concurrent use by many tasks of the
/// same job.
#[async_trait]
pub trait TensorStore: Send + Sync {
    /// Fetches the tensor stored under `key`.
    async fn get(&self, key: &str) -> Result<ArrayD<f32>>;

    /// Stores `tensor` under `key`, replacing any previous value.
    async fn set(&self, key: &str, tensor: &ArrayD<f32>) -> Result<()>;

    /// Deletes every key starting with `prefix`; returns how many keys
    /// were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Releases the client's resources. Idempotent; later calls on a
    /// closed store fail with [`StoreError::Closed`].
    async fn close(&self);
}
