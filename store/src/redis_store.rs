use async_trait::async_trait;
use ndarray::ArrayD;

use crate::{codec, ConnPool, Result, StoreError, TensorStore};

const SCAN_BATCH: usize = 100;

/// Tensor store backed by a shared Redis instance.
pub struct RedisStore {
    pool: ConnPool,
}

impl RedisStore {
    /// Connects a pool of `pool_size` connections to `url`.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self> {
        Ok(Self {
            pool: ConnPool::new(url, pool_size)?,
        })
    }
}

#[async_trait]
impl TensorStore for RedisStore {
    async fn get(&self, key: &str) -> Result<ArrayD<f32>> {
        let mut guard = self.pool.acquire().await?;
        let frame: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(guard.conn())
            .await?;

        match frame {
            Some(frame) => codec::decode(key, &frame),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, key: &str, tensor: &ArrayD<f32>) -> Result<()> {
        let frame = codec::encode(tensor);
        let mut guard = self.pool.acquire().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(frame)
            .query_async::<()>(guard.conn())
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{prefix}*");
        let mut guard = self.pool.acquire().await?;

        let mut removed = 0;
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(guard.conn())
                .await?;

            if !batch.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&batch)
                    .query_async::<usize>(guard.conn())
                    .await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }

    async fn close(&self) {
        self.pool.close();
    }
}
