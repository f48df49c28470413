use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Result, StoreError};

/// Bounded pool of multiplexed Redis connections.
///
/// Connections are created lazily and returned on guard drop.
/// Acquisition blocks while every slot is handed out. `close` is
/// idempotent: pending and later acquisitions fail with
/// [`StoreError::Closed`].
pub struct ConnPool {
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
}

impl ConnPool {
    /// Creates a pool of at most `size` connections against `url`.
    pub fn new(url: &str, size: usize) -> Result<Self> {
        let client = redis::Client::open(url)?;
        debug!("created tensor store pool: url={url} size={size}");
        Ok(Self {
            client,
            idle: Mutex::new(Vec::with_capacity(size)),
            slots: Arc::new(Semaphore::new(size)),
            closed: AtomicBool::new(false),
        })
    }

    /// Borrows a connection, waiting for a free slot if necessary.
    pub async fn acquire(&self) -> Result<PooledConn<'_>> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let popped = self.idle.lock().pop();
        let conn = match popped {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };

        Ok(PooledConn {
            pool: self,
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Closes the pool and drops the idle connections. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.slots.close();
            self.idle.lock().clear();
            debug!("tensor store pool closed");
        }
    }
}

/// A borrowed connection, returned to the pool on drop.
pub struct PooledConn<'a> {
    pool: &'a ConnPool,
    conn: Option<MultiplexedConnection>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConn<'_> {
    pub fn conn(&mut self) -> &mut MultiplexedConnection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            // the slot is only emptied by Drop
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.pool.closed.load(Ordering::Acquire) {
                self.pool.idle.lock().push(conn);
            }
        }
    }
}
