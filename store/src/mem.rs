use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ndarray::ArrayD;
use parking_lot::RwLock;

use crate::{Result, StoreError, TensorStore};

/// In-memory store used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemStore {
    tensors: RwLock<HashMap<String, ArrayD<f32>>>,
    closed: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TensorStore for MemStore {
    async fn get(&self, key: &str) -> Result<ArrayD<f32>> {
        self.guard()?;
        self.tensors
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, tensor: &ArrayD<f32>) -> Result<()> {
        self.guard()?;
        self.tensors.write().insert(key.to_string(), tensor.clone());
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.guard()?;
        let mut tensors = self.tensors.write();
        let before = tensors.len();
        tensors.retain(|key, _| !key.starts_with(prefix));
        Ok(before - tensors.len())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
