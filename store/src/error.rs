use std::{error::Error, fmt};

/// Tensor store failures.
#[derive(Debug)]
pub enum StoreError {
    /// No tensor lives under the requested key.
    NotFound(String),
    /// The stored bytes do not decode into a tensor.
    Corrupt { key: String, reason: String },
    /// The backend refused or dropped the operation.
    Backend(String),
    /// The client was already closed.
    Closed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "no tensor under key {key}"),
            StoreError::Corrupt { key, reason } => {
                write!(f, "corrupt tensor under key {key}: {reason}")
            }
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
            StoreError::Closed => write!(f, "tensor store is closed"),
        }
    }
}

impl Error for StoreError {}

impl From<redis::RedisError> for StoreError {
    fn from(value: redis::RedisError) -> Self {
        StoreError::Backend(value.to_string())
    }
}
