use std::{error::Error, fmt};

use store::StoreError;

/// Reference model failures.
#[derive(Debug)]
pub enum ModelError {
    /// A layer named by the init function has no weight tensor.
    MissingLayer(String),
    /// A barrier participant never staged its delta for a layer.
    MissingDelta { layer: String, func_id: usize },
    /// A staged delta does not match the reference layer shape.
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A merge was requested with nobody at the barrier.
    NoParticipants,
    /// The tensor store failed underneath.
    Store(StoreError),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::MissingLayer(layer) => {
                write!(f, "layer {layer} has no weight tensor in the store")
            }
            ModelError::MissingDelta { layer, func_id } => {
                write!(f, "no staged delta for layer {layer} from worker {func_id}")
            }
            ModelError::ShapeMismatch {
                layer,
                expected,
                got,
            } => write!(
                f,
                "staged delta for layer {layer} has shape {got:?}, expected {expected:?}"
            ),
            ModelError::NoParticipants => write!(f, "no functions returned for merging"),
            ModelError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ModelError {
    fn from(value: StoreError) -> Self {
        ModelError::Store(value)
    }
}
