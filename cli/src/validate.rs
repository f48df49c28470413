//! Train-request validation. Every failure is collected so the user
//! sees the full list at once instead of fixing flags one by one.

pub const MAX_BATCH_SIZE: i64 = 1024;

/// Checks the numeric bounds of a train request.
pub fn check_bounds(batch: i64, epochs: i64, lr: f64) -> Vec<String> {
    let mut errors = Vec::new();

    if batch <= 0 || batch > MAX_BATCH_SIZE {
        errors.push(format!(
            "batch size should be between 0 and {MAX_BATCH_SIZE}"
        ));
    }
    if epochs <= 0 {
        errors.push("epochs should be a positive value".to_string());
    }
    if lr <= 0.0 {
        errors.push("learning rate should be bigger than zero".to_string());
    }

    errors
}
