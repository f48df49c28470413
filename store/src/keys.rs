//! Key naming for the job-scoped tensor namespace.
//!
//! Every key is prefixed by the job id so a job's tensors can be
//! dropped wholesale at teardown without touching other jobs.

/// Key of a layer's reference weight tensor.
pub fn weights(job_id: &str, layer: &str) -> String {
    format!("{job_id}/{layer}/weights")
}

/// Key of the delta staged by worker `func_id` for `layer`.
pub fn delta(job_id: &str, layer: &str, func_id: usize) -> String {
    format!("{job_id}/{layer}/grad_{func_id}")
}

/// Prefix covering every tensor owned by `job_id`.
pub fn job_prefix(job_id: &str) -> String {
    format!("{job_id}/")
}
