use std::{env, time::Duration};

const DEFAULT_ROUTER_URL: &str = "http://router.fission";
const DEFAULT_SCHEDULER_URL: &str = "http://scheduler.faasml";
const DEFAULT_PS_URL: &str = "http://ps.faasml";
const DEFAULT_HISTORY_URL: &str = "http://controller.faasml";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_API_PORT: u16 = 9090;
const DEFAULT_POOL_SIZE: usize = 16;
const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_BARRIER_DEADLINE_SECS: u64 = 600;

/// Runtime configuration of one coordinator process.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Base URL of the function router.
    pub router_url: String,
    pub scheduler_url: String,
    pub ps_url: String,
    pub history_url: String,
    pub redis_url: String,
    /// Port the job API listens on; also handed to workers as `psPort`.
    pub api_port: u16,
    /// Tensor store pool size.
    pub pool_size: usize,
    /// Per-invocation HTTP timeout, surfaced as an invocation error.
    pub invoke_timeout: Duration,
    /// Barrier stall limit; `None` waits forever for stragglers.
    pub barrier_deadline: Option<Duration>,
    /// When true, scheduler replies update the job state but never the
    /// actual worker count.
    pub pin_parallelism: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            router_url: DEFAULT_ROUTER_URL.to_string(),
            scheduler_url: DEFAULT_SCHEDULER_URL.to_string(),
            ps_url: DEFAULT_PS_URL.to_string(),
            history_url: DEFAULT_HISTORY_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            api_port: DEFAULT_API_PORT,
            pool_size: DEFAULT_POOL_SIZE,
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
            barrier_deadline: Some(Duration::from_secs(DEFAULT_BARRIER_DEADLINE_SECS)),
            pin_parallelism: false,
        }
    }
}

impl JobConfig {
    /// Reads the configuration from the environment, falling back to
    /// the defaults field by field.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("FAASML_ROUTER_URL") {
            cfg.router_url = v;
        }
        if let Ok(v) = env::var("FAASML_SCHEDULER_URL") {
            cfg.scheduler_url = v;
        }
        if let Ok(v) = env::var("FAASML_PS_URL") {
            cfg.ps_url = v;
        }
        if let Ok(v) = env::var("FAASML_HISTORY_URL") {
            cfg.history_url = v;
        }
        if let Ok(v) = env::var("FAASML_REDIS_URL") {
            cfg.redis_url = v;
        }
        if let Ok(Ok(port)) = env::var("FAASML_API_PORT").map(|v| v.parse()) {
            cfg.api_port = port;
        }
        if let Ok(Ok(size)) = env::var("FAASML_POOL_SIZE").map(|v| v.parse()) {
            cfg.pool_size = size;
        }
        if let Ok(Ok(secs)) = env::var("FAASML_INVOKE_TIMEOUT_SECS").map(|v| v.parse()) {
            cfg.invoke_timeout = Duration::from_secs(secs);
        }
        if let Ok(Ok(secs)) = env::var("FAASML_BARRIER_DEADLINE_SECS").map(|v| v.parse::<u64>()) {
            // 0 disables the deadline entirely
            cfg.barrier_deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(v) = env::var("FAASML_PIN_PARALLELISM") {
            cfg.pin_parallelism = v == "1" || v.eq_ignore_ascii_case("true");
        }

        cfg
    }
}
