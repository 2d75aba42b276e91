use std::fmt;
use std::time::Duration;

use crate::error::{JobError, Result};

/// Default API root of the serverless platform.
pub const DEFAULT_BASE_URL: &str = "https://api.runpod.ai";

const DEFAULT_WORKFLOW_CHECKPOINT: &str = "sd_xl_base_1.0.safetensors";

/// Status-polling budget.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Sleep before each status query.
    pub interval: Duration,

    /// Status queries allowed before giving up with `TimeoutExceeded`.
    pub max_attempts: u32,

    /// Transport failures (network, 429, 5xx) tolerated during one poll.
    /// These do not consume `max_attempts`.
    pub max_transport_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
            max_transport_retries: 3,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Wall-clock spent sleeping if every attempt is used, excluding
    /// per-call HTTP time. Saturates at `Duration::MAX`.
    pub fn budget(&self) -> Duration {
        self.interval
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

/// Connection settings for one serverless endpoint.
///
/// Build with [`EndpointConfig::builder()`] or [`EndpointConfig::from_env()`].
/// Credentials are always supplied by the caller.
#[derive(Clone)]
pub struct EndpointConfig {
    /// API root, without the `/v2/{endpointId}` suffix.
    pub base_url: String,
    pub endpoint_id: String,
    pub api_key: String,

    /// Per-call timeout for `/run`.
    pub submit_timeout: Duration,
    /// Per-call timeout for `/status/{jobId}`.
    pub status_timeout: Duration,
    /// Per-call timeout for `/health` and `/schema`.
    pub health_timeout: Duration,

    pub poll: PollConfig,

    /// Fail fast with `NoWorkersAvailable` when `/health` reports no ready
    /// or idle workers, instead of submitting into a cold queue.
    pub abort_when_no_workers: bool,

    /// Checkpoint name used by the ComfyUI workflow schema variant.
    pub workflow_checkpoint: String,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("endpoint_id", &self.endpoint_id)
            .field("api_key", &"<redacted>")
            .field("submit_timeout", &self.submit_timeout)
            .field("status_timeout", &self.status_timeout)
            .field("health_timeout", &self.health_timeout)
            .field("poll", &self.poll)
            .field("abort_when_no_workers", &self.abort_when_no_workers)
            .field("workflow_checkpoint", &self.workflow_checkpoint)
            .finish()
    }
}

impl EndpointConfig {
    /// Start building a config for `endpoint_id` authenticated by `api_key`.
    pub fn builder(
        endpoint_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> EndpointConfigBuilder {
        EndpointConfigBuilder {
            config: EndpointConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                endpoint_id: endpoint_id.into(),
                api_key: api_key.into(),
                submit_timeout: Duration::from_secs(30),
                status_timeout: Duration::from_secs(10),
                health_timeout: Duration::from_secs(5),
                poll: PollConfig::default(),
                abort_when_no_workers: false,
                workflow_checkpoint: DEFAULT_WORKFLOW_CHECKPOINT.to_string(),
            },
        }
    }

    /// Load from `RUNPOD_ENDPOINT_ID`, `RUNPOD_API_KEY` and optionally
    /// `RUNPOD_API_BASE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| JobError::InvalidConfig(format!("{} is not set", key)))
        };

        let mut builder = Self::builder(required("RUNPOD_ENDPOINT_ID")?, required("RUNPOD_API_KEY")?);
        if let Some(base) = lookup("RUNPOD_API_BASE").filter(|v| !v.trim().is_empty()) {
            builder = builder.with_base_url(base);
        }
        builder.build()
    }

    /// `{base_url}/v2/{endpoint_id}`.
    pub fn endpoint_url(&self) -> String {
        format!("{}/v2/{}", self.base_url, self.endpoint_id)
    }
}

/// Builder for [`EndpointConfig`].
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Override the API root (tests, proxies, self-hosted gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.config.submit_timeout = timeout;
        self
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.config.status_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.config.health_timeout = timeout;
        self
    }

    /// Set the status-polling budget.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.config.poll = poll;
        self
    }

    pub fn with_abort_when_no_workers(mut self, enabled: bool) -> Self {
        self.config.abort_when_no_workers = enabled;
        self
    }

    pub fn with_workflow_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.config.workflow_checkpoint = checkpoint.into();
        self
    }

    /// Validate and build the final [`EndpointConfig`].
    pub fn build(self) -> Result<EndpointConfig> {
        let c = self.config;
        if c.endpoint_id.trim().is_empty() {
            return Err(JobError::InvalidConfig("endpoint id is empty".into()));
        }
        if c.api_key.trim().is_empty() {
            return Err(JobError::InvalidConfig("api key is empty".into()));
        }
        if c.endpoint_id.contains('/') {
            return Err(JobError::InvalidConfig(format!(
                "endpoint id must not contain '/': {}",
                c.endpoint_id
            )));
        }
        if c.poll.max_attempts == 0 {
            return Err(JobError::InvalidConfig(
                "poll max_attempts must be at least 1".into(),
            ));
        }
        if c.poll.interval.is_zero() {
            return Err(JobError::InvalidConfig("poll interval must be non-zero".into()));
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::builder("ep123", "key").build().unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.max_attempts, 30);
        assert!(!config.abort_when_no_workers);
        assert_eq!(config.endpoint_url(), "https://api.runpod.ai/v2/ep123");
    }

    #[test]
    fn test_builder_overrides() {
        let config = EndpointConfig::builder("ep", "key")
            .with_base_url("http://127.0.0.1:9000/")
            .with_poll(PollConfig::new(Duration::from_millis(500), 10).with_max_transport_retries(1))
            .with_abort_when_no_workers(true)
            .with_workflow_checkpoint("anything-v5.safetensors")
            .build()
            .unwrap();
        assert_eq!(config.endpoint_url(), "http://127.0.0.1:9000/v2/ep");
        assert_eq!(config.poll.max_attempts, 10);
        assert_eq!(config.poll.max_transport_retries, 1);
        assert!(config.abort_when_no_workers);
        assert_eq!(config.workflow_checkpoint, "anything-v5.safetensors");
    }

    #[test]
    fn test_build_rejects_missing_credentials() {
        assert!(EndpointConfig::builder("", "key").build().is_err());
        assert!(EndpointConfig::builder("ep", " ").build().is_err());
        assert!(EndpointConfig::builder("ep/run", "key").build().is_err());
    }

    #[test]
    fn test_build_rejects_empty_poll_budget() {
        let err = EndpointConfig::builder("ep", "key")
            .with_poll(PollConfig::new(Duration::from_secs(1), 0))
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));

        assert!(EndpointConfig::builder("ep", "key")
            .with_poll(PollConfig::new(Duration::ZERO, 5))
            .build()
            .is_err());
    }

    #[test]
    fn test_poll_budget() {
        let poll = PollConfig::new(Duration::from_secs(3), 20);
        assert_eq!(poll.budget(), Duration::from_secs(60));
    }

    #[test]
    fn test_poll_budget_saturates() {
        let poll = PollConfig::new(Duration::MAX, 2);
        assert_eq!(poll.budget(), Duration::MAX);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = EndpointConfig::builder("ep", "super-secret").build().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("RUNPOD_ENDPOINT_ID", "ep-env"),
            ("RUNPOD_API_KEY", "key-env"),
            ("RUNPOD_API_BASE", "http://localhost:8080"),
        ]
        .into_iter()
        .collect();
        let config =
            EndpointConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.endpoint_id, "ep-env");
        assert_eq!(config.endpoint_url(), "http://localhost:8080/v2/ep-env");
    }

    #[test]
    fn test_from_lookup_missing_key() {
        let err = EndpointConfig::from_lookup(|k| {
            (k == "RUNPOD_ENDPOINT_ID").then(|| "ep".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("RUNPOD_API_KEY"));
    }
}
