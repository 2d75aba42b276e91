use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, Result};
use crate::schema::SchemaVariant;

/// A text-to-image request handed to the endpoint.
///
/// # Example
/// ```
/// use runpod_imagegen::GenerationRequest;
///
/// let req = GenerationRequest::new("anime girl with black hair")
///     .negative("lowres, blurry")
///     .size(512, 768)
///     .steps(20);
///
/// assert_eq!(req.height, 768);
/// assert!(req.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f64,
    pub sampler_name: String,
    /// -1 means random.
    pub seed: i64,
}

impl GenerationRequest {
    /// Create a request with defaults (512x512, 20 steps, guidance 7.0,
    /// "Euler a", random seed).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: 512,
            height: 512,
            steps: 20,
            guidance_scale: 7.0,
            sampler_name: "Euler a".to_string(),
            seed: -1,
        }
    }

    /// Set the negative prompt.
    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(prompt.into());
        self
    }

    /// Set output dimensions.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of sampling steps.
    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Set the classifier-free guidance scale.
    pub fn guidance_scale(mut self, scale: f64) -> Self {
        self.guidance_scale = scale;
        self
    }

    /// Set the sampler name (e.g. "Euler a", "DPM++ 2M Karras").
    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler_name = sampler.into();
        self
    }

    /// Set a specific seed. Use -1 (the default) for random.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject requests no worker could run.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(JobError::InvalidRequest("prompt is empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(JobError::InvalidRequest(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.steps == 0 {
            return Err(JobError::InvalidRequest("steps must be positive".into()));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(JobError::InvalidRequest(format!(
                "guidance scale must be positive, got {}",
                self.guidance_scale
            )));
        }
        Ok(())
    }

    /// Copy of this request with a random seed drawn when `seed` is negative.
    ///
    /// All variants tried for one submission carry the same concrete seed,
    /// and the seed ends up on the [`JobHandle`] so it can be stored with
    /// the image.
    pub fn with_resolved_seed(&self) -> Self {
        let mut resolved = self.clone();
        if resolved.seed < 0 {
            resolved.seed = rand::rng().random_range(0..i64::from(u32::MAX));
        }
        resolved
    }
}

/// Handle to a job accepted by the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    pub variant: SchemaVariant,
    pub seed: i64,
    pub submitted_at: DateTime<Utc>,
}

/// Remote job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    /// Malformed or unrecognized status. Treated as still running.
    Unknown,
}

impl JobStatus {
    /// Map a status string reported by the endpoint.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IN_QUEUE" | "QUEUED" => JobStatus::Queued,
            "IN_PROGRESS" | "RUNNING" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" | "CANCELLED" | "TIMED_OUT" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One status query's parsed result.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub status: JobStatus,
    /// Status string as the endpoint sent it (empty when missing).
    pub raw_status: String,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
}

impl PollResult {
    /// Parse a `/status/{jobId}` body. Never fails: unexpected shapes come
    /// back as [`JobStatus::Unknown`].
    pub fn from_json(json: &Value) -> Self {
        let raw_status = json
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let error = json.get("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

        Self {
            status: JobStatus::parse(&raw_status),
            raw_status,
            output: json.get("output").filter(|v| !v.is_null()).cloned(),
            error,
            execution_time_ms: json.get("executionTime").and_then(|v| v.as_u64()),
        }
    }
}

/// Job counters reported alongside worker counts by `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub in_progress: u32,
    #[serde(default)]
    pub in_queue: u32,
    #[serde(default)]
    pub retried: u32,
}

/// Snapshot of the worker pool reported by `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerHealth {
    pub workers_ready: u32,
    pub workers_busy: u32,
    pub workers_idle: u32,
    pub workers_initializing: u32,
    pub workers_throttled: u32,
    pub jobs: JobCounts,
}

impl WorkerHealth {
    /// Parse a `/health` body. Missing counters read as zero.
    pub fn from_json(json: &Value) -> Self {
        let count = |name: &str| {
            json.pointer(&format!("/workers/{}", name))
                .and_then(|v| v.as_u64())
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(0)
        };

        Self {
            workers_ready: count("ready"),
            // Some deployments report busy workers as "running".
            workers_busy: count("busy").max(count("running")),
            workers_idle: count("idle"),
            workers_initializing: count("initializing"),
            workers_throttled: count("throttled"),
            jobs: json
                .get("jobs")
                .and_then(|j| serde_json::from_value(j.clone()).ok())
                .unwrap_or_default(),
        }
    }

    /// False when no worker is ready or idle. Submissions are then likely
    /// to queue until the pool scales up. Advisory only.
    pub fn has_available_workers(&self) -> bool {
        self.workers_ready > 0 || self.workers_idle > 0
    }
}

/// A finished image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Base64 image content as returned by the worker.
    pub base64: String,
    pub job: JobHandle,
}

impl GeneratedImage {
    /// Decode the image into raw bytes. A `data:image/...;base64,` prefix
    /// is stripped first.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let encoded = match self.base64.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => self.base64.as_str(),
        };
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?)
    }

    /// Schema variant the job was accepted with.
    pub fn variant(&self) -> &SchemaVariant {
        &self.job.variant
    }

    pub fn seed(&self) -> i64 {
        self.job.seed
    }
}
