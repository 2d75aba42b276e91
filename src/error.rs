use serde::Serialize;
use thiserror::Error;

use crate::schema::SchemaVariant;
use crate::types::JobHandle;

/// Errors returned by endpoint operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// Network-level request failure (DNS, connect, per-call timeout).
    #[error("{context}: {source}")]
    Transport {
        context: String,
        source: reqwest::Error,
    },

    /// The endpoint rejected the API key (HTTP 401).
    #[error("API key rejected by endpoint {endpoint_id}")]
    Auth { endpoint_id: String },

    /// The endpoint or job does not exist (HTTP 404).
    #[error("Endpoint {endpoint_id} not found{}", job_suffix(.job_id))]
    NotFound {
        endpoint_id: String,
        job_id: Option<String>,
    },

    /// The endpoint returned a non-success HTTP status not covered above.
    #[error("Endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Every schema variant in the catalog was rejected.
    #[error("No schema variant accepted by endpoint {endpoint_id} ({} tried)", .attempts.len())]
    NoVariantAccepted {
        endpoint_id: String,
        attempts: Vec<VariantFailure>,
    },

    /// The remote job reached a FAILED terminal state.
    #[error("Job {job_id} failed on worker ({}): {detail}", .variant.name())]
    RemoteJobFailed {
        job_id: String,
        variant: SchemaVariant,
        detail: String,
    },

    /// The poll budget ran out before the job reached a terminal state.
    /// The handle can be passed back to `ImageGenerator::resume`.
    #[error("Job {} still pending after {attempts} status checks", .handle.job_id)]
    TimeoutExceeded {
        handle: Box<JobHandle>,
        attempts: u32,
    },

    /// The job completed but its output carried no recognizable image.
    #[error("Job {job_id} completed without an image in its output")]
    NoImageInOutput { job_id: String },

    /// Health check reported no ready or idle workers and the config asks
    /// to abort instead of queueing.
    #[error("Endpoint {endpoint_id} has no ready or idle workers")]
    NoWorkersAvailable { endpoint_id: String },

    /// The caller cancelled the flow. Any remote job keeps running.
    #[error("Cancelled{}", job_suffix(.job_id))]
    Cancelled { job_id: Option<String> },

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    /// The response from the endpoint was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn job_suffix(job_id: &Option<String>) -> String {
    match job_id {
        Some(id) => format!(" (job {})", id),
        None => String::new(),
    }
}

/// Coarse classification of a [`JobError`], for callers deciding between
/// retry, resume, alerting and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Transport,
    Auth,
    NotFound,
    SchemaRejected,
    RemoteJobFailed,
    TimeoutExceeded,
    NoImageInOutput,
    NoWorkers,
    Cancelled,
    Invalid,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Transport { .. } => ErrorKind::Transport,
            JobError::Http { status, .. } if is_transient_status(*status) => ErrorKind::Transport,
            // Every variant bounced off an overloaded or rate-limited pool:
            // the shapes were never really judged.
            JobError::NoVariantAccepted { attempts, .. }
                if !attempts.is_empty() && attempts.iter().all(VariantFailure::is_transient) =>
            {
                ErrorKind::Transport
            }
            JobError::Auth { .. } => ErrorKind::Auth,
            JobError::NotFound { .. } => ErrorKind::NotFound,
            JobError::Http { .. } | JobError::NoVariantAccepted { .. } => {
                ErrorKind::SchemaRejected
            }
            JobError::RemoteJobFailed { .. } => ErrorKind::RemoteJobFailed,
            JobError::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            JobError::NoImageInOutput { .. } => ErrorKind::NoImageInOutput,
            JobError::NoWorkersAvailable { .. } => ErrorKind::NoWorkers,
            JobError::Cancelled { .. } => ErrorKind::Cancelled,
            JobError::InvalidRequest(_)
            | JobError::InvalidResponse(_)
            | JobError::InvalidConfig(_)
            | JobError::Decode(_)
            | JobError::Json(_) => ErrorKind::Invalid,
        }
    }

    /// Whether repeating the same call may succeed: transport failures,
    /// HTTP 429/5xx, and negotiations where every variant got 429/5xx.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// HTTP status behind this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            JobError::Auth { .. } => Some(401),
            JobError::NotFound { .. } => Some(404),
            JobError::Http { status, .. } => Some(*status),
            JobError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// One rejected schema variant, kept for diagnostics when negotiation fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantFailure {
    pub variant: SchemaVariant,
    pub status: Option<u16>,
    pub reason: String,
}

impl VariantFailure {
    /// The endpoint answered 429 or 5xx, which says nothing about the shape.
    pub fn is_transient(&self) -> bool {
        self.status.is_some_and(is_transient_status)
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, JobError>;
