use serde::Serialize;
use std::sync::Arc;

use crate::types::JobStatus;

/// Lifecycle events emitted while a request moves through negotiation,
/// polling and extraction.
///
/// Subscribe with [`JobClient::with_event_handler`](crate::JobClient::with_event_handler).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    /// A schema variant was rejected and negotiation moves on.
    #[serde(rename_all = "camelCase")]
    VariantRejected {
        variant: String,
        status: Option<u16>,
        reason: String,
    },
    /// The endpoint accepted a job.
    #[serde(rename_all = "camelCase")]
    JobSubmitted { job_id: String, variant: String },
    /// A variant became the preferred one for later requests.
    #[serde(rename_all = "camelCase")]
    VariantAccepted { variant: String },
    /// One status query returned.
    #[serde(rename_all = "camelCase")]
    PollTick {
        job_id: String,
        attempt: u32,
        max_attempts: u32,
        status: JobStatus,
    },
    /// A status query failed at the transport level and will be retried.
    #[serde(rename_all = "camelCase")]
    TransientError {
        job_id: String,
        retry: u32,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    JobCompleted {
        job_id: String,
        execution_time_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    JobFailed { job_id: String, error: String },
    /// The poll budget ran out. The job may still finish remotely.
    #[serde(rename_all = "camelCase")]
    JobTimedOut { job_id: String, attempts: u32 },
    /// Local polling stopped on request. The remote job is not cancelled.
    #[serde(rename_all = "camelCase")]
    Cancelled { job_id: Option<String> },
}

/// Callback receiving [`JobEvent`]s. Must be cheap; it runs inline on the
/// polling task.
pub type EventHandler = Arc<dyn Fn(&JobEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::PollTick {
            job_id: "job-1".into(),
            attempt: 2,
            max_attempts: 10,
            status: JobStatus::InProgress,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pollTick");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["maxAttempts"], 10);
        assert_eq!(json["status"], "IN_PROGRESS");
    }

    #[test]
    fn test_cancelled_event_without_job() {
        let json = serde_json::to_string(&JobEvent::Cancelled { job_id: None }).unwrap();
        assert!(json.contains("\"type\":\"cancelled\""));
        assert!(json.contains("\"jobId\":null"));
    }
}
