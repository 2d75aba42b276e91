use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::JobClient;
use crate::config::PollConfig;
use crate::error::{JobError, Result};
use crate::events::JobEvent;
use crate::extract::extract;
use crate::types::{GeneratedImage, JobHandle, JobStatus, PollResult};

/// Poll `handle` until it completes, then extract its image.
///
/// See [`wait_for_terminal`] for the polling rules.
pub async fn poll(
    client: &JobClient,
    handle: &JobHandle,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<GeneratedImage> {
    let done = wait_for_terminal(client, handle, config, cancel).await?;
    extract(done.output.as_ref().unwrap_or(&Value::Null), handle)
}

/// Poll `/status/{jobId}` until the job reaches COMPLETED, returning that
/// final [`PollResult`] with its raw output.
///
/// Each tick sleeps `config.interval` and then queries the status once.
/// - COMPLETED returns immediately; FAILED returns
///   [`JobError::RemoteJobFailed`] with the worker's error text. Nothing is
///   queried after a terminal state.
/// - QUEUED, IN_PROGRESS and UNKNOWN use up one of `config.max_attempts`.
///   When they run out, [`JobError::TimeoutExceeded`] carries the handle so
///   polling can be resumed later.
/// - Transport failures and HTTP 429/5xx do not use an attempt. More than
///   `config.max_transport_retries` of them in one call aborts with the
///   last error.
/// - 401 and 404 abort immediately.
///
/// Cancelling stops local polling only; the remote job keeps running.
pub async fn wait_for_terminal(
    client: &JobClient,
    handle: &JobHandle,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<PollResult> {
    let job_id = handle.job_id.as_str();
    let mut attempts: u32 = 0;
    let mut transport_errors: u32 = 0;

    while attempts < config.max_attempts {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(client, job_id)),
            r = async {
                tokio::time::sleep(config.interval).await;
                client.job_status(job_id).await
            } => r,
        };

        let tick = match result {
            Ok(tick) => tick,
            Err(e) if e.is_retryable() => {
                transport_errors += 1;
                if transport_errors > config.max_transport_retries {
                    tracing::warn!(job_id, error = %e, "giving up after repeated transport errors");
                    return Err(e);
                }
                tracing::warn!(
                    job_id,
                    retry = transport_errors,
                    error = %e,
                    "transient status error, retrying"
                );
                client.emit(JobEvent::TransientError {
                    job_id: job_id.to_string(),
                    retry: transport_errors,
                    error: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        attempts += 1;
        tracing::debug!(
            job_id,
            attempt = attempts,
            max_attempts = config.max_attempts,
            status = %tick.raw_status,
            "poll tick"
        );
        client.emit(JobEvent::PollTick {
            job_id: job_id.to_string(),
            attempt: attempts,
            max_attempts: config.max_attempts,
            status: tick.status,
        });

        match tick.status {
            JobStatus::Completed => {
                tracing::info!(job_id, execution_ms = ?tick.execution_time_ms, "job completed");
                client.emit(JobEvent::JobCompleted {
                    job_id: job_id.to_string(),
                    execution_time_ms: tick.execution_time_ms,
                });
                return Ok(tick);
            }
            JobStatus::Failed => {
                let detail = tick
                    .error
                    .unwrap_or_else(|| format!("worker reported {}", tick.raw_status));
                tracing::info!(job_id, error = %detail, "job failed");
                client.emit(JobEvent::JobFailed {
                    job_id: job_id.to_string(),
                    error: detail.clone(),
                });
                return Err(JobError::RemoteJobFailed {
                    job_id: job_id.to_string(),
                    variant: handle.variant.clone(),
                    detail,
                });
            }
            JobStatus::Queued | JobStatus::InProgress | JobStatus::Unknown => {}
        }
    }

    tracing::info!(job_id, attempts, "poll budget exhausted");
    client.emit(JobEvent::JobTimedOut {
        job_id: job_id.to_string(),
        attempts,
    });
    Err(JobError::TimeoutExceeded {
        handle: Box::new(handle.clone()),
        attempts,
    })
}

fn cancelled(client: &JobClient, job_id: &str) -> JobError {
    tracing::info!(job_id, "polling cancelled; remote job left running");
    client.emit(JobEvent::Cancelled {
        job_id: Some(job_id.to_string()),
    });
    JobError::Cancelled {
        job_id: Some(job_id.to_string()),
    }
}
