use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::{JobError, Result};
use crate::events::{EventHandler, JobEvent};
use crate::types::{PollResult, WorkerHealth};

/// Async client for one serverless endpoint's HTTP surface.
///
/// Thin wrapper over `/run`, `/status/{jobId}`, `/health` and `/schema`
/// that classifies HTTP failures into [`JobError`] variants. Orchestration
/// lives in [`ImageGenerator`](crate::ImageGenerator).
///
/// # Example
/// ```no_run
/// use runpod_imagegen::{EndpointConfig, JobClient};
///
/// # async fn example() -> runpod_imagegen::Result<()> {
/// let config = EndpointConfig::from_env()?;
/// let client = JobClient::new(config);
/// let health = client.health().await?;
/// println!("{} workers ready", health.workers_ready);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobClient {
    http: Client,
    config: Arc<EndpointConfig>,
    events: Option<EventHandler>,
}

impl fmt::Debug for JobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobClient")
            .field("config", &self.config)
            .field("has_event_handler", &self.events.is_some())
            .finish()
    }
}

impl JobClient {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            http: Client::new(),
            config: Arc::new(config),
            events: None,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Subscribe to [`JobEvent`]s emitted by negotiation and polling.
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.events = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn endpoint_id(&self) -> &str {
        &self.config.endpoint_id
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        if let Some(handler) = &self.events {
            handler(&event);
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint_url(), path)
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration, url: &str) -> Result<Response> {
        request
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| JobError::Transport {
                context: format!(
                    "Cannot reach endpoint {} at {}",
                    self.config.endpoint_id, url
                ),
                source: e,
            })
    }

    /// Map 401/404/other non-2xx responses to their error variants.
    async fn classify(&self, resp: Response, job_id: Option<&str>) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(JobError::Auth {
                endpoint_id: self.config.endpoint_id.clone(),
            }),
            StatusCode::NOT_FOUND => Err(JobError::NotFound {
                endpoint_id: self.config.endpoint_id.clone(),
                job_id: job_id.map(String::from),
            }),
            _ => Err(JobError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    // ── Submit ──────────────────────────────────────────────────────

    /// POST `payload` to `/run`. Returns the remote job id.
    ///
    /// Not idempotent: every successful call creates a remote job.
    pub async fn post_job(&self, payload: &Value) -> Result<String> {
        let url = self.url("run");
        let resp = self
            .send(self.http.post(&url).json(payload), self.config.submit_timeout, &url)
            .await?;
        let resp = self.classify(resp, None).await?;

        let text = resp.text().await.map_err(|e| JobError::Transport {
            context: "Failed to read /run response".into(),
            source: e,
        })?;
        let json: Value = serde_json::from_str(&text).map_err(|_| {
            JobError::InvalidResponse(format!("/run returned non-JSON body: {}", text))
        })?;

        match json.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => {
                let detail = json
                    .get("error")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Response missing job id".into());
                Err(JobError::InvalidResponse(detail))
            }
        }
    }

    // ── Status ──────────────────────────────────────────────────────

    /// GET `/status/{job_id}` once.
    ///
    /// A body that is not JSON or lacks a known status comes back as
    /// [`JobStatus::Unknown`](crate::JobStatus::Unknown) rather than an error.
    pub async fn job_status(&self, job_id: &str) -> Result<PollResult> {
        let url = self.url(&format!("status/{}", job_id));
        let resp = self
            .send(self.http.get(&url), self.config.status_timeout, &url)
            .await?;
        let resp = self.classify(resp, Some(job_id)).await?;

        let text = resp.text().await.map_err(|e| JobError::Transport {
            context: format!("Failed to read status of job {}", job_id),
            source: e,
        })?;
        let json = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);
        Ok(PollResult::from_json(&json))
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Query worker-pool capacity via `/health`. Advisory only: a pool with
    /// no available workers is reported, not treated as an error.
    pub async fn health(&self) -> Result<WorkerHealth> {
        let url = self.url("health");
        let resp = self
            .send(self.http.get(&url), self.config.health_timeout, &url)
            .await?;
        let resp = self.classify(resp, None).await?;

        let json: Value = resp.json().await.map_err(|e| {
            JobError::InvalidResponse(format!("Failed to parse /health response: {}", e))
        })?;
        if json.get("workers").is_none() {
            return Err(JobError::InvalidResponse(
                "/health response missing workers".into(),
            ));
        }
        Ok(WorkerHealth::from_json(&json))
    }

    // ── Schema ──────────────────────────────────────────────────────

    /// Fetch the service-defined input schema, if the deployment exposes
    /// one. Advisory only; negotiation does not depend on it.
    pub async fn schema(&self) -> Result<Option<Value>> {
        let url = self.url("schema");
        let resp = self
            .send(self.http.get(&url), self.config.health_timeout, &url)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = self.classify(resp, None).await?;

        let text = resp.text().await.map_err(|e| JobError::Transport {
            context: "Failed to read /schema response".into(),
            source: e,
        })?;
        Ok(Some(
            serde_json::from_str(&text).unwrap_or(Value::String(text)),
        ))
    }
}
