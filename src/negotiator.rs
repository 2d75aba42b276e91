use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::JobClient;
use crate::error::{JobError, Result, VariantFailure};
use crate::events::JobEvent;
use crate::schema::{SchemaCatalog, SchemaVariant};
use crate::types::{GenerationRequest, JobHandle};

/// Finds a schema variant the endpoint accepts and submits the job with it.
///
/// The last accepted variant is remembered for the lifetime of this
/// negotiator and tried first next time. Clones share that cache; a
/// negotiator built with [`new`](Self::new) starts empty.
#[derive(Debug, Clone)]
pub struct SchemaNegotiator {
    catalog: SchemaCatalog,
    preferred: Arc<RwLock<Option<SchemaVariant>>>,
}

impl SchemaNegotiator {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            catalog,
            preferred: Arc::new(RwLock::new(None)),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Variant accepted most recently, if any.
    pub fn preferred(&self) -> Option<SchemaVariant> {
        match self.preferred.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::warn!("preferred-variant lock poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Forget the cached variant, forcing a full walk of the catalog on the
    /// next submission (e.g. after the endpoint was redeployed).
    pub fn clear_preferred(&self) {
        self.store_preferred(None);
    }

    pub(crate) fn store_preferred(&self, variant: Option<SchemaVariant>) {
        match self.preferred.write() {
            Ok(mut guard) => *guard = variant,
            Err(poisoned) => {
                tracing::warn!("preferred-variant lock poisoned, recovering");
                *poisoned.into_inner() = variant;
            }
        }
    }

    /// Order in which variants are tried: the override (or the cached
    /// preferred variant) first when it belongs to the catalog, then the
    /// rest of the catalog in priority order. Each variant appears once.
    pub fn attempt_order(&self, preferred: Option<&SchemaVariant>) -> Vec<SchemaVariant> {
        let first = preferred
            .cloned()
            .or_else(|| self.preferred())
            .filter(|v| self.catalog.contains(v));

        let mut order = Vec::with_capacity(self.catalog.len());
        if let Some(v) = &first {
            order.push(v.clone());
        }
        order.extend(
            self.catalog
                .variants()
                .iter()
                .filter(|v| Some(*v) != first.as_ref())
                .cloned(),
        );
        order
    }

    /// Submit `request`, walking the catalog until a variant is accepted.
    pub async fn submit(
        &self,
        client: &JobClient,
        request: &GenerationRequest,
        preferred: Option<&SchemaVariant>,
    ) -> Result<JobHandle> {
        self.submit_with_cancel(client, request, preferred, &CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), abandoning the walk when `cancel`
    /// fires. A job already accepted remotely is not affected.
    ///
    /// Rejections (non-2xx other than 401/404, or a body without a job id)
    /// advance to the next variant. Auth, not-found and transport errors
    /// abort immediately. If every variant got 429/5xx, the resulting
    /// [`JobError::NoVariantAccepted`] is retryable. Every attempt posts a fresh job, so a rejected
    /// variant that the endpoint half-accepted may leave an orphan job.
    pub async fn submit_with_cancel(
        &self,
        client: &JobClient,
        request: &GenerationRequest,
        preferred: Option<&SchemaVariant>,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        request.validate()?;
        let request = request.with_resolved_seed();
        let mut attempts = Vec::new();

        for variant in self.attempt_order(preferred) {
            let payload = variant.build(&request);
            tracing::debug!(
                endpoint = client.endpoint_id(),
                variant = variant.name(),
                "submitting job"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    client.emit(JobEvent::Cancelled { job_id: None });
                    return Err(JobError::Cancelled { job_id: None });
                }
                r = client.post_job(&payload) => r,
            };

            match result {
                Ok(job_id) => {
                    tracing::info!(
                        endpoint = client.endpoint_id(),
                        job_id = %job_id,
                        variant = variant.name(),
                        "job submitted"
                    );
                    client.emit(JobEvent::JobSubmitted {
                        job_id: job_id.clone(),
                        variant: variant.name().to_string(),
                    });
                    self.store_preferred(Some(variant.clone()));
                    client.emit(JobEvent::VariantAccepted {
                        variant: variant.name().to_string(),
                    });
                    return Ok(JobHandle {
                        job_id,
                        variant,
                        seed: request.seed,
                        submitted_at: Utc::now(),
                    });
                }
                Err(e) if rejects_variant(&e) => {
                    tracing::warn!(
                        endpoint = client.endpoint_id(),
                        variant = variant.name(),
                        error = %e,
                        "schema variant rejected"
                    );
                    let failure = VariantFailure {
                        variant,
                        status: e.status(),
                        reason: e.to_string(),
                    };
                    client.emit(JobEvent::VariantRejected {
                        variant: failure.variant.name().to_string(),
                        status: failure.status,
                        reason: failure.reason.clone(),
                    });
                    attempts.push(failure);
                }
                Err(e) => return Err(e),
            }
        }

        Err(JobError::NoVariantAccepted {
            endpoint_id: client.endpoint_id().to_string(),
            attempts,
        })
    }
}

/// Errors that mean "this payload shape is wrong", not "stop trying".
fn rejects_variant(err: &JobError) -> bool {
    matches!(err, JobError::Http { .. } | JobError::InvalidResponse(_))
}
