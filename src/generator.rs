use tokio_util::sync::CancellationToken;

use crate::client::JobClient;
use crate::config::EndpointConfig;
use crate::error::{JobError, Result};
use crate::events::JobEvent;
use crate::negotiator::SchemaNegotiator;
use crate::poller;
use crate::schema::{SchemaCatalog, SchemaVariant};
use crate::types::{GeneratedImage, GenerationRequest, JobHandle, WorkerHealth};

/// Runs a request end to end: negotiate a schema, submit, poll, extract.
///
/// Cheap to clone; clones share the HTTP pool and the preferred-variant
/// cache, so one generator can serve many concurrent requests. The cache
/// belongs to the generator, not the process: generators built separately
/// with [`new`](Self::new) or [`from_client`](Self::from_client) each
/// rediscover the schema. Build one per endpoint and clone it.
///
/// # Example
/// ```no_run
/// use runpod_imagegen::{EndpointConfig, GenerationRequest, ImageGenerator};
///
/// # async fn example() -> runpod_imagegen::Result<()> {
/// let generator = ImageGenerator::new(EndpointConfig::from_env()?);
///
/// let image = generator
///     .generate(&GenerationRequest::new("anime girl with black hair").steps(20))
///     .await?;
/// std::fs::write("out.png", image.bytes()?).unwrap();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ImageGenerator {
    client: JobClient,
    negotiator: SchemaNegotiator,
}

impl ImageGenerator {
    /// Generator over the standard schema catalog.
    pub fn new(config: EndpointConfig) -> Self {
        Self::from_client(JobClient::new(config))
    }

    /// Wrap a preconfigured client (custom `reqwest::Client`, event handler).
    pub fn from_client(client: JobClient) -> Self {
        let catalog = SchemaCatalog::standard(client.config().workflow_checkpoint.clone());
        Self {
            client,
            negotiator: SchemaNegotiator::new(catalog),
        }
    }

    /// Replace the schema catalog. Resets the preferred-variant cache.
    pub fn with_catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.negotiator = SchemaNegotiator::new(catalog);
        self
    }

    pub fn client(&self) -> &JobClient {
        &self.client
    }

    pub fn negotiator(&self) -> &SchemaNegotiator {
        &self.negotiator
    }

    /// Variant that will be tried first on the next submission.
    pub fn preferred_variant(&self) -> Option<SchemaVariant> {
        self.negotiator.preferred()
    }

    pub async fn health(&self) -> Result<WorkerHealth> {
        self.client.health().await
    }

    /// Generate one image with no caller-side cancellation.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        self.generate_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Generate one image, stopping at the next suspension point once
    /// `cancel` fires. A job already submitted keeps running remotely.
    pub async fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage> {
        let handle = self.submit(request, None, cancel).await?;
        self.resume(&handle, cancel).await
    }

    /// Negotiate and submit without waiting for the result.
    ///
    /// When the config sets `abort_when_no_workers`, `/health` is queried
    /// first and an empty pool fails with [`JobError::NoWorkersAvailable`].
    pub async fn submit(
        &self,
        request: &GenerationRequest,
        preferred: Option<&SchemaVariant>,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        request.validate()?;

        if self.client.config().abort_when_no_workers {
            let health = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.client.emit(JobEvent::Cancelled { job_id: None });
                    return Err(JobError::Cancelled { job_id: None });
                }
                h = self.client.health() => h?,
            };
            if !health.has_available_workers() {
                tracing::warn!(
                    endpoint = self.client.endpoint_id(),
                    busy = health.workers_busy,
                    "no ready or idle workers, not submitting"
                );
                return Err(JobError::NoWorkersAvailable {
                    endpoint_id: self.client.endpoint_id().to_string(),
                });
            }
        }

        self.negotiator
            .submit_with_cancel(&self.client, request, preferred, cancel)
            .await
    }

    /// Poll an already-submitted job to completion, e.g. after a previous
    /// call ended in [`JobError::TimeoutExceeded`]. Uses a fresh poll budget.
    pub async fn resume(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage> {
        poller::poll(&self.client, handle, &self.client.config().poll, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ImageGenerator {
        ImageGenerator::new(
            EndpointConfig::builder("ep", "key")
                .with_workflow_checkpoint("anything-v5.safetensors")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_standard_catalog_uses_configured_checkpoint() {
        let g = generator();
        let last = g.negotiator().catalog().variants().last().cloned();
        assert_eq!(
            last,
            Some(SchemaVariant::Workflow {
                checkpoint: "anything-v5.safetensors".into()
            })
        );
        assert!(g.preferred_variant().is_none());
    }

    #[test]
    fn test_custom_catalog() {
        let g = generator().with_catalog(SchemaCatalog::new([SchemaVariant::Flat]));
        assert_eq!(g.negotiator().catalog().len(), 1);
    }

    #[test]
    fn test_preferred_variant_is_per_generator() {
        let g = generator();
        let clone = g.clone();
        let separate = generator();

        g.negotiator().store_preferred(Some(SchemaVariant::Flat));
        assert_eq!(clone.preferred_variant(), Some(SchemaVariant::Flat));
        assert_eq!(separate.preferred_variant(), None);
    }

    #[tokio::test]
    async fn test_invalid_request_never_hits_network() {
        let err = generator()
            .generate(&GenerationRequest::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(_)));
    }
}
