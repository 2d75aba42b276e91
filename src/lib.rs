//! # runpod-imagegen
//!
//! Async client for serverless Stable Diffusion endpoints that run jobs on
//! a remote GPU worker pool (`/v2/{endpointId}/run`, `/status`, `/health`).
//!
//! The pool's request schema is not known up front, so submissions are
//! negotiated against a catalog of payload shapes and the accepted shape is
//! remembered by the generator (and its clones) for later requests. Jobs
//! are then polled under a bounded budget and the finished output is
//! normalized into a single base64 image, whatever shape the worker
//! returned it in.
//!
//! ## Quick Start
//!
//! ```no_run
//! use runpod_imagegen::{EndpointConfig, GenerationRequest, ImageGenerator, JobError};
//!
//! # async fn example() -> runpod_imagegen::Result<()> {
//! let config = EndpointConfig::builder("my-endpoint-id", std::env::var("RUNPOD_API_KEY").unwrap())
//!     .build()?;
//! let generator = ImageGenerator::new(config);
//!
//! let health = generator.health().await?;
//! if !health.has_available_workers() {
//!     println!("pool is cold, expect queueing");
//! }
//!
//! let request = GenerationRequest::new("anime girl with black hair")
//!     .negative("lowres, blurry")
//!     .steps(20);
//!
//! match generator.generate(&request).await {
//!     Ok(image) => std::fs::write("out.png", image.bytes()?).unwrap(),
//!     Err(JobError::TimeoutExceeded { handle, .. }) => {
//!         // The job is still running remotely; try again later.
//!         let cancel = runpod_imagegen::CancellationToken::new();
//!         let image = generator.resume(&handle, &cancel).await?;
//!         std::fs::write("out.png", image.bytes()?).unwrap();
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod generator;
pub mod negotiator;
pub mod poller;
pub mod schema;
pub mod types;

pub use client::JobClient;
pub use config::{EndpointConfig, EndpointConfigBuilder, PollConfig};
pub use error::{ErrorKind, JobError, Result, VariantFailure};
pub use events::{EventHandler, JobEvent};
pub use extract::extract;
pub use generator::ImageGenerator;
pub use negotiator::SchemaNegotiator;
pub use schema::{SchemaCatalog, SchemaVariant};
pub use types::{
    GeneratedImage, GenerationRequest, JobCounts, JobHandle, JobStatus, PollResult, WorkerHealth,
};
pub use tokio_util::sync::CancellationToken;
