#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-pipeline
//!
//! A query travels through five stages, each on its own thread with its own
//! inbound queue:
//!
//! 1. **features**: decode the image and extract keypoints with descriptors
//! 2. **words**: quantize descriptors to visual words
//! 3. **signatures**: rank stored signatures by weighted word votes
//! 4. **perspective**: verify candidates with RANSAC EPnP until one is accepted
//! 5. **visibility**: resolve the labels seen from the accepted pose
//!
//! Any stage may end a session early with a [`vpr_core::Failure`]; either
//! way exactly one [`Response`] reaches the caller. The features stage and
//! the last three stages can run on other hosts through [`remote`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vpr_core::CameraModel;
//! use vpr_db::Catalog;
//! use vpr_pipeline::Pipeline;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(Catalog::load_all(&["office.vprdb"])?);
//! let pipeline = Pipeline::builder(catalog).build()?;
//!
//! let image = std::fs::read("query.jpg")?;
//! let camera = CameraModel::new(525.0, 525.0, 319.5, 239.5)?;
//! let response = pipeline.locate(image, camera).await;
//! println!("{}", serde_json::to_string_pretty(&response.to_body())?);
//! pipeline.shutdown();
//! # Ok(())
//! # }
//! ```

mod config;
mod message;
mod pending;
mod pipeline;
mod pubsub;

/// Stage servers and clients.
pub mod remote;

/// The stage abstraction and its worker.
pub mod stage;

/// Local stage implementations.
pub mod stages;

pub use config::PipelineConfig;
pub use message::{Localization, Message, Payload, Query, Reply, Response, ResponseBody, Step};
pub use pending::{ConnectionInfo, PendingParams, PendingTable, RequestId, Waiter};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pubsub::{PubSubIngress, PublishMessage, Publisher, FRAME_COUNT, HEADER};

use thiserror::Error;

/// Errors raised while building or operating a pipeline outside of a session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The vocabulary could not be indexed.
    #[error("Failed to build the word index: {0}")]
    Index(#[from] vpr_index::IndexError),

    /// A stage thread could not be started.
    #[error("Failed to spawn the {0} stage: {1}")]
    Spawn(&'static str, #[source] std::io::Error),

    /// A remote stage could not create its runtime.
    #[error("Failed to start a runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Io error
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or response rendering failed.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport refused a result.
    #[error("Publish failed: {0}")]
    Publish(String),
}
