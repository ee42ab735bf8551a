use std::sync::Arc;

use tokio::sync::mpsc;
use vpr_core::{CameraModel, Channel, Failure, Window};

use crate::message::{Response, ResponseBody};
use crate::{Pipeline, PipelineError};

/// First frame of a query message.
pub const HEADER: &[u8] = b"VPR Image";

/// Number of frames in a query message.
pub const FRAME_COUNT: usize = 9;

/// Delivers rendered results to subscribers. The transport lives behind this trait.
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError>;
}

/// A parsed query message.
///
/// Frames, in order: header, client identity, encoded image, height, width,
/// fx, fy, cx, cy. Numbers are ASCII decimal.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    /// Client identity, the suffix of the reply topic.
    pub identity: String,
    /// Encoded image bytes.
    pub image: Vec<u8>,
    /// Image height announced by the client.
    pub height: u32,
    /// Image width announced by the client.
    pub width: u32,
    /// Intrinsics.
    pub camera: CameraModel,
}

fn text<'a>(frames: &'a [Vec<u8>], index: usize, name: &str) -> Result<&'a str, Failure> {
    std::str::from_utf8(&frames[index])
        .map(str::trim)
        .map_err(|_| Failure::InvalidQuery(format!("{name} is not UTF-8")))
}

fn number<T: std::str::FromStr>(frames: &[Vec<u8>], index: usize, name: &str) -> Result<T, Failure> {
    text(frames, index, name)?
        .parse()
        .map_err(|_| Failure::InvalidQuery(format!("{name} is not a number")))
}

impl PublishMessage {
    /// Parse the frames of one message.
    pub fn parse(frames: &[Vec<u8>]) -> Result<Self, Failure> {
        if frames.len() != FRAME_COUNT {
            return Err(Failure::InvalidQuery(format!(
                "expected {FRAME_COUNT} frames, got {}",
                frames.len()
            )));
        }
        if frames[0] != HEADER {
            return Err(Failure::InvalidQuery("unknown message header".to_string()));
        }
        let identity = text(frames, 1, "identity")?.to_string();
        if identity.is_empty() {
            return Err(Failure::InvalidQuery("empty identity".to_string()));
        }

        let height = number(frames, 3, "height")?;
        let width = number(frames, 4, "width")?;
        let camera = CameraModel::new(
            number(frames, 5, "fx")?,
            number(frames, 6, "fy")?,
            number(frames, 7, "cx")?,
            number(frames, 8, "cy")?,
        )
        .map_err(|e| Failure::InvalidQuery(e.to_string()))?;

        Ok(Self {
            identity,
            image: frames[2].clone(),
            height,
            width,
            camera,
        })
    }
}

/// Feeds publish/subscribe query messages into a pipeline and publishes
/// each result on `<topic>/<identity>`.
pub struct PubSubIngress {
    pipeline: Arc<Pipeline>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl PubSubIngress {
    /// Create an ingress answering on `topic`.
    pub fn new(pipeline: Arc<Pipeline>, publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            pipeline,
            publisher,
            topic: topic.into(),
        }
    }

    /// Reply topic of a client.
    pub fn reply_topic(&self, identity: &str) -> String {
        format!("{}/{identity}", self.topic)
    }

    /// Handle one message and publish its result.
    ///
    /// Returns `Ok(None)` for messages that carry no usable client identity;
    /// those cannot be answered and are dropped.
    pub async fn handle(&self, frames: Vec<Vec<u8>>) -> Result<Option<ResponseBody>, PipelineError> {
        let response = match PublishMessage::parse(&frames) {
            Ok(message) => {
                log::debug!(
                    "query from {} ({} bytes, {}x{})",
                    message.identity,
                    message.image.len(),
                    message.width,
                    message.height
                );
                let response = self
                    .pipeline
                    .locate_pending(message.image, message.camera)
                    .await;
                (message.identity, response)
            }
            Err(failure) => {
                let identity = frames
                    .get(1)
                    .and_then(|f| std::str::from_utf8(f).ok())
                    .map(str::trim)
                    .filter(|s| !s.is_empty() && frames.first().is_some_and(|h| h == HEADER));
                let Some(identity) = identity else {
                    log::warn!("dropping message without identity: {failure}");
                    return Ok(None);
                };
                let mut session = self.pipeline.open_session(Channel::PublishSubscribe);
                session.stamp_end(Window::Overall);
                (identity.to_string(), Response::failed(session, failure))
            }
        };

        let (identity, response) = response;
        let body = response.to_body();
        let payload = serde_json::to_vec(&body)?;
        self.publisher.publish(&self.reply_topic(&identity), &payload)?;
        Ok(Some(body))
    }

    /// Handle messages from `inbound` concurrently until the sender side closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Vec<Vec<u8>>>) {
        while let Some(frames) = inbound.recv().await {
            let ingress = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = ingress.handle(frames).await {
                    log::warn!("failed to publish a result: {e}");
                }
            });
        }
    }
}
