use std::collections::BTreeMap;
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use vpr_core::{CameraModel, DbId, Failure, Pose, Session, SignatureId, Window};
use vpr_features::Features;
use vpr_search::{Candidate, PoseEstimate, QueryWords};

use crate::pending::{PendingTable, RequestId};

/// A raw query as it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Query {
    /// Encoded image bytes.
    pub image: Vec<u8>,
    /// Intrinsics supplied with the image, size not yet known.
    pub camera: CameraModel,
}

/// Stage-specific content of a [`Message`].
#[derive(Debug)]
pub enum Payload {
    /// Input of the features stage.
    Query(Query),
    /// Input of the words stage.
    Extracted {
        /// Camera with the decoded image size.
        camera: CameraModel,
        /// Keypoints and descriptors.
        features: Features,
    },
    /// Input of the signatures stage.
    Quantized {
        /// Query camera.
        camera: CameraModel,
        /// Keypoints that matched a word.
        words: QueryWords,
    },
    /// Input of the perspective stage.
    Ranked {
        /// Query camera.
        camera: CameraModel,
        /// Keypoints that matched a word.
        words: QueryWords,
        /// Ranked candidates, best first, never empty.
        candidates: Vec<Candidate>,
    },
    /// Input of the visibility stage.
    Localized {
        /// Query camera.
        camera: CameraModel,
        /// Accepted pose.
        estimate: PoseEstimate,
    },
}

impl Payload {
    /// Variant name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Query(_) => "query",
            Payload::Extracted { .. } => "extracted",
            Payload::Quantized { .. } => "quantized",
            Payload::Ranked { .. } => "ranked",
            Payload::Localized { .. } => "localized",
        }
    }
}

/// What a stage hands back to its worker.
#[derive(Debug)]
pub enum Step {
    /// Forward to the next stage.
    Next(Payload),
    /// The session is finished.
    Done(Localization),
}

/// Successful result of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Localization {
    /// Matched signature.
    pub signature: SignatureId,
    /// Database of the matched signature.
    pub db_id: DbId,
    /// Query camera to world.
    pub pose: Pose,
    /// Inlier count of the accepted pose.
    pub inliers: usize,
    /// Names of the visible labels, sorted.
    pub labels: Vec<String>,
}

/// The single answer a session produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Final session record.
    pub session: Session,
    /// Pose and labels, or why there are none.
    pub outcome: Result<Localization, Failure>,
}

impl Response {
    /// A successful response.
    pub fn located(session: Session, localization: Localization) -> Self {
        Self {
            session,
            outcome: Ok(localization),
        }
    }

    /// A failed response.
    pub fn failed(session: Session, failure: Failure) -> Self {
        Self {
            session,
            outcome: Err(failure),
        }
    }

    /// Stage durations in milliseconds, keyed by window name.
    pub fn timings_ms(&self) -> BTreeMap<String, f64> {
        [
            Window::Overall,
            Window::Features,
            Window::Words,
            Window::Signatures,
            Window::Perspective,
        ]
        .into_iter()
        .filter_map(|w| {
            self.session
                .elapsed(w)
                .map(|d| (w.to_string(), d.as_secs_f64() * 1e3))
        })
        .collect()
    }

    /// The body rendered to synchronous and publish/subscribe clients.
    pub fn to_body(&self) -> ResponseBody {
        let (status, message, localization) = match &self.outcome {
            Ok(loc) => ("ok".to_string(), None, Some(loc.clone())),
            Err(f) => (f.kind().to_string(), Some(f.to_string()), None),
        };
        ResponseBody {
            session: self.session.id,
            status,
            message,
            localization,
            timings_ms: self.timings_ms(),
        }
    }
}

/// JSON rendering of a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    /// Session id.
    pub session: u64,
    /// `"ok"` or the failure kind.
    pub status: String,
    /// Human-readable failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pose and labels on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localization: Option<Localization>,
    /// Stage durations.
    pub timings_ms: BTreeMap<String, f64>,
}

/// Where a session's response goes. Consumed by [`Reply::deliver`], so a
/// session can be answered at most once.
#[derive(Debug)]
pub enum Reply {
    /// A caller awaiting the response directly.
    Direct(oneshot::Sender<Response>),
    /// An entry in the pending-request table.
    Pending {
        /// Table holding the entry.
        table: Arc<PendingTable>,
        /// Entry key.
        id: RequestId,
    },
}

impl Reply {
    /// Stamp the end of the session, log its timings and hand the response over.
    pub fn deliver(self, mut response: Response) {
        response.session.stamp_end(Window::Overall);
        log_timings(&response);

        match self {
            Reply::Direct(tx) => {
                if tx.send(response).is_err() {
                    log::debug!("caller went away before delivery");
                }
            }
            Reply::Pending { table, id } => {
                if !table.complete(id, response) {
                    log::debug!("request {id:#x} already timed out");
                }
            }
        }
    }
}

fn log_timings(response: &Response) {
    let timings = response
        .timings_ms()
        .into_iter()
        .map(|(k, v)| format!("{k}={v:.2}ms"))
        .collect::<Vec<_>>()
        .join(" ");
    match &response.outcome {
        Ok(loc) => log::info!(
            "session {} located on signature {} ({} inliers, {} labels) {timings}",
            response.session.id,
            loc.signature,
            loc.inliers,
            loc.labels.len()
        ),
        Err(f) if f.is_no_match() => {
            log::info!("session {} no match: {f} {timings}", response.session.id)
        }
        Err(f) => log::warn!("session {} failed: {f} {timings}", response.session.id),
    }
}

/// The unit of work passed between stages.
#[derive(Debug)]
pub struct Message {
    /// Session record, owned by whichever stage holds the message.
    pub session: Session,
    /// Stage input.
    pub payload: Payload,
    /// Response route.
    pub reply: Reply,
}
