//! Running stages on other hosts.
//!
//! A stage server wraps local stage logic in a [`StageService`] and answers
//! framed requests over TCP. On the calling side a remote stage forwards its
//! payload through an [`RpcClient`]; every transport, framing or decoding
//! fault becomes [`vpr_core::Failure::RemoteCallFailure`] for that session.

mod client;
pub mod codec;
mod server;
mod service;
mod stages;

pub use client::RpcClient;
pub use server::RpcServer;
pub use service::{FeatureService, SearchService, StageService};
pub use stages::{RemoteFeatureStage, RemoteSearchStage};

use bincode::{Decode, Encode};
use thiserror::Error;
use vpr_core::{CameraModel, Failure, Session, SessionId};
use vpr_features::Features;
use vpr_search::QueryWords;

use crate::message::{Localization, Query};

/// Transport-level errors of the distribution layer.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Io error
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A frame body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame exceeds the size limit.
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced or actual length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// The peer did not answer in time.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The peer closed the connection without answering.
    #[error("Connection closed before a response")]
    Closed,

    /// The peer answered with the wrong kind of response.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    /// The response carries a different session than the request.
    #[error("Response for session {found} answers a request for session {expected}")]
    SessionMismatch {
        /// Session the request carried.
        expected: SessionId,
        /// Session the response carried.
        found: SessionId,
    },
}

/// Input of a remote features stage.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ExtractRequest {
    /// Session record.
    pub session: Session,
    /// Image and intrinsics.
    pub query: Query,
}

/// Output of a remote features stage.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ExtractResponse {
    /// Session record with the features window stamped.
    pub session: Session,
    /// Camera with the decoded image size.
    pub camera: CameraModel,
    /// Keypoints and descriptors.
    pub features: Features,
}

/// Input of a remote search: retrieval, pose and visibility.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LocateRequest {
    /// Session record.
    pub session: Session,
    /// Query camera.
    pub camera: CameraModel,
    /// Keypoints with their word ids.
    pub words: QueryWords,
}

/// Output of a remote search.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LocateResponse {
    /// Session record with the search windows stamped.
    pub session: Session,
    /// Pose and labels.
    pub localization: Localization,
}

/// A request to a stage server.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum RpcRequest {
    /// Decode and extract features.
    Extract(ExtractRequest),
    /// Rank, verify and resolve labels.
    Locate(LocateRequest),
}

impl RpcRequest {
    /// Session carried by the request.
    pub fn session(&self) -> &Session {
        match self {
            RpcRequest::Extract(r) => &r.session,
            RpcRequest::Locate(r) => &r.session,
        }
    }
}

/// A stage server's answer.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum RpcResponse {
    /// Features of an [`RpcRequest::Extract`].
    Extracted(ExtractResponse),
    /// Result of an [`RpcRequest::Locate`].
    Located(LocateResponse),
    /// The session ended on the remote host.
    Failed {
        /// Session record as far as the remote host got.
        session: Session,
        /// Why it ended.
        failure: Failure,
    },
}
