use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcome of a session that did not produce a pose.
///
/// Every variant ends the session; exactly one is delivered to the
/// originating ingestion channel, which decides how to render it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, Encode, Decode)]
pub enum Failure {
    /// The query image bytes could not be decoded.
    #[error("Failed to decode the query image: {0}")]
    DecodeFailure(String),

    /// The query was malformed before reaching any stage.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The feature extractor found nothing in the image.
    #[error("No features extracted from the query image")]
    NoFeaturesExtracted,

    /// No descriptor quantized to a visual word within threshold.
    #[error("No descriptor matched a visual word")]
    NoWordMatches,

    /// Retrieval produced an empty ranking.
    #[error("No candidate signatures share a word with the query")]
    NoCandidateSignatures,

    /// Every ranked candidate was rejected by geometric verification.
    #[error("All {tried} candidate signatures were rejected")]
    AllCandidatesExhausted {
        /// Number of candidates tried.
        tried: usize,
    },

    /// Transport or serialization fault while calling a remote stage.
    #[error("Remote call failed: {0}")]
    RemoteCallFailure(String),

    /// The asynchronous caller stopped waiting.
    #[error("Pending request timed out after {waited_ms} ms")]
    PendingRequestTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Too many requests are already in flight: the pending table or the
    /// entry queue is full.
    #[error("Too many requests in flight")]
    Overloaded,

    /// A stage faulted internally (panic or broken queue).
    #[error("Stage {stage} faulted: {reason}")]
    StageFault {
        /// Stage name.
        stage: String,
        /// What went wrong.
        reason: String,
    },
}

impl Failure {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::DecodeFailure(_) => "decode_failure",
            Failure::InvalidQuery(_) => "invalid_query",
            Failure::NoFeaturesExtracted => "no_features_extracted",
            Failure::NoWordMatches => "no_word_matches",
            Failure::NoCandidateSignatures => "no_candidate_signatures",
            Failure::AllCandidatesExhausted { .. } => "all_candidates_exhausted",
            Failure::RemoteCallFailure(_) => "remote_call_failure",
            Failure::PendingRequestTimeout { .. } => "pending_request_timeout",
            Failure::Overloaded => "overloaded",
            Failure::StageFault { .. } => "stage_fault",
        }
    }

    /// Whether the query itself matched nothing, as opposed to a fault.
    pub fn is_no_match(&self) -> bool {
        matches!(
            self,
            Failure::NoFeaturesExtracted
                | Failure::NoWordMatches
                | Failure::NoCandidateSignatures
                | Failure::AllCandidatesExhausted { .. }
        )
    }

    /// Build a [`Failure::StageFault`].
    pub fn stage_fault(stage: &str, reason: impl Into<String>) -> Self {
        Failure::StageFault {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}
