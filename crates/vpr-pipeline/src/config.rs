use std::path::Path;

use serde::{Deserialize, Serialize};
use vpr_features::ExtractorParams;
use vpr_index::WordIndexParams;
use vpr_search::{PoseSolverParams, RetrievalParams, VisibilityParams};

use crate::pending::PendingParams;
use crate::PipelineError;

/// Every tunable of the pipeline. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bundled feature extractor.
    pub extractor: ExtractorParams,
    /// Word quantization.
    pub index: WordIndexParams,
    /// Candidate ranking.
    pub retrieval: RetrievalParams,
    /// Geometric verification.
    pub solver: PoseSolverParams,
    /// Label visibility.
    pub visibility: VisibilityParams,
    /// Publish/subscribe pending requests.
    pub pending: PendingParams,
    /// Per-call timeout of remote stages, in milliseconds.
    pub remote_timeout_ms: u64,
    /// Capacity of the entry queue; `None` for unbounded. Queries arriving
    /// while it is full fail with `Overloaded`. Queues between stages are
    /// always unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorParams::default(),
            index: WordIndexParams::default(),
            retrieval: RetrievalParams::default(),
            solver: PoseSolverParams::default(),
            visibility: VisibilityParams::default(),
            pending: PendingParams::default(),
            remote_timeout_ms: 5_000,
            queue_capacity: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vpr.json");
        std::fs::write(
            &path,
            r#"{ "retrieval": { "top_k": 9 }, "pending": { "max_pending": 3 } }"#,
        )?;

        let config = PipelineConfig::from_json_file(&path)?;
        assert_eq!(config.retrieval.top_k, 9);
        assert_eq!(config.pending.max_pending, 3);
        assert_eq!(config.pending.timeout_ms, 10_000);
        assert_eq!(config.solver.min_inliers, 3);
        assert_eq!(config.remote_timeout_ms, 5_000);
        Ok(())
    }

    #[test]
    fn test_bad_json_is_an_error() -> Result<(), PipelineError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vpr.json");
        std::fs::write(&path, "{ not json")?;
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(PipelineError::Json(_))
        ));
        Ok(())
    }
}
