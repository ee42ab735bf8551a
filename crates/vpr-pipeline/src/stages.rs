use std::sync::Arc;

use vpr_core::{Failure, Session, Window};
use vpr_db::Catalog;
use vpr_features::{decode_image, FeatureExtractor};
use vpr_index::WordIndex;
use vpr_search::{PoseSolver, QueryWords, Retrieval, Visibility};

use crate::message::{Localization, Payload, Step};
use crate::stage::Stage;

fn unexpected(stage: &str, payload: &Payload) -> Failure {
    Failure::stage_fault(stage, format!("unexpected {} payload", payload.name()))
}

/// Decodes the query image and extracts features.
pub struct FeatureStage {
    extractor: Arc<dyn FeatureExtractor>,
}

impl FeatureStage {
    /// Create the stage around an extractor.
    pub fn new(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { extractor }
    }
}

impl Stage for FeatureStage {
    fn name(&self) -> &'static str {
        "features"
    }

    fn window(&self) -> Option<Window> {
        Some(Window::Features)
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let query = match payload {
            Payload::Query(query) => query,
            other => return Err(unexpected(self.name(), &other)),
        };

        let image =
            decode_image(&query.image).map_err(|e| Failure::DecodeFailure(e.to_string()))?;
        let camera = query
            .camera
            .with_size(image.width(), image.height())
            .map_err(|e| Failure::InvalidQuery(e.to_string()))?;

        let features = self
            .extractor
            .extract(&image)
            .map_err(|e| Failure::stage_fault(self.name(), e.to_string()))?;
        if features.is_empty() {
            return Err(Failure::NoFeaturesExtracted);
        }
        log::debug!(
            "session {}: {} features on {}x{}",
            session.id,
            features.len(),
            camera.width,
            camera.height
        );

        Ok(Step::Next(Payload::Extracted { camera, features }))
    }
}

/// Quantizes descriptors to visual words.
pub struct WordStage {
    index: Arc<WordIndex>,
}

impl WordStage {
    /// Create the stage around a word index.
    pub fn new(index: Arc<WordIndex>) -> Self {
        Self { index }
    }
}

impl Stage for WordStage {
    fn name(&self) -> &'static str {
        "words"
    }

    fn window(&self) -> Option<Window> {
        Some(Window::Words)
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let (camera, features) = match payload {
            Payload::Extracted { camera, features } => (camera, features),
            other => return Err(unexpected(self.name(), &other)),
        };

        let matches = self
            .index
            .quantize_batch(features.descriptors())
            .map_err(|e| Failure::InvalidQuery(e.to_string()))?;
        let words = QueryWords::from_quantized(
            features.keypoints(),
            matches.into_iter().map(|m| m.map(|m| m.word)),
        );
        if words.is_empty() {
            return Err(Failure::NoWordMatches);
        }
        log::debug!(
            "session {}: {}/{} descriptors matched a word",
            session.id,
            words.len(),
            features.len()
        );

        Ok(Step::Next(Payload::Quantized { camera, words }))
    }
}

/// Ranks stored signatures against the query words.
pub struct SignatureStage {
    catalog: Arc<Catalog>,
    retrieval: Retrieval,
}

impl SignatureStage {
    /// Create the stage.
    pub fn new(catalog: Arc<Catalog>, retrieval: Retrieval) -> Self {
        Self { catalog, retrieval }
    }
}

impl Stage for SignatureStage {
    fn name(&self) -> &'static str {
        "signatures"
    }

    fn window(&self) -> Option<Window> {
        Some(Window::Signatures)
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let (camera, words) = match payload {
            Payload::Quantized { camera, words } => (camera, words),
            other => return Err(unexpected(self.name(), &other)),
        };

        let candidates = self
            .retrieval
            .rank(&self.catalog.signatures, &words.word_ids());
        let Some(best) = candidates.first() else {
            return Err(Failure::NoCandidateSignatures);
        };
        log::debug!(
            "session {}: {} candidates, best {} ({:.3})",
            session.id,
            candidates.len(),
            best.id,
            best.score
        );

        Ok(Step::Next(Payload::Ranked {
            camera,
            words,
            candidates,
        }))
    }
}

/// Verifies candidates geometrically until a pose is accepted.
pub struct PerspectiveStage {
    catalog: Arc<Catalog>,
    solver: PoseSolver,
}

impl PerspectiveStage {
    /// Create the stage.
    pub fn new(catalog: Arc<Catalog>, solver: PoseSolver) -> Self {
        Self { catalog, solver }
    }
}

impl Stage for PerspectiveStage {
    fn name(&self) -> &'static str {
        "perspective"
    }

    fn window(&self) -> Option<Window> {
        Some(Window::Perspective)
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let (camera, words, candidates) = match payload {
            Payload::Ranked {
                camera,
                words,
                candidates,
            } => (camera, words, candidates),
            other => return Err(unexpected(self.name(), &other)),
        };

        let estimate = self
            .solver
            .localize(&self.catalog.signatures, &candidates, &words, &camera)
            .map_err(|e| Failure::AllCandidatesExhausted { tried: e.tried })?;
        log::debug!(
            "session {}: signature {} accepted with {}/{} inliers",
            session.id,
            estimate.signature,
            estimate.inliers,
            estimate.correspondences
        );

        Ok(Step::Next(Payload::Localized { camera, estimate }))
    }
}

/// Resolves the labels visible from the accepted pose and finishes the session.
pub struct VisibilityStage {
    catalog: Arc<Catalog>,
    visibility: Visibility,
}

impl VisibilityStage {
    /// Create the stage.
    pub fn new(catalog: Arc<Catalog>, visibility: Visibility) -> Self {
        Self {
            catalog,
            visibility,
        }
    }
}

impl Stage for VisibilityStage {
    fn name(&self) -> &'static str {
        "visibility"
    }

    // stamped as part of the overall window
    fn window(&self) -> Option<Window> {
        None
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let (camera, estimate) = match payload {
            Payload::Localized { camera, estimate } => (camera, estimate),
            other => return Err(unexpected(self.name(), &other)),
        };

        let labels = self.visibility.labels_visible(
            self.catalog.labels.for_db(estimate.db_id),
            &estimate.pose,
            &camera,
        );
        log::debug!("session {}: {} labels visible", session.id, labels.len());

        Ok(Step::Done(Localization {
            signature: estimate.signature,
            db_id: estimate.db_id,
            pose: estimate.pose,
            inliers: estimate.inliers,
            labels: labels.into_iter().collect(),
        }))
    }
}
