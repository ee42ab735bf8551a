use std::sync::Arc;

use vpr_core::{Failure, Session};
use vpr_db::Catalog;
use vpr_features::FeatureExtractor;
use vpr_search::{PoseSolver, Retrieval, Visibility};

use super::{ExtractResponse, LocateResponse, RpcRequest, RpcResponse};
use crate::message::{Payload, Step};
use crate::stage::{execute, Stage};
use crate::stages::{FeatureStage, PerspectiveStage, SignatureStage, VisibilityStage};
use crate::PipelineConfig;

/// Stage logic exposed to remote callers.
pub trait StageService: Send + Sync {
    /// Service name, for logs.
    fn name(&self) -> &'static str;

    /// Answer one request. Never fails at the transport level: every outcome
    /// is a response.
    fn handle(&self, request: RpcRequest) -> RpcResponse;
}

fn refuse(name: &str, session: Session) -> RpcResponse {
    RpcResponse::Failed {
        session,
        failure: Failure::InvalidQuery(format!("{name} service cannot answer this request")),
    }
}

/// Runs the features stage for remote pipelines.
pub struct FeatureService {
    stage: FeatureStage,
}

impl FeatureService {
    /// Create the service around an extractor.
    pub fn new(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            stage: FeatureStage::new(extractor),
        }
    }
}

impl StageService for FeatureService {
    fn name(&self) -> &'static str {
        "features"
    }

    fn handle(&self, request: RpcRequest) -> RpcResponse {
        let request = match request {
            RpcRequest::Extract(request) => request,
            other => return refuse(self.name(), other.session().clone()),
        };
        let mut session = request.session;
        match execute(&self.stage, &mut session, Payload::Query(request.query)) {
            Ok(Step::Next(Payload::Extracted { camera, features })) => {
                RpcResponse::Extracted(ExtractResponse {
                    session,
                    camera,
                    features,
                })
            }
            Ok(_) => RpcResponse::Failed {
                session,
                failure: Failure::stage_fault(self.name(), "unexpected stage output"),
            },
            Err(failure) => RpcResponse::Failed { session, failure },
        }
    }
}

/// Runs retrieval, pose estimation and visibility for remote pipelines.
pub struct SearchService {
    stages: [Box<dyn Stage>; 3],
}

impl SearchService {
    /// Create the service over a loaded catalog.
    pub fn new(catalog: Arc<Catalog>, config: &PipelineConfig) -> Self {
        Self {
            stages: [
                Box::new(SignatureStage::new(
                    Arc::clone(&catalog),
                    Retrieval::new(config.retrieval.clone()),
                )),
                Box::new(PerspectiveStage::new(
                    Arc::clone(&catalog),
                    PoseSolver::new(config.solver.clone()),
                )),
                Box::new(VisibilityStage::new(
                    catalog,
                    Visibility::new(config.visibility.clone()),
                )),
            ],
        }
    }
}

impl StageService for SearchService {
    fn name(&self) -> &'static str {
        "search"
    }

    fn handle(&self, request: RpcRequest) -> RpcResponse {
        let request = match request {
            RpcRequest::Locate(request) => request,
            other => return refuse(self.name(), other.session().clone()),
        };
        let mut session = request.session;
        let mut payload = Payload::Quantized {
            camera: request.camera,
            words: request.words,
        };

        for stage in &self.stages {
            match execute(stage.as_ref(), &mut session, payload) {
                Ok(Step::Next(next)) => payload = next,
                Ok(Step::Done(localization)) => {
                    return RpcResponse::Located(LocateResponse {
                        session,
                        localization,
                    })
                }
                Err(failure) => return RpcResponse::Failed { session, failure },
            }
        }
        RpcResponse::Failed {
            session,
            failure: Failure::stage_fault(self.name(), "stages ended without a result"),
        }
    }
}
