use tokio::runtime::Runtime;
use vpr_core::{Failure, Session, Window};

use super::{ExtractRequest, LocateRequest, RemoteError, RpcClient, RpcRequest, RpcResponse};
use crate::message::{Payload, Step};
use crate::stage::Stage;
use crate::PipelineError;

fn runtime() -> Result<Runtime, PipelineError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PipelineError::Runtime)
}

fn remote_failure(e: RemoteError) -> Failure {
    Failure::RemoteCallFailure(e.to_string())
}

/// Take the windows a hop stamped from the session it returned. Identity and
/// every other window stay as recorded locally.
fn adopt(local: &mut Session, remote: &Session, windows: &[Window]) -> Result<(), Failure> {
    if remote.id != local.id || remote.channel != local.channel {
        return Err(remote_failure(RemoteError::SessionMismatch {
            expected: local.id,
            found: remote.id,
        }));
    }
    local.copy_windows(remote, windows);
    Ok(())
}

const FEATURE_WINDOWS: &[Window] = &[Window::Features];
const SEARCH_WINDOWS: &[Window] = &[Window::Signatures, Window::Perspective];

/// Features stage served by a remote [`super::FeatureService`].
pub struct RemoteFeatureStage {
    client: RpcClient,
    runtime: Runtime,
}

impl RemoteFeatureStage {
    /// Create the stage. Nothing is connected until the first session.
    pub fn new(client: RpcClient) -> Result<Self, PipelineError> {
        Ok(Self {
            client,
            runtime: runtime()?,
        })
    }
}

impl Stage for RemoteFeatureStage {
    fn name(&self) -> &'static str {
        "features"
    }

    fn window(&self) -> Option<Window> {
        None
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let query = match payload {
            Payload::Query(query) => query,
            other => {
                return Err(Failure::stage_fault(
                    self.name(),
                    format!("unexpected {} payload", other.name()),
                ))
            }
        };
        let request = RpcRequest::Extract(ExtractRequest {
            session: session.clone(),
            query,
        });

        match self
            .runtime
            .block_on(self.client.call(&request))
            .map_err(remote_failure)?
        {
            RpcResponse::Extracted(response) => {
                adopt(session, &response.session, FEATURE_WINDOWS)?;
                Ok(Step::Next(Payload::Extracted {
                    camera: response.camera,
                    features: response.features,
                }))
            }
            RpcResponse::Failed {
                session: remote,
                failure,
            } => {
                adopt(session, &remote, FEATURE_WINDOWS)?;
                Err(failure)
            }
            RpcResponse::Located(_) => Err(remote_failure(RemoteError::UnexpectedResponse(
                "located",
            ))),
        }
    }
}

/// Retrieval, pose estimation and visibility served by a remote
/// [`super::SearchService`].
pub struct RemoteSearchStage {
    client: RpcClient,
    runtime: Runtime,
}

impl RemoteSearchStage {
    /// Create the stage. Nothing is connected until the first session.
    pub fn new(client: RpcClient) -> Result<Self, PipelineError> {
        Ok(Self {
            client,
            runtime: runtime()?,
        })
    }
}

impl Stage for RemoteSearchStage {
    fn name(&self) -> &'static str {
        "search"
    }

    fn window(&self) -> Option<Window> {
        None
    }

    fn process(&self, session: &mut Session, payload: Payload) -> Result<Step, Failure> {
        let (camera, words) = match payload {
            Payload::Quantized { camera, words } => (camera, words),
            other => {
                return Err(Failure::stage_fault(
                    self.name(),
                    format!("unexpected {} payload", other.name()),
                ))
            }
        };
        let request = RpcRequest::Locate(LocateRequest {
            session: session.clone(),
            camera,
            words,
        });

        match self
            .runtime
            .block_on(self.client.call(&request))
            .map_err(remote_failure)?
        {
            RpcResponse::Located(response) => {
                adopt(session, &response.session, SEARCH_WINDOWS)?;
                Ok(Step::Done(response.localization))
            }
            RpcResponse::Failed {
                session: remote,
                failure,
            } => {
                adopt(session, &remote, SEARCH_WINDOWS)?;
                Err(failure)
            }
            RpcResponse::Extracted(_) => Err(remote_failure(RemoteError::UnexpectedResponse(
                "extracted",
            ))),
        }
    }
}
