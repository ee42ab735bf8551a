use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use tokio::sync::oneshot;
use vpr_core::{CameraModel, Channel, Failure, Session, SessionId, Window};
use vpr_db::Catalog;
use vpr_features::{FastPatchExtractor, FeatureExtractor};
use vpr_index::WordIndex;
use vpr_search::{PoseSolver, Retrieval, Visibility};

use crate::message::{Message, Payload, Query, Reply, Response};
use crate::pending::{PendingTable, Waiter};
use crate::remote::{RemoteFeatureStage, RemoteSearchStage, RpcClient};
use crate::stage::{spawn_worker, Stage};
use crate::stages::{FeatureStage, PerspectiveStage, SignatureStage, VisibilityStage, WordStage};
use crate::{PipelineConfig, PipelineError};

/// Assembles the stage chain.
///
/// Each stage gets its own thread and inbound queue; the handle of the next
/// stage is wired in here, so stages never look each other up.
pub struct PipelineBuilder {
    catalog: Arc<Catalog>,
    config: PipelineConfig,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    remote_features: Option<String>,
    remote_search: Option<String>,
}

impl PipelineBuilder {
    /// Start from a loaded catalog.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            config: PipelineConfig::default(),
            extractor: None,
            remote_features: None,
            remote_search: None,
        }
    }

    /// Use these parameters.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this extractor instead of the bundled one.
    pub fn extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Run feature extraction on the stage server at `addr`.
    pub fn remote_features(mut self, addr: impl Into<String>) -> Self {
        self.remote_features = Some(addr.into());
        self
    }

    /// Run retrieval, pose estimation and visibility on the stage server at `addr`.
    pub fn remote_search(mut self, addr: impl Into<String>) -> Self {
        self.remote_search = Some(addr.into());
        self
    }

    /// Spawn the stage workers.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config;
        let catalog = self.catalog;
        let timeout = Duration::from_millis(config.remote_timeout_ms);

        let index = Arc::new(WordIndex::build(
            catalog.words.clone(),
            config.index.clone(),
        )?);
        log::info!(
            "vocabulary of {} words ({} dims), {} signatures, {} labels",
            index.len(),
            index.dim(),
            catalog.signatures.len(),
            catalog.labels.len()
        );

        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(5);
        match self.remote_features {
            Some(addr) => {
                log::info!("features stage served by {addr}");
                stages.push(Box::new(RemoteFeatureStage::new(RpcClient::new(addr, timeout))?));
            }
            None => {
                let extractor = self.extractor.unwrap_or_else(|| {
                    Arc::new(FastPatchExtractor::new(config.extractor.clone()))
                });
                stages.push(Box::new(FeatureStage::new(extractor)));
            }
        }
        stages.push(Box::new(WordStage::new(index)));
        match self.remote_search {
            Some(addr) => {
                log::info!("search stages served by {addr}");
                stages.push(Box::new(RemoteSearchStage::new(RpcClient::new(addr, timeout))?));
            }
            None => {
                stages.push(Box::new(SignatureStage::new(
                    Arc::clone(&catalog),
                    Retrieval::new(config.retrieval.clone()),
                )));
                stages.push(Box::new(PerspectiveStage::new(
                    Arc::clone(&catalog),
                    PoseSolver::new(config.solver.clone()),
                )));
                stages.push(Box::new(VisibilityStage::new(
                    Arc::clone(&catalog),
                    Visibility::new(config.visibility.clone()),
                )));
            }
        }

        // only the entry queue is bounded: a worker must never block on the
        // stage after it
        let (senders, receivers): (Vec<Sender<Message>>, Vec<Receiver<Message>>) = stages
            .iter()
            .enumerate()
            .map(|(i, _)| match config.queue_capacity {
                Some(cap) if i == 0 => bounded(cap),
                _ => unbounded(),
            })
            .unzip();

        // worker i owns the only sender of queue i + 1
        let mut senders = senders.into_iter();
        let entry = senders.next();
        let mut workers = Vec::with_capacity(stages.len());
        for (stage, inbound) in stages.into_iter().zip(receivers) {
            workers.push(spawn_worker(stage, inbound, senders.next())?);
        }

        Ok(Pipeline {
            entry: Mutex::new(entry),
            workers: Mutex::new(workers),
            pending: PendingTable::new(config.pending.max_pending),
            pending_timeout: Duration::from_millis(config.pending.timeout_ms),
            next_session: AtomicU64::new(1),
        })
    }
}

/// A running query pipeline. Shareable across threads and tasks.
pub struct Pipeline {
    entry: Mutex<Option<Sender<Message>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<PendingTable>,
    pending_timeout: Duration,
    next_session: AtomicU64,
}

impl Pipeline {
    /// Start building a pipeline over `catalog`.
    pub fn builder(catalog: Arc<Catalog>) -> PipelineBuilder {
        PipelineBuilder::new(catalog)
    }

    /// A fresh session with its overall window started.
    pub(crate) fn open_session(&self, channel: Channel) -> Session {
        let id: SessionId = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id, channel);
        session.stamp_start(Window::Overall);
        session
    }

    /// Hand a message to the first stage without blocking. A full entry
    /// queue answers the session with [`Failure::Overloaded`].
    fn submit(&self, message: Message) {
        let entry = self
            .entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let rejected = match entry {
            Some(tx) => match tx.try_send(message) {
                Ok(()) => None,
                Err(TrySendError::Full(message)) => Some((message, Failure::Overloaded)),
                Err(TrySendError::Disconnected(message)) => Some((
                    message,
                    Failure::stage_fault("pipeline", "pipeline is shut down"),
                )),
            },
            None => Some((
                message,
                Failure::stage_fault("pipeline", "pipeline is shut down"),
            )),
        };
        if let Some((message, failure)) = rejected {
            log::debug!("session {} not admitted: {failure}", message.session.id);
            message.reply.deliver(Response::failed(message.session, failure));
        }
    }

    /// Run a query on the synchronous request channel.
    pub async fn locate(&self, image: Vec<u8>, camera: CameraModel) -> Response {
        let session = self.open_session(Channel::SynchronousRequest);
        let fallback = session.clone();
        let (tx, rx) = oneshot::channel();
        self.submit(Message {
            session,
            payload: Payload::Query(Query { image, camera }),
            reply: Reply::Direct(tx),
        });

        rx.await.unwrap_or_else(|_| {
            Response::failed(
                fallback,
                Failure::stage_fault("pipeline", "session dropped without a response"),
            )
        })
    }

    /// Submit a query whose response is collected through the pending table.
    ///
    /// Fails with [`Failure::Overloaded`] when too many requests are pending.
    pub fn submit_pending(
        &self,
        image: Vec<u8>,
        camera: CameraModel,
    ) -> Result<(Session, Waiter), Failure> {
        let session = self.open_session(Channel::PublishSubscribe);
        let (id, waiter) = self.pending.register(session.id)?;
        self.submit(Message {
            session: session.clone(),
            payload: Payload::Query(Query { image, camera }),
            reply: Reply::Pending {
                table: Arc::clone(&self.pending),
                id,
            },
        });
        Ok((session, waiter))
    }

    /// Submit on the publish/subscribe channel and wait up to the configured
    /// timeout. Always yields exactly one response.
    pub async fn locate_pending(&self, image: Vec<u8>, camera: CameraModel) -> Response {
        let (session, waiter) = match self.submit_pending(image, camera) {
            Ok(submitted) => submitted,
            Err(failure) => {
                let mut session = self.open_session(Channel::PublishSubscribe);
                session.stamp_end(Window::Overall);
                return Response::failed(session, failure);
            }
        };
        match waiter.wait(self.pending_timeout).await {
            Ok(response) => response,
            Err(failure) => {
                let mut session = session;
                session.stamp_end(Window::Overall);
                log::warn!("session {} failed: {failure}", session.id);
                Response::failed(session, failure)
            }
        }
    }

    /// The table behind the publish/subscribe channel.
    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// How long publish/subscribe callers wait.
    pub fn pending_timeout(&self) -> Duration {
        self.pending_timeout
    }

    /// Stop accepting queries, let in-flight sessions finish and join the workers.
    ///
    /// Blocks the calling thread. Later queries fail with a stage fault.
    pub fn shutdown(&self) {
        drop(self.entry.lock().unwrap_or_else(|e| e.into_inner()).take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            let name = worker.thread().name().unwrap_or("stage").to_string();
            if worker.join().is_err() {
                log::error!("worker {name} panicked");
            }
        }
        log::info!("pipeline stopped");
    }
}
