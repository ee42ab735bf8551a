use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use vpr_core::{Failure, SessionId};

use crate::message::Response;

/// Key of a pending request.
pub type RequestId = u64;

/// Pending-table parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingParams {
    /// Maximum number of requests awaiting completion at once.
    pub max_pending: usize,
    /// How long an asynchronous caller waits, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PendingParams {
    fn default() -> Self {
        Self {
            max_pending: 10,
            timeout_ms: 10_000,
        }
    }
}

/// A request awaiting its response.
#[derive(Debug)]
pub struct ConnectionInfo {
    /// Owning session.
    pub session: SessionId,
    /// Completion half; the [`Waiter`] holds the other one.
    done: oneshot::Sender<Response>,
}

/// Requests that arrived on an asynchronous channel and have not been answered.
///
/// The only mutable structure shared between the ingress and the pipeline.
/// Every access holds the lock briefly and never across a send or an await.
#[derive(Debug)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, ConnectionInfo>>,
    max_pending: usize,
}

impl PendingTable {
    /// Create a table admitting at most `max_pending` entries.
    pub fn new(max_pending: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            max_pending,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, ConnectionInfo>> {
        // entries are plain data, a panic elsewhere cannot leave them half-written
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an entry under a fresh random id.
    pub fn register(self: &Arc<Self>, session: SessionId) -> Result<(RequestId, Waiter), Failure> {
        let (done, rx) = oneshot::channel();
        let mut rng = rand::rng();

        let mut entries = self.lock();
        if entries.len() >= self.max_pending {
            return Err(Failure::Overloaded);
        }
        let id = loop {
            let candidate: RequestId = rng.random();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.insert(id, ConnectionInfo { session, done });
        drop(entries);

        log::debug!("registered request {id:#x} for session {session}");
        Ok((
            id,
            Waiter {
                id,
                rx,
                table: Arc::clone(self),
            },
        ))
    }

    /// Complete an entry. Returns `false` when it no longer exists, which
    /// happens when its waiter already timed out.
    pub fn complete(&self, id: RequestId, response: Response) -> bool {
        let Some(info) = self.lock().remove(&id) else {
            return false;
        };
        if info.done.send(response).is_err() {
            log::debug!("waiter of session {} dropped", info.session);
        }
        true
    }

    /// Drop an entry without answering it.
    pub fn remove(&self, id: RequestId) -> Option<ConnectionInfo> {
        self.lock().remove(&id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// The caller's half of a pending request.
#[derive(Debug)]
pub struct Waiter {
    id: RequestId,
    rx: oneshot::Receiver<Response>,
    table: Arc<PendingTable>,
}

impl Waiter {
    /// Key of the entry this waiter belongs to.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait up to `timeout` for the response.
    ///
    /// On timeout the entry is removed so that a later completion finds
    /// nothing. If a completion already claimed the entry its response is
    /// returned instead.
    pub async fn wait(self, timeout: Duration) -> Result<Response, Failure> {
        let started = Instant::now();
        let Waiter { id, mut rx, table } = self;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Failure::stage_fault(
                "pending",
                "request completed without a response",
            )),
            Err(_) => {
                if table.remove(id).is_some() {
                    return Err(Failure::PendingRequestTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                // a completion claimed the entry and is about to send
                rx.await.map_err(|_| {
                    Failure::stage_fault("pending", "request completed without a response")
                })
            }
        }
    }
}
