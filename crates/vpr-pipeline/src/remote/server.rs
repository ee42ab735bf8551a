use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::codec::{read_frame, write_frame};
use super::{RemoteError, RpcRequest, RpcResponse, StageService};

/// Serves a [`StageService`] over TCP.
pub struct RpcServer {
    listener: TcpListener,
    service: Arc<dyn StageService>,
}

impl RpcServer {
    /// Wrap a bound listener.
    pub fn new(listener: TcpListener, service: Arc<dyn StageService>) -> Self {
        Self { listener, service }
    }

    /// Address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, RemoteError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    ///
    /// Each connection may carry any number of requests, answered in order.
    /// Stage logic runs on the blocking pool.
    pub async fn serve(self) -> Result<(), RemoteError> {
        log::info!(
            "{} service listening on {}",
            self.service.name(),
            self.listener.local_addr()?
        );
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                if let Err(e) = connection(stream, service).await {
                    log::warn!("connection from {peer} dropped: {e}");
                }
            });
        }
    }
}

async fn connection(mut stream: TcpStream, service: Arc<dyn StageService>) -> Result<(), RemoteError> {
    stream.set_nodelay(true)?;
    while let Some(request) = read_frame::<_, RpcRequest>(&mut stream).await? {
        let session = request.session().clone();
        let svc = Arc::clone(&service);
        let response = match tokio::task::spawn_blocking(move || svc.handle(request)).await {
            Ok(response) => response,
            Err(e) => RpcResponse::Failed {
                session,
                failure: vpr_core::Failure::stage_fault(service.name(), e.to_string()),
            },
        };
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}
