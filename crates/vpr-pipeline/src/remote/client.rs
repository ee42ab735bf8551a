use std::time::Duration;

use tokio::net::TcpStream;

use super::codec::{read_frame, write_frame};
use super::{RemoteError, RpcRequest, RpcResponse};

/// Calls a stage server, one connection per call.
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
    timeout: Duration,
}

impl RpcClient {
    /// Create a client for `addr` (`host:port`) with a per-call timeout
    /// covering connect, send and receive.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, RemoteError> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            write_frame(&mut stream, request).await?;
            read_frame(&mut stream).await?.ok_or(RemoteError::Closed)
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
