//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports HTTP/1.1 persistent connections (keep-alive) and graceful shutdown:
//! once the shutdown token fires, the listener stops accepting, idle
//! connections are closed, and busy ones finish their current request.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Default ceiling on a buffered request, headers and body together (1 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_request_bytes: usize,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        })
    }

    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` is cancelled, then waits for open connections to wind down.
    pub async fn run<H, F>(self, handler: H, shutdown: CancellationToken) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let connections = TaskTracker::new();
        info!(address = %self.local_addr, "frontdoor listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.clone();
            let limit = self.max_request_bytes;

            connections.spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, limit, shutdown).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        connections.close();
        info!(open = connections.len(), "listener stopped, waiting for connections");
        connections.wait().await;
        Ok(())
    }
}

async fn reject(stream: &mut TcpStream, status: StatusCode, body: String) -> std::io::Result<()> {
    let response = Response::new(status).body(body).keep_alive(false);
    stream.write_all(&response.into_bytes()).await
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, or the server shuts down.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    max_request_bytes: usize,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Only an idle connection is closed on shutdown.
        let bytes_read = tokio::select! {
            _ = shutdown.cancelled(), if buf.is_empty() => break,
            read = stream.read_buf(&mut buf) => read?,
        };

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > max_request_bytes {
            warn!(peer = %peer_addr, limit = max_request_bytes, "request too large, sending 413");
            reject(&mut stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large".into()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                reject(&mut stream, StatusCode::BAD_REQUEST, format!("Bad Request: {e}")).await?;
                break;
            }
        };

        if request.is_chunked() {
            warn!(peer = %peer_addr, "chunked request body, sending 411");
            reject(&mut stream, StatusCode::LENGTH_REQUIRED, "Length Required".into()).await?;
            break;
        }

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if total_needed > max_request_bytes {
            warn!(peer = %peer_addr, content_length, "declared body too large, sending 413");
            reject(&mut stream, StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large".into()).await?;
            break;
        }
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive() && !shutdown.is_cancelled();

        let response = handler(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive || shutdown.is_cancelled() {
            debug!(peer = %peer_addr, "closing connection");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let server = Server::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
            .with_max_request_bytes(2048);
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            server
                .run(
                    |req: Request| async move {
                        Response::new(StatusCode::OK).body(format!("{} {}", req.method(), req.target()))
                    },
                    token,
                )
                .await
                .unwrap();
        });
        (addr, shutdown, task)
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn serves_request_and_honours_connection_close() {
        let (addr, shutdown, task) = start().await;
        let reply = exchange(
            addr,
            b"GET /blog?page=2 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("GET /blog?page=2"));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn chunked_body_is_rejected_with_411() {
        let (addr, shutdown, task) = start().await;
        let reply = exchange(
            addr,
            b"POST /wp-comments-post.php HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 411 "));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_declared_body_is_rejected_with_413() {
        let (addr, shutdown, task) = start().await;
        let reply = exchange(
            addr,
            b"POST /xmlrpc.php HTTP/1.1\r\nHost: x\r\nContent-Length: 999999\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 413 "));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_is_rejected_with_400() {
        let (addr, shutdown, task) = start().await;
        let reply = exchange(addr, b"NOT A REQUEST\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 400 "));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn authority_form_target_is_rejected_with_400() {
        let (addr, shutdown, task) = start().await;
        let reply = exchange(addr, b"GET @evil.example/steal HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 400 "));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let (addr, shutdown, task) = start().await;
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::task::yield_now().await;
        shutdown.cancel();
        task.await.unwrap();
    }
}
