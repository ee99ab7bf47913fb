//! IPC Server for the Pomodoro Timer.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Newline-delimited JSON requests and responses
//! - Push streams of [`ServiceEvent`]s for subscribed viewers
//!
//! Each connection carries exactly one request. A `SUBSCRIBE` request keeps
//! the connection open and turns it into an event stream.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{timeout, Duration};

use crate::types::{IpcRequest, IpcResponse, ServiceEvent};

use super::service::ServiceHandle;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request size in bytes (4KB)
const MAX_REQUEST_SIZE: usize = 4096;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// The peer closed the connection before sending a request
    #[error("Connection closed by client")]
    ConnectionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(stream)
    }

    /// Reads one newline-terminated request.
    ///
    /// A request without a trailing newline is accepted if the client closed
    /// its write side after sending it.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, oversized input, EOF or invalid JSON.
    pub async fn receive_request<R>(reader: &mut R) -> Result<IpcRequest>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        let limit = (MAX_REQUEST_SIZE + 1) as u64;

        let read_result = timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            (&mut *reader).take(limit).read_line(&mut line),
        )
        .await;

        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Err(_) => return Err(IpcError::Timeout.into()),
        };

        if n == 0 {
            return Err(IpcError::ConnectionClosed.into());
        }
        if n > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge.into());
        }

        let request: IpcRequest = serde_json::from_str(line.trim_end())
            .with_context(|| "Failed to deserialize IPC request")?;

        Ok(request)
    }

    /// Serializes and sends an IPC response line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        Self::write_line(writer, response).await
    }

    /// Serializes and sends one pushed event line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_event<W>(writer: &mut W, event: &ServiceEvent) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        Self::write_line(writer, event).await
    }

    async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let mut json =
            serde_json::to_vec(value).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push(b'\n');

        writer
            .write_all(&json)
            .await
            .context("Failed to write response")?;
        writer.flush().await.context("Failed to flush response")?;

        Ok(())
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts connections until `shutdown` resolves, serving each on its own task.
    pub async fn serve(self, handler: Arc<RequestHandler>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.accept() => match accepted {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_connection(stream).await {
                                tracing::debug!("接続の処理を終了しました: {:#}", e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("接続を受け付けられませんでした: {:#}", e),
                },
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Serves one connection: either a single command or an event subscription.
pub struct RequestHandler {
    /// Command channel into the service loop
    service: ServiceHandle,
    /// Broadcast hub that subscriptions attach to
    events: broadcast::Sender<ServiceEvent>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(service: ServiceHandle, events: broadcast::Sender<ServiceEvent>) -> Self {
        Self { service, events }
    }

    /// Handles a command and returns the service's response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match self.service.request(request).await {
            Ok(response) => response,
            Err(e) => IpcResponse::error(e.to_string()),
        }
    }

    /// Reads the connection's request and answers it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read or the reply cannot be
    /// written.
    pub async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request = match IpcServer::receive_request(&mut reader).await {
            Ok(request) => request,
            Err(e) => {
                let response = IpcResponse::error(format!("不正なリクエストです: {e}"));
                let _ = IpcServer::send_response(&mut write_half, &response).await;
                return Err(e);
            }
        };

        if request == IpcRequest::Subscribe {
            let receiver = self.events.subscribe();
            return Self::stream_events(receiver, reader, write_half).await;
        }

        let response = self.handle(request).await;
        IpcServer::send_response(&mut write_half, &response).await
    }

    /// Pushes events until the client hangs up or the hub closes.
    async fn stream_events<R, W>(
        mut receiver: broadcast::Receiver<ServiceEvent>,
        mut reader: R,
        mut writer: W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::debug!("ビューアが購読を開始しました");
        let mut discard = [0u8; 256];

        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Ok(event) => IpcServer::send_event(&mut writer, &event).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("購読者がイベントを{}件取りこぼしました", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                read = reader.read(&mut discard) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                },
            }
        }

        tracing::debug!("ビューアの購読が終了しました");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
