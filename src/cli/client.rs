//! IPC Client for communicating with the Pomodoro Timer daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Request/response handling
//! - Connection retry logic
//! - Timeout handling
//! - Event subscriptions for viewers

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::types::{IpcRequest, IpcResponse, Preset, ServiceEvent};
use crate::viewer::{EventStream, ServiceLink};

// ============================================================================
// Constants
// ============================================================================

/// Connection timeout in seconds
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Read/write timeout in seconds
const IO_TIMEOUT_SECS: u64 = 5;

/// Maximum response size in bytes (64KB)
const MAX_RESPONSE_SIZE: u64 = 65536;

/// Maximum retry attempts
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds (base delay, multiplied by attempt number)
const RETRY_DELAY_MS: u64 = 500;

// ============================================================================
// IpcClient
// ============================================================================

/// IPC client for daemon communication.
#[derive(Debug, Clone)]
pub struct IpcClient {
    /// Socket path
    socket_path: PathBuf,
    /// Connection timeout
    timeout: Duration,
}

impl IpcClient {
    /// Creates a new IPC client for the daemon listening on `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a start command to the daemon.
    pub async fn start(&self) -> Result<IpcResponse> {
        self.command(IpcRequest::StartTimer).await
    }

    /// Sends a pause command to the daemon.
    pub async fn pause(&self) -> Result<IpcResponse> {
        self.command(IpcRequest::PauseTimer).await
    }

    /// Sends a reset command to the daemon.
    pub async fn reset(&self) -> Result<IpcResponse> {
        self.command(IpcRequest::ResetTimer).await
    }

    /// Moves the daemon to a cycle position.
    pub async fn jump(&self, position: u8) -> Result<IpcResponse> {
        self.command(IpcRequest::JumpToPosition { position }).await
    }

    /// Asks the daemon for its current state.
    pub async fn get_state(&self) -> Result<IpcResponse> {
        self.command(IpcRequest::GetState).await
    }

    /// Applies a preset: reset, set the duration, then start.
    ///
    /// Stops at the first failing step and returns the last response.
    pub async fn apply_preset(&self, preset: Preset) -> Result<IpcResponse> {
        self.reset().await?;
        self.command(IpcRequest::SetTime {
            time_left: preset.seconds(),
        })
        .await?;
        self.start().await
    }

    /// Sends a request with retry and turns error responses into errors.
    async fn command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let response = self.send_request_with_retry(&request).await?;
        Self::check(response)
    }

    /// Sends a request once and turns error responses into errors.
    pub async fn send_once(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let response = self.send_request(request).await?;
        Self::check(response)
    }

    fn check(response: IpcResponse) -> Result<IpcResponse> {
        if response.is_error() {
            anyhow::bail!("{}", response.message);
        }
        Ok(response)
    }

    /// Sends a request to the daemon with retry logic.
    ///
    /// Only transport failures are retried; an error response is returned
    /// as-is on the first attempt.
    async fn send_request_with_retry(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut attempt = 1;
        loop {
            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!("リクエスト失敗 (試行 {}/{}): {}", attempt, MAX_RETRIES, e);
                    let delay = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("リクエスト失敗 (試行 {}/{}): {}", attempt, MAX_RETRIES, e);
                    return Err(e);
                }
            }
        }
    }

    /// Opens a connection with the connect timeout applied.
    async fn connect(&self) -> Result<UnixStream> {
        timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("Daemonに接続できません。'pomodoro daemon' を起動してください")
    }

    /// Writes one request line.
    async fn write_request<W>(writer: &mut W, request: &IpcRequest) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut request_json =
            serde_json::to_string(request).context("リクエストのシリアライズに失敗しました")?;
        request_json.push('\n');

        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            writer.write_all(request_json.as_bytes()),
        )
        .await
        .context("書き込みがタイムアウトしました")?
        .context("リクエストの送信に失敗しました")?;

        timeout(Duration::from_secs(IO_TIMEOUT_SECS), writer.flush())
            .await
            .context("フラッシュがタイムアウトしました")?
            .context("フラッシュに失敗しました")?;
        Ok(())
    }

    /// Sends a single request and reads the response line.
    async fn send_request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = self.connect().await?;
        Self::write_request(&mut stream, request).await?;

        // Shutdown write side to signal end of request
        stream
            .shutdown()
            .await
            .context("シャットダウンに失敗しました")?;

        let mut reader = BufReader::new(stream).take(MAX_RESPONSE_SIZE);
        let mut line = String::new();
        let n = timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            reader.read_line(&mut line),
        )
        .await
        .context("読み込みがタイムアウトしました")?
        .context("レスポンスの受信に失敗しました")?;

        if n == 0 {
            anyhow::bail!("Daemonからの応答がありませんでした");
        }

        serde_json::from_str(line.trim_end()).context("レスポンスのパースに失敗しました")
    }
}

// ============================================================================
// ServiceLink
// ============================================================================

impl ServiceLink for IpcClient {
    async fn send(&self, request: IpcRequest) -> Result<()> {
        self.send_once(&request).await.map(|_| ())
    }

    /// Keeps the connection open and forwards every pushed event.
    ///
    /// Lines that are not events are skipped. The connection is closed once
    /// the returned stream is dropped.
    async fn subscribe(&self) -> Result<EventStream> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();
        Self::write_request(&mut write_half, &IpcRequest::Subscribe).await?;

        let (tx, events) = EventStream::channel();
        tokio::spawn(async move {
            // Held until the task ends; dropping it tells the daemon to stop.
            let _write_half = write_half;
            let mut lines = BufReader::new(read_half).lines();

            loop {
                let line = tokio::select! {
                    () = tx.closed() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => match serde_json::from_str::<ServiceEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("不明なメッセージを無視しました: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("購読の読み込みに失敗しました: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("購読を終了しました");
        });

        Ok(events)
    }
}

// ============================================================================
// Tests
// ============================================================================
