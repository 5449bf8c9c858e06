//! Engine adapter: one owned control connection behind a request queue.
//!
//! A single worker task owns the TCP connection to the engine's control
//! port. Requests arrive over an mpsc queue and are answered one at a time
//! through oneshot replies, so at most one command is ever in flight and at
//! most one connection to the engine exists. On any I/O error the connection
//! is torn down and reconnection is attempted with exponential backoff
//! (100 ms doubling to a 5 s cap).
//!
//! When the engine advertises an HTTP ingestion endpoint, audio submission
//! goes over `PUT` instead of the control plane.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::engine::protocol;
use crate::engine::{
    EngineControl, EngineError, EngineHealth, EngineResult, NowPlaying, TrackRef, TtsEnqueue,
};
use crate::utils::now_millis;

const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Depth of the request queue; callers beyond this fail fast.
const REQUEST_QUEUE_DEPTH: usize = 32;

/// One command awaiting its response lines.
struct ControlRequest {
    line: String,
    timeout: Duration,
    reply: oneshot::Sender<EngineResult<Vec<String>>>,
}

/// The established control connection.
struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    async fn open(host: &str, port: u16, connect_timeout: Duration) -> io::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Writes one command line and reads response lines up to the sentinel.
    async fn roundtrip(&mut self, line: &str) -> io::Result<Vec<String>> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let n = self.reader.read_line(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "engine closed connection",
                ));
            }
            let trimmed = buf.trim_end_matches(['\r', '\n']);
            if trimmed == protocol::RESPONSE_SENTINEL {
                return Ok(lines);
            }
            lines.push(trimmed.to_string());
        }
    }

    /// Politely ends the session.
    async fn close(mut self) {
        let _ = self.writer.write_all(protocol::QUIT_COMMAND.as_bytes()).await;
        let _ = self.writer.write_all(b"\n").await;
    }
}

/// Serializes all engine control traffic behind one worker task.
pub struct EngineAdapter {
    cmd_tx: mpsc::Sender<ControlRequest>,
    queue: String,
    skip_output: String,
    ingest_url: Option<String>,
    http: reqwest::Client,
    command_timeout: Duration,
    enqueue_timeout: Duration,
    connected: Arc<AtomicBool>,
    last_ok_ms: Arc<AtomicU64>,
}

impl EngineAdapter {
    /// Creates the adapter and spawns its connection worker.
    pub fn new(config: &EngineConfig, http: reqwest::Client, cancel: CancellationToken) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let connected = Arc::new(AtomicBool::new(false));
        let last_ok_ms = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_worker(
            config.control_host.clone(),
            config.control_port,
            cmd_rx,
            Arc::clone(&connected),
            Arc::clone(&last_ok_ms),
            cancel,
        ));

        Self {
            cmd_tx,
            queue: config.queue.clone(),
            skip_output: config.skip_output.clone(),
            ingest_url: config.ingest_url.clone(),
            http,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
            connected,
            last_ok_ms,
        }
    }

    /// Sends one command through the worker and awaits its response lines.
    async fn command(&self, line: String, request_timeout: Duration) -> EngineResult<Vec<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlRequest {
                line,
                timeout: request_timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("adapter worker stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable("adapter worker dropped request".into()))?
    }

    async fn metadata_for(&self, id: &str) -> EngineResult<NowPlaying> {
        let lines = self
            .command(format!("request.metadata {}", id), self.command_timeout)
            .await?;
        let kv = protocol::parse_kv_block(&lines);
        Ok(NowPlaying::from_metadata(&kv))
    }

    /// Submits audio bytes over the engine's HTTP ingestion endpoint.
    async fn enqueue_via_http(&self, url: &str, item: &TtsEnqueue) -> EngineResult<()> {
        let bytes = tokio::fs::read(&item.audio_path)
            .await
            .map_err(|e| EngineError::Unavailable(format!("read audio: {}", e)))?;
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .timeout(self.enqueue_timeout)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Unavailable(e.to_string())
                }
            })?;
        if response.status().is_success() {
            self.last_ok_ms.store(now_millis(), Ordering::Relaxed);
            Ok(())
        } else {
            Err(EngineError::Rejected(format!(
                "ingest returned {}",
                response.status()
            )))
        }
    }

    /// Submits audio over the control plane with annotate metadata.
    async fn enqueue_via_control(&self, item: &TtsEnqueue) -> EngineResult<()> {
        let uri = format!("file://{}", item.audio_path.display());
        let tts_id = item.tts_id.map(|id| id.to_string()).unwrap_or_default();
        let mut pairs = vec![
            ("kind", "dj"),
            ("title", item.title.as_str()),
            ("artist", item.artist.as_str()),
        ];
        if !tts_id.is_empty() {
            pairs.push(("tts_id", tts_id.as_str()));
        }
        let annotated = protocol::annotate_uri(&pairs, &uri);
        let lines = self
            .command(
                format!("{}.push {}", self.queue, annotated),
                self.enqueue_timeout,
            )
            .await?;
        if let Some(error) = lines.iter().find(|l| protocol::is_error_line(l)) {
            return Err(EngineError::Rejected(error.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineControl for EngineAdapter {
    async fn now(&self) -> EngineResult<Option<NowPlaying>> {
        let lines = self
            .command("request.all".to_string(), self.command_timeout)
            .await?;
        let ids = protocol::parse_id_list(&lines);
        let Some(on_air) = ids.first() else {
            return Ok(None);
        };
        Ok(Some(self.metadata_for(on_air).await?))
    }

    async fn upcoming(&self, n: usize) -> EngineResult<Vec<TrackRef>> {
        let lines = self
            .command("request.all".to_string(), self.command_timeout)
            .await?;
        let ids = protocol::parse_id_list(&lines);

        let mut out = Vec::new();
        // The head of the list is on air; everything after it is queued.
        for id in ids.iter().skip(1).take(n) {
            match self.metadata_for(id).await {
                Ok(meta) => out.push(TrackRef::from(meta)),
                // A request can finish between the listing and the metadata
                // fetch; skip it rather than failing the whole snapshot.
                Err(EngineError::Unavailable(_)) | Err(EngineError::Timeout) => break,
                Err(e) => {
                    log::debug!("[Engine] Skipping request {}: {}", id, e);
                }
            }
        }
        Ok(out)
    }

    async fn enqueue_tts(&self, item: &TtsEnqueue) -> EngineResult<()> {
        match &self.ingest_url {
            Some(url) => self.enqueue_via_http(url, item).await,
            None => self.enqueue_via_control(item).await,
        }
    }

    async fn skip(&self) -> EngineResult<()> {
        let lines = self
            .command(
                format!("output.{}.skip", self.skip_output),
                self.command_timeout,
            )
            .await?;
        if let Some(error) = lines.iter().find(|l| protocol::is_error_line(l)) {
            return Err(EngineError::Rejected(error.clone()));
        }
        Ok(())
    }

    fn health(&self) -> EngineHealth {
        let last = self.last_ok_ms.load(Ordering::Relaxed);
        EngineHealth {
            connected: self.connected.load(Ordering::Relaxed),
            last_ok_ms: (last > 0).then_some(last),
        }
    }
}

/// The connection worker: owns the socket, answers queued requests one at a
/// time, reconnects with exponential backoff.
async fn run_worker(
    host: String,
    port: u16,
    mut cmd_rx: mpsc::Receiver<ControlRequest>,
    connected: Arc<AtomicBool>,
    last_ok_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut conn: Option<ControlConnection> = None;
    let mut backoff = BACKOFF_MIN;
    let mut next_attempt = Instant::now();

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = cmd_rx.recv() => match request {
                Some(r) => r,
                None => break,
            },
        };

        if conn.is_none() && Instant::now() >= next_attempt {
            match ControlConnection::open(&host, port, request.timeout).await {
                Ok(c) => {
                    log::info!("[Engine] Control connection established to {}:{}", host, port);
                    conn = Some(c);
                    connected.store(true, Ordering::Relaxed);
                    backoff = BACKOFF_MIN;
                }
                Err(e) => {
                    log::warn!(
                        "[Engine] Connect to {}:{} failed: {} (next attempt in {:?})",
                        host,
                        port,
                        e,
                        backoff
                    );
                    next_attempt = Instant::now() + backoff;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }

        let Some(active) = conn.as_mut() else {
            let _ = request
                .reply
                .send(Err(EngineError::Unavailable("engine reconnecting".into())));
            continue;
        };

        match timeout(request.timeout, active.roundtrip(&request.line)).await {
            Ok(Ok(lines)) => {
                last_ok_ms.store(now_millis(), Ordering::Relaxed);
                let _ = request.reply.send(Ok(lines));
            }
            Ok(Err(e)) => {
                log::warn!("[Engine] Command failed, dropping connection: {}", e);
                conn = None;
                connected.store(false, Ordering::Relaxed);
                next_attempt = Instant::now() + backoff;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                let _ = request.reply.send(Err(EngineError::Unavailable(e.to_string())));
            }
            Err(_) => {
                log::warn!("[Engine] Command timed out, dropping connection");
                conn = None;
                connected.store(false, Ordering::Relaxed);
                next_attempt = Instant::now() + backoff;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                let _ = request.reply.send(Err(EngineError::Timeout));
            }
        }
    }

    if let Some(c) = conn.take() {
        c.close().await;
    }
    connected.store(false, Ordering::Relaxed);
    log::debug!("[Engine] Worker stopped");
}
