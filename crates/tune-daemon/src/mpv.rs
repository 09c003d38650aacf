/// mpv-backed sound handles.
///
/// Every `MpvSound` owns its own mpv child process and IPC connection, so
/// releasing one track can never disturb the next:
///
/// ```text
///   MpvBackend::load(url)
///         │
///         ├── spawn mpv --idle --pause --input-ipc-server=<per-handle socket>
///         ├── writer_task   ← receives IpcRequest via mpsc, serialises → socket
///         ├── reader_task   ← reads JSON lines from socket
///         │                      ├── reply (has request_id) → matched oneshot::Sender
///         │                      └── event                  → event channel
///         └── loadfile, wait for file-loaded / end-file
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use tune_proto::protocol::TransportStatus;

use crate::backend::{AudioMode, Sound, SoundBackend};
use crate::error::SessionError;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct IpcRequest {
    req_id: u64,
    line: String, // serialised JSON, newline-terminated
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited mpv event (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// e.g. "file-loaded", "end-file", "start-file".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` of an end-file event.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

// ── IPC client ────────────────────────────────────────────────────────────────

/// Cloneable handle to one mpv connection's writer task.
#[derive(Clone)]
pub struct MpvIpc {
    tx: mpsc::Sender<IpcRequest>,
}

impl MpvIpc {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IpcRequest {
                req_id,
                line,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// `None` when mpv reports the property as unavailable.
    pub async fn get_f64(&self, property: &str) -> anyhow::Result<Option<f64>> {
        match self.send(json!(["get_property", property])).await {
            Ok(resp) => Ok(resp["data"].as_f64()),
            Err(e) if e.to_string().contains("property unavailable") => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_bool(&self, property: &str) -> anyhow::Result<Option<bool>> {
        match self.send(json!(["get_property", property])).await {
            Ok(resp) => Ok(resp["data"].as_bool()),
            Err(e) if e.to_string().contains("property unavailable") => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn start<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<IpcRequest>(64);
        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));
        Self { tx: cmd_tx }
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingReplies,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let close_reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "mpv IPC connection closed".to_string(),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                match val.get("request_id").and_then(|v| v.as_u64()) {
                    Some(req_id) => {
                        let Some(tx) = pending.lock().await.remove(&req_id) else {
                            debug!("mpv reader: reply for unknown req={}", req_id);
                            continue;
                        };
                        let result = match val["error"].as_str() {
                            Some("success") => Ok(val),
                            other => Err(anyhow::anyhow!(
                                "mpv error: {}",
                                other.unwrap_or("unknown error")
                            )),
                        };
                        let _ = tx.send(result);
                    }
                    None => {
                        // Receiver gone means nobody cares about events any more.
                        let _ = event_tx.send(MpvEvent { raw: val }).await;
                    }
                }
            }
            Err(e) => break format!("mpv IPC read error: {}", e),
        }
    };

    debug!("mpv reader: {}", close_reason);
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", close_reason)));
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<IpcRequest>, pending: PendingReplies)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── backend ───────────────────────────────────────────────────────────────────

pub struct MpvBackend {
    volume: f32,
    load_timeout: Duration,
    next_handle_id: AtomicU64,
    audio_mode: std::sync::Mutex<Option<AudioMode>>,
}

impl MpvBackend {
    pub fn new(volume: f32, load_timeout: Duration) -> Self {
        Self {
            volume,
            load_timeout,
            next_handle_id: AtomicU64::new(1),
            audio_mode: std::sync::Mutex::new(None),
        }
    }

    fn spawn_process(&self, socket_name: &str) -> anyhow::Result<tokio::process::Child> {
        let mpv_binary = tune_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--keep-open=yes")
            .arg("--pause")
            .arg("--quiet")
            .arg("--audio-client-name=tune")
            .arg(format!(
                "--volume={}",
                (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .arg(tune_proto::platform::mpv_socket_arg(socket_name))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }

    #[cfg(unix)]
    async fn connect(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvIpc> {
        let socket_path = std::path::PathBuf::from(socket_name);
        for _ in 0..50 {
            if socket_path.exists() {
                if let Ok(stream) = UnixStream::connect(&socket_path).await {
                    let (read_half, write_half) = stream.into_split();
                    return Ok(MpvIpc::start(read_half, write_half, event_tx));
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("mpv IPC socket did not appear")
    }

    #[cfg(windows)]
    async fn connect(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvIpc> {
        let pipe_path = format!(r"\\.\pipe\{}", socket_name);
        for _ in 0..50 {
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(MpvIpc::start(read_half, write_half, event_tx));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

#[async_trait]
impl SoundBackend for MpvBackend {
    async fn apply_audio_mode(&self, mode: &AudioMode) -> Result<(), SessionError> {
        let mut current = self
            .audio_mode
            .lock()
            .map_err(|_| SessionError::AudioMode("audio mode lock poisoned".into()))?;
        if current.as_ref() != Some(mode) {
            // mpv has no session categories or ducking; every process is
            // already a background player.
            debug!("mpv: audio mode {:?}", mode);
            *current = Some(*mode);
        }
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<Box<dyn Sound>, SessionError> {
        let load_err = |reason: String| SessionError::Load {
            url: url.to_string(),
            reason,
        };

        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let socket_name = tune_proto::platform::mpv_socket_name(id);
        info!("mpv[{}]: spawning for {}", id, url);

        let process = self
            .spawn_process(&socket_name)
            .map_err(|e| load_err(e.to_string()))?;
        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);

        let mut sound = MpvSound {
            id,
            socket_name,
            process: Some(process),
            ipc: None,
            event_drain: None,
        };

        let loaded = async {
            let ipc = Self::connect(&sound.socket_name, event_tx).await?;
            sound.ipc = Some(ipc.clone());
            ipc.send(json!(["loadfile", url])).await?;
            tokio::time::timeout(self.load_timeout, wait_for_file_loaded(&mut event_rx))
                .await
                .map_err(|_| anyhow::anyhow!("timed out after {:?}", self.load_timeout))?
        }
        .await;

        if let Err(e) = loaded {
            warn!("mpv[{}]: load failed: {}", id, e);
            let _ = sound.unload().await;
            return Err(load_err(e.to_string()));
        }

        info!("mpv[{}]: file loaded", id);
        sound.event_drain = Some(tokio::spawn(drain_events(id, event_rx)).abort_handle());
        Ok(Box::new(sound))
    }
}

async fn wait_for_file_loaded(events: &mut mpsc::Receiver<MpvEvent>) -> anyhow::Result<()> {
    while let Some(evt) = events.recv().await {
        match evt.event_name() {
            Some("file-loaded") => return Ok(()),
            Some("end-file") => {
                let reason = evt.end_reason().unwrap_or("unknown");
                let detail = evt
                    .raw
                    .get("file_error")
                    .and_then(|v| v.as_str())
                    .unwrap_or(reason);
                anyhow::bail!("mpv ended the file: {}", detail);
            }
            _ => {}
        }
    }
    anyhow::bail!("mpv IPC connection closed while loading")
}

/// Keeps the event channel flowing for the lifetime of a loaded sound.
async fn drain_events(id: u64, mut events: mpsc::Receiver<MpvEvent>) {
    while let Some(evt) = events.recv().await {
        if evt.event_name() == Some("end-file") {
            match evt.end_reason() {
                Some("error") | Some("network") => {
                    warn!("mpv[{}]: playback ended with {:?}", id, evt.raw.get("file_error"))
                }
                reason => debug!("mpv[{}]: end-file reason={:?}", id, reason),
            }
        }
    }
}

// ── sound handle ──────────────────────────────────────────────────────────────

pub struct MpvSound {
    id: u64,
    socket_name: String,
    process: Option<tokio::process::Child>,
    ipc: Option<MpvIpc>,
    event_drain: Option<tokio::task::AbortHandle>,
}

impl MpvSound {
    fn ipc(&self) -> Result<&MpvIpc, SessionError> {
        self.ipc
            .as_ref()
            .ok_or_else(|| SessionError::Transport(format!("mpv[{}] not connected", self.id)))
    }
}

#[async_trait]
impl Sound for MpvSound {
    async fn play(&mut self) -> Result<(), SessionError> {
        debug!("mpv[{}]: play", self.id);
        let ipc = self.ipc()?;
        // --keep-open parks a finished file on its last frame; start it over.
        if let Ok(Some(true)) = ipc.get_bool("eof-reached").await {
            ipc.send(json!(["seek", 0, "absolute"]))
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
        }
        ipc.set_pause(false)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        debug!("mpv[{}]: pause", self.id);
        self.ipc()?
            .set_pause(true)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn status(&self) -> Result<TransportStatus, SessionError> {
        let ipc = self.ipc()?;
        let position = ipc
            .get_f64("time-pos")
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let Some(position) = position else {
            return Ok(TransportStatus::not_loaded());
        };
        let duration = ipc.get_f64("duration").await.ok().flatten();
        let finished = ipc.get_bool("eof-reached").await.ok().flatten();
        Ok(TransportStatus {
            is_loaded: true,
            position_millis: (position.max(0.0) * 1000.0) as u64,
            duration_millis: duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| (d * 1000.0) as u64),
            finished: finished.unwrap_or(false),
        })
    }

    async fn unload(&mut self) -> Result<(), SessionError> {
        debug!("mpv[{}]: unload", self.id);
        if let Some(ipc) = self.ipc.take() {
            let _ = ipc.send(json!(["quit"])).await;
        }
        if let Some(drain) = self.event_drain.take() {
            drain.abort();
        }
        let killed = match self.process.take() {
            Some(mut child) => child.kill().await,
            None => Ok(()),
        };
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
        // kill() on a process that already quit is not a failure
        match killed {
            Err(e) if e.kind() != std::io::ErrorKind::InvalidInput => {
                Err(SessionError::Transport(format!("mpv[{}] kill failed: {}", self.id, e)))
            }
            _ => Ok(()),
        }
    }
}
