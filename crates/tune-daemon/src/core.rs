/// SessionCore — single-owner event loop for the playback session.
///
/// SessionCore owns the `PlaybackController` (and with it the only sound
/// handle) and the `StatusPoller` exclusively; no other task touches them.
/// Every input arrives as a `SessionEvent` and is handled to completion
/// before the next one is read, which is what serialises `select`: a second
/// select queued behind a slow load only starts after the first has bound or
/// failed.
///
/// Other inputs are multiplexed into the same loop:
///   - status ticks from the poller (tagged with the binding generation),
///   - catalog publishes, which drive the auto-select-first-track rule.
///
/// After each mutation the controller broadcasts
/// `SessionMessage::StateUpdated`; status snapshots go out as
/// `SessionMessage::Status` and failures as `SessionMessage::Error`.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tune_proto::protocol::{SessionState, TrackDescriptor, TransportStatus};
use tune_proto::state::StateManager;

use crate::backend::SoundBackend;
use crate::catalog::CatalogReader;
use crate::error::SessionError;
use crate::poller::StatusPoller;
use crate::session::PlaybackController;
use crate::SessionMessage;

type Reply = oneshot::Sender<Result<(), SessionError>>;

// ── SessionEvent ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionEvent {
    Select { track: TrackDescriptor, reply: Reply },
    SelectIndex { index: usize, reply: Reply },
    SelectUrl { url: String, reply: Reply },
    Toggle { reply: Reply },
    Shutdown,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    controller: PlaybackController,
    poller: StatusPoller,
    tick_rx: mpsc::Receiver<u64>,
    catalog: CatalogReader,
    state: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<SessionMessage>,
}

impl SessionCore {
    pub fn new(
        backend: Arc<dyn SoundBackend>,
        catalog: CatalogReader,
        state: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<SessionMessage>,
        poll_interval: Duration,
    ) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(8);
        Self {
            controller: PlaybackController::new(backend, state.clone(), broadcast_tx.clone()),
            poller: StatusPoller::new(poll_interval, tick_tx),
            tick_rx,
            catalog,
            state,
            broadcast_tx,
        }
    }

    /// Read-only view for display consumers.
    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
        }
    }

    /// Run until `Shutdown` arrives or every `SessionHandle` is dropped.
    /// Releases the bound sound on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");
        let mut catalog_open = true;
        self.on_catalog_changed().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("SessionCore: all handles dropped, shutting down");
                        break;
                    }
                    Some(SessionEvent::Shutdown) => {
                        info!("SessionCore: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt).await,
                },

                Some(generation) = self.tick_rx.recv() => {
                    if self.poller.is_current(generation) {
                        self.refresh_status().await;
                    } else {
                        debug!("SessionCore: dropping stale tick for generation {}", generation);
                    }
                }

                changed = self.catalog.changed(), if catalog_open => {
                    if changed.is_err() {
                        debug!("SessionCore: catalog writer finished");
                        catalog_open = false;
                    } else {
                        self.on_catalog_changed().await;
                    }
                }
            }
        }

        self.poller.stop();
        self.controller.shutdown().await;
        Ok(())
    }

    async fn handle_event(&mut self, evt: SessionEvent) {
        match evt {
            SessionEvent::Select { track, reply } => {
                let result = self.select(track).await;
                let _ = reply.send(result);
            }
            SessionEvent::SelectIndex { index, reply } => {
                let result = match self.catalog.track(index) {
                    Some(track) => self.select(track).await,
                    None => Err(SessionError::NoSuchTrack(index)),
                };
                let _ = reply.send(result);
            }
            SessionEvent::SelectUrl { url, reply } => {
                let track = self.catalog.find_url(&url).unwrap_or_else(|| {
                    let name = tune_proto::catalog::track_name_from_url(&url);
                    TrackDescriptor::new(url.clone(), name)
                });
                let result = self.select(track).await;
                let _ = reply.send(result);
            }
            SessionEvent::Toggle { reply } => {
                let result = self.controller.toggle().await;
                if let Err(e) = &result {
                    let _ = self.broadcast_tx.send(SessionMessage::Error(e.to_string()));
                }
                let _ = reply.send(result);
            }
            SessionEvent::Shutdown => {}
        }
    }

    async fn select(&mut self, track: TrackDescriptor) -> Result<(), SessionError> {
        // The old sound is about to go away; its ticker goes first.
        self.poller.stop();
        let result = self.controller.select(track).await;
        match &result {
            Ok(()) => {
                self.refresh_status().await;
                self.poller.start(self.controller.generation());
            }
            Err(e) => {
                error!("SessionCore: select failed: {}", e);
                let _ = self.broadcast_tx.send(SessionMessage::Status(None));
                let _ = self.broadcast_tx.send(SessionMessage::Error(e.to_string()));
            }
        }
        result
    }

    async fn refresh_status(&mut self) {
        let status = self.controller.refresh_status().await;
        let _ = self.broadcast_tx.send(SessionMessage::Status(status));
    }

    async fn on_catalog_changed(&mut self) {
        let catalog = self.catalog.snapshot_and_mark_seen();
        if let Some(err) = catalog.error.as_ref() {
            warn!("SessionCore: catalog unavailable: {}", err);
        }
        self.state.set_catalog(catalog.clone()).await;
        let _ = self.broadcast_tx.send(SessionMessage::StateUpdated);

        if let Some(first) = self.controller.auto_select_candidate(&catalog) {
            info!("SessionCore: auto-selecting first track '{}'", first.name);
            // Failure is already logged and broadcast; no retry.
            let _ = self.select(first).await;
        }
    }
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// Cloneable front door to the session loop.  Each call resolves when the
/// loop has finished the operation.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }

    async fn request(
        &self,
        make: impl FnOnce(Reply) -> SessionEvent,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn select(&self, track: TrackDescriptor) -> Result<(), SessionError> {
        self.request(|reply| SessionEvent::Select { track, reply }).await
    }

    pub async fn select_index(&self, index: usize) -> Result<(), SessionError> {
        self.request(|reply| SessionEvent::SelectIndex { index, reply })
            .await
    }

    pub async fn select_url(&self, url: String) -> Result<(), SessionError> {
        self.request(|reply| SessionEvent::SelectUrl { url, reply })
            .await
    }

    pub async fn toggle(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionEvent::Toggle { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SessionEvent::Shutdown).await;
    }
}

// ── SessionView ───────────────────────────────────────────────────────────────

/// Narrow read-only capability over the session: snapshots and change
/// notifications, never the controller itself.
#[derive(Clone)]
pub struct SessionView {
    state: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<SessionMessage>,
}

impl SessionView {
    pub async fn snapshot(&self) -> SessionState {
        self.state.get_state().await
    }

    pub async fn status(&self) -> Option<TransportStatus> {
        self.state.get_state().await.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Stream of status snapshots as the poller produces them.
    pub fn observe_status(&self) -> StatusStream {
        StatusStream {
            rx: self.broadcast_tx.subscribe(),
        }
    }
}

pub struct StatusStream {
    rx: broadcast::Receiver<SessionMessage>,
}

impl StatusStream {
    /// Next status snapshot; `None` once the session is gone.  Lagging
    /// skips to the newest.
    pub async fn next(&mut self) -> Option<Option<TransportStatus>> {
        loop {
            match self.rx.recv().await {
                Ok(SessionMessage::Status(status)) => return Some(status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("status stream lagged by {}", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
