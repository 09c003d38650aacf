use crate::protocol::{CatalogState, SessionPhase, SessionState, TrackDescriptor, TransportStatus};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owner of the published `SessionState`.
///
/// The playback controller is the only writer.  Everyone else gets clones
/// through `get_state()`.
pub struct StateManager {
    state: Arc<RwLock<SessionState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
        }
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.state.read().await.rev
    }

    pub async fn set_catalog(&self, catalog: CatalogState) {
        let mut state = self.state.write().await;
        state.catalog = catalog;
        state.rev += 1;
    }

    /// A `select` has started: the previous binding is about to go away.
    pub async fn set_loading_track(&self, track: &TrackDescriptor) {
        let mut state = self.state.write().await;
        state.phase = SessionPhase::Loading;
        state.active_track = Some(track.clone());
        state.is_playing = false;
        state.is_playing_confirmed = false;
        state.transport = None;
        state.last_error = None;
        state.rev += 1;
    }

    /// The new sound is acquired and playback was requested.
    pub async fn set_bound(&self, track: TrackDescriptor, playing: bool) {
        let mut state = self.state.write().await;
        state.active_track = Some(track);
        state.is_playing = playing;
        state.is_playing_confirmed = playing;
        state.phase = phase_for(playing);
        state.rev += 1;
    }

    /// Record what the user asked for before the sound acknowledges it.
    pub async fn set_playing_intent(&self, playing: bool) {
        let mut state = self.state.write().await;
        state.is_playing = playing;
        state.rev += 1;
    }

    /// The sound acknowledged `playing`.  The intent collapses to it.
    pub async fn confirm_playing(&self, playing: bool) {
        let mut state = self.state.write().await;
        state.is_playing = playing;
        state.is_playing_confirmed = playing;
        if state.active_track.is_some() {
            state.phase = phase_for(playing);
        }
        state.rev += 1;
    }

    pub async fn set_transport(&self, transport: Option<TransportStatus>) {
        let mut state = self.state.write().await;
        if state.transport == transport {
            return;
        }
        state.transport = transport;
        state.rev += 1;
    }

    /// Nothing is bound any more (teardown).
    pub async fn set_unbound(&self) {
        let mut state = self.state.write().await;
        state.active_track = None;
        state.is_playing = false;
        state.is_playing_confirmed = false;
        state.phase = SessionPhase::Idle;
        state.transport = None;
        state.rev += 1;
    }

    /// Acquisition failed: no active track, error surfaced to observers.
    pub async fn set_error(&self, message: String) {
        let mut state = self.state.write().await;
        state.active_track = None;
        state.is_playing = false;
        state.is_playing_confirmed = false;
        state.phase = SessionPhase::Error;
        state.transport = None;
        state.last_error = Some(message);
        state.rev += 1;
    }
}

fn phase_for(playing: bool) -> SessionPhase {
    if playing {
        SessionPhase::Playing
    } else {
        SessionPhase::Paused
    }
}
