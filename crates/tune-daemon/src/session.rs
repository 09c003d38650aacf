//! The playback session: at most one bound sound, auto-play on select, and
//! an optimistic play/pause flag.
//!
//! `PlaybackController` is driven through `&mut self`, so callers can't
//! interleave two transitions on the same session.  `SessionCore` owns the
//! only instance and feeds it one event at a time.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tune_proto::intent::IntentState;
use tune_proto::protocol::{CatalogState, TrackDescriptor, TransportStatus};
use tune_proto::state::StateManager;

use crate::backend::{AudioMode, Sound, SoundBackend};
use crate::error::SessionError;
use crate::SessionMessage;

struct Binding {
    track: TrackDescriptor,
    sound: Box<dyn Sound>,
}

pub struct PlaybackController {
    backend: Arc<dyn SoundBackend>,
    state: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<SessionMessage>,
    bound: Option<Binding>,
    playing: IntentState<bool>,
    /// Set by the first select of the session, manual or automatic.
    has_selected: bool,
    /// Bumped whenever the binding changes; stale status ticks carry an old one.
    generation: u64,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn SoundBackend>,
        state: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<SessionMessage>,
    ) -> Self {
        Self {
            backend,
            state,
            broadcast_tx,
            bound: None,
            playing: IntentState::new(false),
            has_selected: false,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn notify(&self) {
        let _ = self.broadcast_tx.send(SessionMessage::StateUpdated);
    }

    /// Release whatever is bound, then acquire `track` and start it.
    ///
    /// On failure the session is left with nothing bound and the error is
    /// recorded in the published state.
    pub async fn select(&mut self, track: TrackDescriptor) -> Result<(), SessionError> {
        info!("session: select '{}' ({})", track.name, track.url);
        self.has_selected = true;
        self.state.set_loading_track(&track).await;
        self.notify();

        self.release().await;

        let acquired = self.acquire(&track).await;
        let sound = match acquired {
            Ok(sound) => sound,
            Err(e) => {
                warn!("session: '{}' failed: {}", track.name, e);
                self.playing.reset(false);
                self.state.set_error(e.to_string()).await;
                self.notify();
                return Err(e);
            }
        };

        self.bound = Some(Binding {
            track: track.clone(),
            sound,
        });
        self.generation += 1;
        self.playing.reset(true);
        self.state.set_bound(track, true).await;
        self.notify();
        Ok(())
    }

    async fn acquire(&mut self, track: &TrackDescriptor) -> Result<Box<dyn Sound>, SessionError> {
        self.backend.apply_audio_mode(&AudioMode::PLAYBACK).await?;

        let mut sound = self.backend.load(&track.url).await?;

        // Selecting always plays.
        self.playing.set_intent(true);
        self.state.set_playing_intent(true).await;
        if let Err(e) = sound.play().await {
            if let Err(unload_err) = sound.unload().await {
                warn!("session: unload after failed play: {}", unload_err);
            }
            return Err(e);
        }
        Ok(sound)
    }

    /// Flip play/pause on the bound sound.  Inert when nothing is bound.
    ///
    /// The intended flag changes before the transport command is awaited;
    /// if the command fails it falls back to the last confirmed value.
    pub async fn toggle(&mut self) -> Result<(), SessionError> {
        let Some(binding) = self.bound.as_mut() else {
            debug!("session: toggle with nothing bound");
            return Ok(());
        };

        let target = !*self.playing.intended();
        self.playing.set_intent(target);
        self.state.set_playing_intent(target).await;
        let _ = self.broadcast_tx.send(SessionMessage::StateUpdated);

        let result = if target {
            binding.sound.play().await
        } else {
            binding.sound.pause().await
        };

        match result {
            Ok(()) => {
                self.playing.confirm(target);
                self.state.confirm_playing(target).await;
                debug!("session: {}", if target { "resumed" } else { "paused" });
            }
            Err(ref e) => {
                warn!("session: toggle failed: {}", e);
                self.playing.rollback();
                self.state.confirm_playing(*self.playing.confirmed()).await;
            }
        }
        self.notify();
        result
    }

    /// Read-through transport snapshot of the bound sound.  A failing query
    /// reads as "not loaded"; nothing bound reads as `None`.
    ///
    /// A sound that played to the end has stopped by itself, so the play
    /// flag follows it to paused.
    pub async fn refresh_status(&mut self) -> Option<TransportStatus> {
        let status = match self.bound.as_ref() {
            None => None,
            Some(binding) => match binding.sound.status().await {
                Ok(status) => Some(status),
                Err(e) => {
                    debug!("session: status query failed: {}", e);
                    Some(TransportStatus::not_loaded())
                }
            },
        };

        let ended = status.is_some_and(|s| s.finished);
        if ended && *self.playing.confirmed() && !self.playing.is_pending() {
            if let Some(binding) = self.bound.as_ref() {
                info!("session: '{}' reached the end", binding.track.name);
            }
            self.playing.reset(false);
            self.state.confirm_playing(false).await;
            self.notify();
        }

        self.state.set_transport(status).await;
        status
    }

    /// The first track to auto-select, exactly once per session: only when
    /// nothing has ever been selected and the catalog is non-empty.
    pub fn auto_select_candidate(&self, catalog: &CatalogState) -> Option<TrackDescriptor> {
        if self.has_selected {
            return None;
        }
        catalog.tracks.first().cloned()
    }

    /// Release the bound sound (session teardown).
    pub async fn shutdown(&mut self) {
        if self.bound.is_some() {
            self.release().await;
            self.state.set_unbound().await;
            self.notify();
        }
    }

    async fn release(&mut self) {
        let Some(mut old) = self.bound.take() else {
            return;
        };
        self.generation += 1;
        info!("session: releasing '{}'", old.track.name);
        if let Err(e) = old.sound.unload().await {
            // The handle is dropped regardless; backends free on drop too.
            warn!("session: release of '{}' failed: {}", old.track.name, e);
        }
        self.playing.reset(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use tune_proto::protocol::SessionPhase;

    impl PlaybackController {
        fn active_track(&self) -> Option<&TrackDescriptor> {
            self.bound.as_ref().map(|b| &b.track)
        }

        fn is_playing(&self) -> bool {
            *self.playing.intended()
        }

        fn is_bound(&self) -> bool {
            self.bound.is_some()
        }
    }

    fn track(n: &str) -> TrackDescriptor {
        TrackDescriptor::new(format!("https://files.example/music/{}.mp3", n), n)
    }

    fn controller(backend: &Arc<FakeBackend>) -> (PlaybackController, Arc<StateManager>) {
        let state = Arc::new(StateManager::new());
        let (tx, _) = broadcast::channel(64);
        let ctl = PlaybackController::new(backend.clone(), state.clone(), tx);
        (ctl, state)
    }

    #[tokio::test]
    async fn test_select_binds_and_plays() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);

        ctl.select(track("a")).await.unwrap();

        assert!(ctl.is_playing());
        assert_eq!(ctl.active_track(), Some(&track("a")));
        assert_eq!(backend.alive(), 1);
        assert_eq!(backend.audio_mode_applied(), 1);
        let snapshot = state.get_state().await;
        assert_eq!(snapshot.phase, SessionPhase::Playing);
        assert!(snapshot.is_playing_confirmed);
    }

    #[tokio::test]
    async fn test_reselect_releases_previous_first() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);

        for name in ["a", "b", "c", "b"] {
            ctl.select(track(name)).await.unwrap();
            assert_eq!(backend.alive(), 1);
            assert!(backend.max_alive() <= 1);
        }
        assert_eq!(ctl.active_track(), Some(&track("b")));
        assert_eq!(backend.loads(), 4);
        assert_eq!(backend.unloads(), 3);
    }

    #[tokio::test]
    async fn test_select_always_plays_even_when_paused() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);

        ctl.select(track("a")).await.unwrap();
        ctl.toggle().await.unwrap();
        assert!(!ctl.is_playing());

        ctl.select(track("b")).await.unwrap();
        assert!(ctl.is_playing());
        assert!(backend.current_sound_playing());
    }

    #[tokio::test]
    async fn test_toggle_symmetry() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);
        ctl.select(track("a")).await.unwrap();
        let plays_before = backend.play_commands();

        ctl.toggle().await.unwrap();
        assert!(!ctl.is_playing());
        ctl.toggle().await.unwrap();
        assert!(ctl.is_playing());

        assert_eq!(backend.pause_commands(), 1);
        assert_eq!(backend.play_commands(), plays_before + 1);
    }

    #[tokio::test]
    async fn test_toggle_without_track_is_inert() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        let rev = state.rev().await;

        ctl.toggle().await.unwrap();

        assert!(!ctl.is_playing());
        assert_eq!(backend.pause_commands(), 0);
        assert_eq!(state.rev().await, rev);
    }

    #[tokio::test]
    async fn test_failed_toggle_rolls_back_intent() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();

        backend.fail_transport(true);
        assert!(ctl.toggle().await.is_err());

        assert!(ctl.is_playing());
        let snapshot = state.get_state().await;
        assert!(snapshot.is_playing);
        assert!(!snapshot.is_pending());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_nothing_bound() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();

        backend.fail_url(&track("bad").url);
        let err = ctl.select(track("bad")).await.unwrap_err();
        assert!(matches!(err, SessionError::Load { .. }));

        assert!(!ctl.is_bound());
        assert!(!ctl.is_playing());
        assert_eq!(backend.alive(), 0);
        let snapshot = state.get_state().await;
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert!(snapshot.last_error.unwrap().contains("bad.mp3"));

        // Status with nothing bound is simply absent.
        assert_eq!(ctl.refresh_status().await, None);
    }

    #[tokio::test]
    async fn test_status_query_failure_reads_not_loaded() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);
        ctl.select(track("a")).await.unwrap();
        backend.set_position(30_000, Some(120_000));

        let status = ctl.refresh_status().await.unwrap();
        assert!(status.is_loaded);
        assert_eq!(status.progress_ratio(), Some(0.25));

        backend.fail_transport(true);
        let status = ctl.refresh_status().await.unwrap();
        assert!(!status.is_loaded);
        assert_eq!(status.progress_ratio(), None);
    }

    #[tokio::test]
    async fn test_auto_select_candidate_only_before_first_select() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);

        let empty = CatalogState::default();
        assert_eq!(ctl.auto_select_candidate(&empty), None);

        let catalog = CatalogState {
            tracks: vec![track("a"), track("b")],
            loading: false,
            error: None,
        };
        assert_eq!(ctl.auto_select_candidate(&catalog), Some(track("a")));

        backend.fail_url(&track("z").url);
        let _ = ctl.select(track("z")).await;
        assert_eq!(ctl.auto_select_candidate(&catalog), None);
    }

    #[tokio::test]
    async fn test_shutdown_releases() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();

        ctl.shutdown().await;

        assert_eq!(backend.alive(), 0);
        assert!(state.get_state().await.active_track.is_none());
    }

    #[tokio::test]
    async fn test_generation_changes_with_binding() {
        let backend = FakeBackend::new();
        let (mut ctl, _) = controller(&backend);
        let g0 = ctl.generation();
        ctl.select(track("a")).await.unwrap();
        let g1 = ctl.generation();
        ctl.select(track("b")).await.unwrap();
        assert!(g1 > g0);
        assert!(ctl.generation() > g1);
    }

    #[tokio::test]
    async fn test_failed_unload_does_not_block_next_select() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();

        backend.fail_unload(true);
        ctl.select(track("b")).await.unwrap();

        assert_eq!(ctl.active_track(), Some(&track("b")));
        assert!(ctl.is_playing());
        assert_eq!(backend.alive(), 1);
        assert_eq!(backend.max_alive(), 1);
        assert_eq!(backend.current_url(), Some(track("b").url));
        assert_eq!(state.get_state().await.phase, SessionPhase::Playing);
    }

    #[tokio::test]
    async fn test_play_failure_after_load_frees_the_sound() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();

        backend.fail_transport(true);
        let err = ctl.select(track("b")).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));

        assert!(!ctl.is_bound());
        assert!(!ctl.is_playing());
        assert_eq!(backend.alive(), 0);
        assert_eq!(backend.max_alive(), 1);
        let snapshot = state.get_state().await;
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert!(snapshot.active_track.is_none());
    }

    #[tokio::test]
    async fn test_end_of_track_reads_as_paused() {
        let backend = FakeBackend::new();
        let (mut ctl, state) = controller(&backend);
        ctl.select(track("a")).await.unwrap();
        let plays_before = backend.play_commands();

        backend.finish_current();
        let status = ctl.refresh_status().await.unwrap();
        assert!(status.finished);

        assert!(!ctl.is_playing());
        let snapshot = state.get_state().await;
        assert_eq!(snapshot.phase, SessionPhase::Paused);
        assert!(!snapshot.is_pending());

        // One toggle starts it again; no pause is sent to a stopped sound.
        ctl.toggle().await.unwrap();
        assert!(ctl.is_playing());
        assert_eq!(backend.pause_commands(), 0);
        assert_eq!(backend.play_commands(), plays_before + 1);
        assert!(!ctl.refresh_status().await.unwrap().finished);
    }
}
