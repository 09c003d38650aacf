//! Seam between the session controller and whatever actually plays audio.

use async_trait::async_trait;
use tune_proto::protocol::TransportStatus;

use crate::error::SessionError;

/// Fixed audio-session policy applied before every acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMode {
    pub allows_recording: bool,
    pub stays_active_in_background: bool,
    /// Lower other applications' audio while we play.
    pub duck_others: bool,
    pub plays_in_silent_mode: bool,
    pub play_through_earpiece: bool,
}

impl AudioMode {
    pub const PLAYBACK: AudioMode = AudioMode {
        allows_recording: false,
        stays_active_in_background: true,
        duck_others: true,
        plays_in_silent_mode: true,
        play_through_earpiece: false,
    };
}

/// Factory for sound handles.
#[async_trait]
pub trait SoundBackend: Send + Sync {
    /// Idempotent; called on every `select`.
    async fn apply_audio_mode(&self, mode: &AudioMode) -> Result<(), SessionError>;

    /// Acquire a new handle bound to `url`.  The handle starts paused.
    async fn load(&self, url: &str) -> Result<Box<dyn Sound>, SessionError>;
}

/// One live, stateful playback resource.
#[async_trait]
pub trait Sound: Send + Sync {
    async fn play(&mut self) -> Result<(), SessionError>;

    async fn pause(&mut self) -> Result<(), SessionError>;

    async fn status(&self) -> Result<TransportStatus, SessionError>;

    /// Stop and free the underlying resource.  The handle must not be used
    /// afterwards, even when this returns an error.
    async fn unload(&mut self) -> Result<(), SessionError>;
}
