//! In-memory sound backend for tests.  Counts live handles so leaks and
//! overlapping acquisitions show up as assertions, and can inject load
//! delays and failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tune_proto::protocol::TransportStatus;

use crate::backend::{AudioMode, Sound, SoundBackend};
use crate::error::SessionError;

#[derive(Default)]
struct Inner {
    alive: usize,
    max_alive: usize,
    loads: usize,
    unloads: usize,
    modes_applied: usize,
    plays: usize,
    pauses: usize,
    status_queries: usize,
    fail_transport: bool,
    fail_unload: bool,
    finished: bool,
    failing_urls: HashSet<String>,
    load_delays: HashMap<String, Duration>,
    position_millis: u64,
    duration_millis: Option<u64>,
    playing: HashMap<u64, bool>,
    current: Option<(u64, String)>,
    next_id: u64,
}

pub struct FakeBackend {
    inner: Arc<Mutex<Inner>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn alive(&self) -> usize {
        self.lock().alive
    }

    pub fn max_alive(&self) -> usize {
        self.lock().max_alive
    }

    pub fn loads(&self) -> usize {
        self.lock().loads
    }

    pub fn unloads(&self) -> usize {
        self.lock().unloads
    }

    pub fn audio_mode_applied(&self) -> usize {
        self.lock().modes_applied
    }

    pub fn play_commands(&self) -> usize {
        self.lock().plays
    }

    pub fn pause_commands(&self) -> usize {
        self.lock().pauses
    }

    pub fn status_queries(&self) -> usize {
        self.lock().status_queries
    }

    /// Url of the most recently loaded handle that is still alive.
    pub fn current_url(&self) -> Option<String> {
        self.lock().current.as_ref().map(|(_, url)| url.clone())
    }

    pub fn current_sound_playing(&self) -> bool {
        let inner = self.lock();
        match inner.current {
            Some((id, _)) => inner.playing.get(&id).copied().unwrap_or(false),
            None => false,
        }
    }

    pub fn fail_transport(&self, fail: bool) {
        self.lock().fail_transport = fail;
    }

    /// `unload` reports an error; the handle is still freed when dropped.
    pub fn fail_unload(&self, fail: bool) {
        self.lock().fail_unload = fail;
    }

    /// The current sound runs off the end and stops by itself.
    pub fn finish_current(&self) {
        let mut inner = self.lock();
        inner.finished = true;
        if let Some((id, _)) = inner.current {
            inner.playing.insert(id, false);
        }
    }

    pub fn fail_url(&self, url: &str) {
        self.lock().failing_urls.insert(url.to_string());
    }

    pub fn delay_load(&self, url: &str, delay: Duration) {
        self.lock().load_delays.insert(url.to_string(), delay);
    }

    pub fn set_position(&self, position_millis: u64, duration_millis: Option<u64>) {
        let mut inner = self.lock();
        inner.position_millis = position_millis;
        inner.duration_millis = duration_millis;
    }
}

#[async_trait]
impl SoundBackend for FakeBackend {
    async fn apply_audio_mode(&self, mode: &AudioMode) -> Result<(), SessionError> {
        assert_eq!(*mode, AudioMode::PLAYBACK);
        self.lock().modes_applied += 1;
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<Box<dyn Sound>, SessionError> {
        let delay = {
            let mut inner = self.lock();
            inner.loads += 1;
            inner.load_delays.get(url).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if inner.failing_urls.contains(url) {
            return Err(SessionError::Load {
                url: url.to_string(),
                reason: "unsupported format".into(),
            });
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.alive += 1;
        inner.max_alive = inner.max_alive.max(inner.alive);
        inner.playing.insert(id, false);
        inner.current = Some((id, url.to_string()));
        Ok(Box::new(FakeSound {
            id,
            inner: self.inner.clone(),
            released: false,
        }))
    }
}

struct FakeSound {
    id: u64,
    inner: Arc<Mutex<Inner>>,
    released: bool,
}

impl FakeSound {
    fn transport(&self, playing: bool) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        assert!(!self.released, "transport command on released sound");
        if inner.fail_transport {
            return Err(SessionError::Transport("injected failure".into()));
        }
        if playing {
            inner.plays += 1;
            inner.finished = false;
        } else {
            inner.pauses += 1;
        }
        inner.playing.insert(self.id, playing);
        Ok(())
    }
}

#[async_trait]
impl Sound for FakeSound {
    async fn play(&mut self) -> Result<(), SessionError> {
        self.transport(true)
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        self.transport(false)
    }

    async fn status(&self) -> Result<TransportStatus, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.status_queries += 1;
        if inner.fail_transport || self.released {
            return Err(SessionError::Transport("not loaded".into()));
        }
        Ok(TransportStatus {
            is_loaded: true,
            position_millis: inner.position_millis,
            duration_millis: inner.duration_millis,
            finished: inner.finished,
        })
    }

    async fn unload(&mut self) -> Result<(), SessionError> {
        if self.released {
            return Ok(());
        }
        if self.inner.lock().unwrap().fail_unload {
            return Err(SessionError::Transport("injected unload failure".into()));
        }
        self.release();
        self.inner.lock().unwrap().unloads += 1;
        Ok(())
    }
}

impl FakeSound {
    fn release(&mut self) {
        self.released = true;
        // Poisoned by a failed assertion; the test is already going down.
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.alive -= 1;
        if matches!(inner.current, Some((id, _)) if id == self.id) {
            inner.current = None;
        }
    }
}

impl Drop for FakeSound {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}
