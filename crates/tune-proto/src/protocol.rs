use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body either side will buffer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A frame that can never decode, as opposed to one still arriving.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),

    /// `len` covers the header too, so the caller can skip the frame.
    #[error("malformed frame: {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Select (and start) the catalog entry at `index`.
    Select { index: usize },
    /// Select an arbitrary track by url.
    SelectUrl { url: String },
    Toggle,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: SessionState,
    },
    State {
        data: SessionState,
    },
    /// Latest transport snapshot from the status poller.  `None` when no
    /// track is bound.
    Status {
        status: Option<TransportStatus>,
    },
    Error {
        message: String,
    },
    Log {
        message: String,
    },
}

/// One playable item from the remote catalog.  Identity is the url.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct TrackDescriptor {
    pub url: String,
    pub name: String,
}

impl TrackDescriptor {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for TrackDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Hash for TrackDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Point-in-time transport snapshot read from the active sound.  Never the
/// source of truth for playing/paused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct TransportStatus {
    pub is_loaded: bool,
    pub position_millis: u64,
    /// `None` while the duration is unknown (live streams, still probing).
    pub duration_millis: Option<u64>,
    /// Played to the end and stopped there by itself.
    #[serde(default)]
    pub finished: bool,
}

impl TransportStatus {
    /// Status reported when the sound can't be queried.
    pub fn not_loaded() -> Self {
        Self::default()
    }

    /// `position / duration` clamped to `0.0..=1.0`.  Only defined when the
    /// sound is loaded and the duration is a known positive number.
    pub fn progress_ratio(&self) -> Option<f64> {
        if !self.is_loaded {
            return None;
        }
        match self.duration_millis {
            Some(d) if d > 0 => Some((self.position_millis as f64 / d as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// Shared read-only view of the track catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogState {
    pub tracks: Vec<TrackDescriptor>,
    pub loading: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

/// Coarse lifecycle of the playback session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle, // nothing bound
    Loading, // releasing the previous sound / acquiring the next
    Playing,
    Paused,
    Error, // last acquisition failed; nothing bound
}

/// Full published state of the session.  `rev` is a monotonically
/// increasing counter incremented every time the state changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub catalog: CatalogState,
    pub active_track: Option<TrackDescriptor>,
    /// What the user asked for.  Flips as soon as a toggle is issued.
    pub is_playing: bool,
    /// What the sound last acknowledged.
    pub is_playing_confirmed: bool,
    pub phase: SessionPhase,
    pub transport: Option<TransportStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SessionState {
    /// True while a toggle has been issued but not yet acknowledged.
    pub fn is_pending(&self) -> bool {
        self.is_playing != self.is_playing_confirmed
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            anyhow::bail!("message of {} bytes exceeds the frame size limit", json.len());
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode the first frame in `data`.  `Ok(None)` means the frame is not
    /// complete yet; keep buffering.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])
            .map_err(|source| FrameError::Malformed { len: 4 + len, source })?;
        Ok(Some((msg, 4 + len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_frame_decodes() {
        let msg = Message::Command(Command::Select { index: 5 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap().unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Select { index }) => assert_eq!(index, 5),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let msg = Message::Command(Command::Toggle);
        let encoded = msg.encode().unwrap();
        assert!(Message::decode(&encoded[..2]).unwrap().is_none());
        assert!(Message::decode(&encoded[..encoded.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bad_json_frame_reports_its_length() {
        let body = b"{not json}";
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);
        frame.extend_from_slice(&Message::Command(Command::Toggle).encode().unwrap());

        match Message::decode(&frame) {
            Err(FrameError::Malformed { len, .. }) => {
                assert_eq!(len, 4 + body.len());
                let (next, _) = Message::decode(&frame[len..]).unwrap().unwrap();
                assert!(matches!(next, Message::Command(Command::Toggle)));
            }
            other => panic!("expected a malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_header_is_rejected_before_buffering() {
        let header = u32::MAX.to_be_bytes();
        assert!(matches!(
            Message::decode(&header),
            Err(FrameError::TooLarge(len)) if len == u32::MAX as usize
        ));
    }

    #[test]
    fn test_hello_carries_rev() {
        let state = SessionState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap().unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
                assert_eq!(state.rev, 42);
                assert!(state.catalog.loading);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_track_identity_is_url() {
        let a = TrackDescriptor::new("https://x/a.mp3", "a");
        let b = TrackDescriptor::new("https://x/a.mp3", "renamed");
        assert_eq!(a, b);
        assert_ne!(a, TrackDescriptor::new("https://x/b.mp3", "a"));
    }

    #[test]
    fn test_progress_ratio_bounds() {
        let start = TransportStatus {
            is_loaded: true,
            position_millis: 0,
            duration_millis: Some(100_000),
            finished: false,
        };
        assert_eq!(start.progress_ratio(), Some(0.0));

        let end = TransportStatus {
            position_millis: 100_000,
            ..start
        };
        assert_eq!(end.progress_ratio(), Some(1.0));

        let unknown = TransportStatus {
            duration_millis: None,
            ..start
        };
        assert_eq!(unknown.progress_ratio(), None);

        let zero = TransportStatus {
            duration_millis: Some(0),
            ..start
        };
        assert_eq!(zero.progress_ratio(), None);

        assert_eq!(TransportStatus::not_loaded().progress_ratio(), None);
    }
}
