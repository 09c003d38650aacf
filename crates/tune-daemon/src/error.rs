use thiserror::Error;

/// Failures of playback session operations.  None of them is fatal: the
/// session falls back to "no active track" and keeps running.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Acquiring a sound for `url` failed (bad url, network, format).
    #[error("failed to load {url}: {reason}")]
    Load { url: String, reason: String },

    /// A play/pause/status command was rejected by the sound.
    #[error("transport command failed: {0}")]
    Transport(String),

    #[error("failed to apply audio mode: {0}")]
    AudioMode(String),

    #[error("no track at catalog index {0}")]
    NoSuchTrack(usize),

    /// The session loop is gone.
    #[error("playback session closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed listing: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog configuration error: {0}")]
    Config(String),
}
