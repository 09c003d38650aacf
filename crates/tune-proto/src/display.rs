//! Display-ready formatting of the session state.

use crate::protocol::{SessionPhase, SessionState, TransportStatus};

const BLOCKS: [char; 9] = [' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉', '█'];

/// Elapsed whole seconds as `M:SS`.  Minutes are not padded and keep
/// counting past 59.
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// `elapsed / total` label, or `None` unless the sound is loaded with a
/// known positive duration.
pub fn time_label(status: &TransportStatus) -> Option<String> {
    let duration = status.duration_millis.filter(|d| *d > 0)?;
    if !status.is_loaded {
        return None;
    }
    Some(format!(
        "{} / {}",
        format_duration(status.position_millis / 1000),
        format_duration(duration / 1000)
    ))
}

/// Smooth Unicode progress bar `width` cells wide.  `ratio` is clamped to
/// `0.0..=1.0`.
pub fn render_bar(ratio: f64, width: usize) -> String {
    let eighths = (ratio.clamp(0.0, 1.0) * width as f64 * 8.0) as usize;
    let full_blocks = eighths / 8;
    let partial = eighths % 8;

    let mut bar = String::with_capacity(width * 3);
    for _ in 0..full_blocks.min(width) {
        bar.push('█');
    }
    if full_blocks < width {
        bar.push(BLOCKS[partial]);
        for _ in (full_blocks + 1)..width {
            bar.push(' ');
        }
    }
    bar
}

/// What a now-playing widget should show for a given state.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    /// `None` while the catalog is loading or nothing is selected.
    pub title: Option<String>,
    /// `M:SS / M:SS`, only when the transport knows the duration.
    pub time_label: Option<String>,
    /// Width of the filled part of the bar, `0.0..=100.0`.
    pub progress_percent: Option<f64>,
    /// Label of the play/pause control.
    pub control_label: &'static str,
    pub error: Option<String>,
}

impl NowPlaying {
    pub fn from_state(state: &SessionState) -> Self {
        let control_label = if state.is_playing { "Pause" } else { "Play" };
        let error = match state.phase {
            SessionPhase::Error => state.last_error.clone(),
            _ => None,
        };

        let Some(track) = state.active_track.as_ref().filter(|_| !state.catalog.loading) else {
            return Self {
                title: None,
                time_label: None,
                progress_percent: None,
                control_label,
                error,
            };
        };

        let (time_label, progress_percent) = match state.transport.as_ref() {
            Some(status) => (
                time_label(status),
                status.progress_ratio().map(|r| r * 100.0),
            ),
            None => (None, None),
        };

        Self {
            title: Some(track.name.clone()),
            time_label,
            progress_percent,
            control_label,
            error,
        }
    }

    /// Single-line rendering used by terminal clients.
    pub fn render_line(&self, bar_width: usize) -> String {
        let Some(title) = self.title.as_deref() else {
            return match self.error.as_deref() {
                Some(err) => format!("Error: {}", err),
                None => "Loading...".to_string(),
            };
        };
        match (self.time_label.as_deref(), self.progress_percent) {
            (Some(label), Some(percent)) => format!(
                "{}  {} [{}]  ({})",
                title,
                label,
                render_bar(percent / 100.0, bar_width),
                self.control_label
            ),
            _ => format!("{}  Loading...  ({})", title, self.control_label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CatalogState, TrackDescriptor};

    fn loaded_state(position_millis: u64, duration_millis: Option<u64>) -> SessionState {
        SessionState {
            catalog: CatalogState {
                tracks: vec![TrackDescriptor::new("https://x/a.mp3", "Intro")],
                loading: false,
                error: None,
            },
            active_track: Some(TrackDescriptor::new("https://x/a.mp3", "Intro")),
            is_playing: true,
            is_playing_confirmed: true,
            phase: SessionPhase::Playing,
            transport: Some(TransportStatus {
                is_loaded: true,
                position_millis,
                duration_millis,
                finished: false,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(599), "9:59");
        assert_eq!(format_duration(3600), "60:00");
    }

    #[test]
    fn test_time_label_needs_known_duration() {
        let status = TransportStatus {
            is_loaded: true,
            position_millis: 65_400,
            duration_millis: Some(185_000),
            finished: false,
        };
        assert_eq!(time_label(&status).as_deref(), Some("1:05 / 3:05"));

        let unknown = TransportStatus {
            duration_millis: None,
            ..status
        };
        assert_eq!(time_label(&unknown), None);

        let unloaded = TransportStatus {
            is_loaded: false,
            ..status
        };
        assert_eq!(time_label(&unloaded), None);
    }

    #[test]
    fn test_render_bar_fills() {
        assert_eq!(render_bar(0.0, 4), "    ");
        assert_eq!(render_bar(1.0, 4), "████");
        assert_eq!(render_bar(0.5, 4), "██  ");
        assert_eq!(render_bar(2.0, 3).chars().count(), 3);
    }

    #[test]
    fn test_now_playing_loading_while_catalog_loads() {
        let mut state = loaded_state(0, Some(1000));
        state.catalog.loading = true;
        let np = NowPlaying::from_state(&state);
        assert_eq!(np.title, None);
        assert_eq!(np.render_line(10), "Loading...");
    }

    #[test]
    fn test_now_playing_progress() {
        let np = NowPlaying::from_state(&loaded_state(50_000, Some(100_000)));
        assert_eq!(np.title.as_deref(), Some("Intro"));
        assert_eq!(np.time_label.as_deref(), Some("0:50 / 1:40"));
        assert_eq!(np.progress_percent, Some(50.0));
        assert_eq!(np.control_label, "Pause");
    }

    #[test]
    fn test_now_playing_unknown_duration_has_no_progress() {
        let np = NowPlaying::from_state(&loaded_state(50_000, None));
        assert_eq!(np.progress_percent, None);
        assert_eq!(np.time_label, None);
        assert_eq!(np.render_line(10), "Intro  Loading...  (Pause)");
    }

    #[test]
    fn test_now_playing_surfaces_error() {
        let state = SessionState {
            catalog: CatalogState {
                loading: false,
                ..Default::default()
            },
            phase: SessionPhase::Error,
            last_error: Some("failed to load https://x/bad.mp3".into()),
            ..Default::default()
        };
        let np = NowPlaying::from_state(&state);
        assert_eq!(np.control_label, "Play");
        assert_eq!(np.render_line(10), "Error: failed to load https://x/bad.mp3");
    }
}
