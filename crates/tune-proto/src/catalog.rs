//! Parsing helpers that turn remote listings into `TrackDescriptor`s.

use crate::protocol::TrackDescriptor;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde::Deserialize;

/// Display name for an object key: the last path segment without its final
/// extension.  A segment without an extension is used as-is.
pub fn track_name_from_key(key: &str) -> String {
    let segment = key.rsplit('/').next().unwrap_or(key);
    match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => segment.to_string(),
    }
}

/// Display name for a track URL: query and fragment dropped, the last path
/// segment percent-decoded, then named like an object key.
pub fn track_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    track_name_from_key(&percent_decode_str(segment).decode_utf8_lossy())
}

/// Public URL of `key` under `base`, each path segment percent-encoded.
pub fn object_url(base: &str, key: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(base)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("base url cannot carry a path: {}", base))?;
        segments.pop_if_empty();
        segments.extend(key.split('/'));
    }
    Ok(url.to_string())
}

// ── S3 ListObjectsV2 ──────────────────────────────────────────────────────────

/// The subset of an S3 `ListBucketResult` document we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub contents: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectEntry {
    pub key: String,
}

pub fn parse_list_bucket_result(xml: &str) -> anyhow::Result<ListBucketResult> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Map listed keys to tracks, skipping the namespace placeholder (`prefix`
/// itself) and any other "folder" keys.
pub fn tracks_from_keys<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    prefix: &str,
    public_base: &str,
) -> anyhow::Result<Vec<TrackDescriptor>> {
    let mut tracks = Vec::new();
    for key in keys {
        if key == prefix || key.ends_with('/') {
            continue;
        }
        tracks.push(TrackDescriptor {
            url: object_url(public_base, key)?,
            name: track_name_from_key(key),
        });
    }
    Ok(tracks)
}

// ── m3u ───────────────────────────────────────────────────────────────────────

pub fn parse_m3u_from_str(content: &str) -> Vec<TrackDescriptor> {
    let mut tracks = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                let title = rest[comma_idx + 1..].trim();
                if !title.is_empty() {
                    pending_name = Some(title.to_string());
                }
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let name = pending_name
            .take()
            .unwrap_or_else(|| track_name_from_url(&url));

        tracks.push(TrackDescriptor { url, name });
    }

    tracks
}
