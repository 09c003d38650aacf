//! Track catalog provider.
//!
//! The catalog is shared state with exactly one writer.  `catalog_channel()`
//! hands out a single non-cloneable `CatalogWriter` and a cloneable
//! read-only `CatalogReader`; the fetch task owns the writer.

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::watch;
use tracing::{info, warn};
use tune_proto::catalog::{parse_list_bucket_result, parse_m3u_from_str, tracks_from_keys};
use tune_proto::config::{CatalogConfig, CatalogSource};
use tune_proto::protocol::{CatalogState, TrackDescriptor};

use crate::error::CatalogError;

#[async_trait]
pub trait TrackLister: Send + Sync {
    async fn list_tracks(&self) -> Result<Vec<TrackDescriptor>, CatalogError>;
}

pub fn lister_from_config(config: &CatalogConfig) -> Result<Box<dyn TrackLister>, CatalogError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("tune/", env!("CARGO_PKG_VERSION")))
        .build()?;
    match config.source {
        CatalogSource::S3 => {
            if config.bucket.is_empty() {
                return Err(CatalogError::Config(
                    "no bucket configured (set catalog.bucket or TUNE_BUCKET)".into(),
                ));
            }
            Ok(Box::new(S3Lister::new(client, config.clone())))
        }
        CatalogSource::M3u => {
            let source = config.m3u.clone().ok_or_else(|| {
                CatalogError::Config("m3u source selected but catalog.m3u is unset".into())
            })?;
            Ok(Box::new(M3uLister { client, source }))
        }
    }
}

// ── S3 ────────────────────────────────────────────────────────────────────────

/// Unsigned ListObjectsV2 over a public bucket.
pub struct S3Lister {
    client: reqwest::Client,
    config: CatalogConfig,
}

impl S3Lister {
    pub fn new(client: reqwest::Client, config: CatalogConfig) -> Self {
        Self { client, config }
    }

    fn page_url(&self, continuation: Option<&str>) -> Result<Url, CatalogError> {
        let mut params = vec![("list-type", "2"), ("prefix", self.config.prefix.as_str())];
        if let Some(token) = continuation {
            params.push(("continuation-token", token));
        }
        Url::parse_with_params(&self.config.list_url(), &params)
            .map_err(|e| CatalogError::Config(format!("bad bucket url: {}", e)))
    }
}

#[async_trait]
impl TrackLister for S3Lister {
    async fn list_tracks(&self) -> Result<Vec<TrackDescriptor>, CatalogError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let url = self.page_url(continuation.as_deref())?;
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(CatalogError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }

            let page = parse_list_bucket_result(&body).map_err(|e| CatalogError::Parse(e.to_string()))?;
            keys.extend(page.contents.into_iter().map(|c| c.key));
            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }

        tracks_from_keys(
            keys.iter().map(String::as_str),
            &self.config.prefix,
            &self.config.public_base(),
        )
        .map_err(|e| CatalogError::Parse(e.to_string()))
    }
}

// ── m3u ───────────────────────────────────────────────────────────────────────

/// Playlist file on disk or behind an http(s) URL.
pub struct M3uLister {
    client: reqwest::Client,
    source: String,
}

#[async_trait]
impl TrackLister for M3uLister {
    async fn list_tracks(&self) -> Result<Vec<TrackDescriptor>, CatalogError> {
        let content = if self.source.starts_with("http://") || self.source.starts_with("https://") {
            let resp = self.client.get(&self.source).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(CatalogError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                });
            }
            resp.text().await?
        } else {
            tokio::fs::read_to_string(&self.source).await?
        };
        Ok(parse_m3u_from_str(&content))
    }
}

// ── shared state ──────────────────────────────────────────────────────────────

pub fn catalog_channel() -> (CatalogWriter, CatalogReader) {
    let (tx, rx) = watch::channel(CatalogState::default());
    (CatalogWriter { tx }, CatalogReader { rx })
}

/// The only way to change the catalog.  Deliberately not `Clone`.
pub struct CatalogWriter {
    tx: watch::Sender<CatalogState>,
}

impl CatalogWriter {
    /// Replace the track list wholesale.  A failed fetch publishes an empty
    /// list with the error attached; loading ends either way.
    pub fn publish(&self, result: Result<Vec<TrackDescriptor>, CatalogError>) {
        let next = match result {
            Ok(tracks) => CatalogState {
                tracks,
                loading: false,
                error: None,
            },
            Err(e) => CatalogState {
                tracks: Vec::new(),
                loading: false,
                error: Some(e.to_string()),
            },
        };
        self.tx.send_replace(next);
    }
}

#[derive(Clone)]
pub struct CatalogReader {
    rx: watch::Receiver<CatalogState>,
}

impl CatalogReader {
    /// Current catalog, marked as seen.
    pub fn snapshot_and_mark_seen(&mut self) -> CatalogState {
        self.rx.borrow_and_update().clone()
    }

    pub fn track(&self, index: usize) -> Option<TrackDescriptor> {
        self.rx.borrow().tracks.get(index).cloned()
    }

    pub fn find_url(&self, url: &str) -> Option<TrackDescriptor> {
        self.rx.borrow().tracks.iter().find(|t| t.url == url).cloned()
    }

    /// Wait for the next publish.  Errors once the writer is gone and every
    /// value has been seen.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

/// Fetch the catalog once for this session and publish the outcome.
pub fn spawn_fetch(
    lister: Box<dyn TrackLister>,
    writer: CatalogWriter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("catalog: fetching track list");
        let result = lister.list_tracks().await;
        match &result {
            Ok(tracks) => info!("catalog: {} tracks", tracks.len()),
            Err(e) => warn!("catalog: fetch failed: {}", e),
        }
        writer.publish(result);
    })
}
