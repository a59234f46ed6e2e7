//! Sound sources
//!
//! A source resolves a location string (`<search path><sound key>.wav`) to
//! file bytes. `Ok(None)` means "not here, try the next search path".

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use log::debug;
use parking_lot::RwLock;

use crate::error::{Result, VoxError};

/// Retrieves clip files by location
pub trait SoundSource: Send + Sync {
    /// Fetch the bytes stored at `location`
    ///
    /// Returns `Ok(None)` when nothing exists at that location.
    fn fetch<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;
}

/// Reads clips from a directory tree
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    /// Resolve locations relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> PathBuf {
        self.root.join(location.trim_start_matches('/'))
    }
}

impl SoundSource for FsSource {
    fn fetch<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let path = self.resolve(location);
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("no clip at {}", path.display());
                    Ok(None)
                }
                Err(e) => Err(VoxError::Fetch {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                }),
            }
        })
    }
}

/// In-memory clip store keyed by exact location
///
/// Useful for embedding bundled clips and for tests. Counts every fetch.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` at `location` (e.g. `"valve_sound/vox/hello.wav"`)
    pub fn insert(&self, location: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(location.into(), bytes);
    }

    /// Number of fetch calls served so far, hits and misses alike
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SoundSource for MemorySource {
    fn fetch<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // behave like real I/O and give other loads a chance to run
            tokio::task::yield_now().await;
            Ok(self.files.read().get(location).cloned())
        })
    }
}

/// Fetches clips over HTTP(S) relative to a base URL
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    /// Resolve locations against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "http")]
impl SoundSource for HttpSource {
    fn fetch<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, location.trim_start_matches('/'));
            let fetch_err = |e: reqwest::Error| VoxError::Fetch {
                location: url.clone(),
                reason: e.to_string(),
            };

            let response = self.client.get(&url).send().await.map_err(fetch_err)?;
            if !response.status().is_success() {
                debug!("{} answered {}", url, response.status());
                return Ok(None);
            }

            let bytes = response.bytes().await.map_err(fetch_err)?;
            Ok(Some(bytes.to_vec()))
        })
    }
}
