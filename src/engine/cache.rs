//! Sound Cache
//!
//! Owns every decoded clip and every derived buffer variant. Clips are
//! loaded at most once per key (concurrent requests share one fetch) and
//! variants are memoized per clip until the cache is cleared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;

use crate::engine::buffer::PcmBuffer;
use crate::engine::io::decode_wav;
use crate::engine::source::SoundSource;
use crate::error::{Result, VoxError};
use crate::sentence::Modifier;

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Convert into an `Option`, dropping the distinction
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
        }
    }
}

// ============================================================================
// Sound Clip
// ============================================================================

/// A decoded clip with its memoized variants
#[derive(Debug)]
pub struct SoundClip {
    key: String,
    base: Arc<PcmBuffer>,
    variants: Mutex<HashMap<String, Arc<PcmBuffer>>>,
}

impl SoundClip {
    /// Wrap a decoded buffer; it becomes the variant for the empty key
    pub fn new(key: impl Into<String>, buffer: PcmBuffer) -> Self {
        let base = Arc::new(buffer);
        let mut variants = HashMap::new();
        variants.insert(String::new(), base.clone());
        Self {
            key: key.into(),
            base,
            variants: Mutex::new(variants),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The unmodified clip
    pub fn base(&self) -> &Arc<PcmBuffer> {
        &self.base
    }

    /// The memoized variant for `modifier`, without computing it
    pub fn cached_variant(&self, modifier: &Modifier) -> Lookup<Arc<PcmBuffer>> {
        match self.variants.lock().get(&modifier.variant_key()) {
            Some(buffer) => Lookup::Hit(buffer.clone()),
            None => Lookup::Miss,
        }
    }

    /// The variant for `modifier`, derived and memoized on first use
    pub fn variant(&self, modifier: &Modifier) -> Arc<PcmBuffer> {
        let key = modifier.variant_key();
        if let Some(buffer) = self.variants.lock().get(&key) {
            return buffer.clone();
        }

        let derived = Arc::new(self.base.derive_variant(modifier));
        debug!(
            "derived {} [{}]: {} -> {} frames",
            self.key,
            key,
            self.base.len(),
            derived.len()
        );

        // another caller may have won the race; keep whichever landed first
        self.variants.lock().entry(key).or_insert(derived).clone()
    }

    /// Number of memoized variants, including the base
    pub fn variant_count(&self) -> usize {
        self.variants.lock().len()
    }
}

// ============================================================================
// Load Report
// ============================================================================

/// Result of loading a batch of keys
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Keys that are now cached
    pub loaded: Vec<String>,
    /// One error per key that could not be loaded
    pub failures: Vec<VoxError>,
}

impl LoadReport {
    /// Keys that failed to load, in request order
    pub fn missing_keys(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter_map(|e| e.sound_key().map(str::to_string))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Sound Cache
// ============================================================================

/// Shared cache of clips and variants
pub struct SoundCache {
    source: Arc<dyn SoundSource>,
    search_paths: RwLock<Vec<String>>,
    clips: Mutex<HashMap<String, Arc<OnceCell<Arc<SoundClip>>>>>,
}

impl SoundCache {
    /// Create a cache resolving clips through `source`
    ///
    /// # Arguments
    /// * `source` - Where clip files are fetched from
    /// * `search_paths` - Prefixes tried in order, e.g. `["valve_sound/"]`
    pub fn new(source: Arc<dyn SoundSource>, search_paths: Vec<String>) -> Self {
        Self {
            source,
            search_paths: RwLock::new(search_paths),
            clips: Mutex::new(HashMap::new()),
        }
    }

    pub fn search_paths(&self) -> Vec<String> {
        self.search_paths.read().clone()
    }

    /// Replace the search paths; already cached clips are kept
    pub fn set_search_paths(&self, paths: Vec<String>) {
        *self.search_paths.write() = paths;
    }

    /// Load a clip, fetching it only if it is not cached yet
    ///
    /// A failed load leaves nothing behind, so the next call fetches again.
    ///
    /// # Errors
    /// * `SoundNotFound` - If no search path has the clip
    /// * `DecodeFailure` - If the first file found is not valid audio
    pub async fn load(&self, key: &str) -> Result<Arc<SoundClip>> {
        let key = key.to_lowercase();
        let cell = self.clips.lock().entry(key.clone()).or_default().clone();

        let loaded = cell
            .get_or_try_init(|| self.fetch_clip(&key))
            .await
            .map(Arc::clone);

        if loaded.is_err() {
            let mut clips = self.clips.lock();
            let stale = clips
                .get(&key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &cell) && !entry.initialized());
            if stale {
                clips.remove(&key);
            }
        }
        loaded
    }

    /// Load many clips concurrently
    ///
    /// Duplicate keys are loaded once. A failing key never aborts the
    /// others; its error lands in the report.
    pub async fn load_all<'a, I>(&self, keys: I) -> LoadReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = keys.into_iter().filter(|k| seen.insert(*k)).collect();

        let results = join_all(unique.iter().map(|key| async move {
            (key.to_string(), self.load(key).await)
        }))
        .await;

        let mut report = LoadReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => report.loaded.push(key),
                Err(e) => report.failures.push(e),
            }
        }
        report
    }

    /// A cached clip, without loading
    pub fn lookup(&self, key: &str) -> Lookup<Arc<SoundClip>> {
        let clips = self.clips.lock();
        match clips.get(&key.to_lowercase()).and_then(|cell| cell.get()) {
            Some(clip) => Lookup::Hit(clip.clone()),
            None => Lookup::Miss,
        }
    }

    /// The buffer variant for a cached clip, derived on first use
    ///
    /// Misses only when the clip itself is not cached.
    pub fn variant(&self, key: &str, modifier: &Modifier) -> Lookup<Arc<PcmBuffer>> {
        match self.lookup(key) {
            Lookup::Hit(clip) => Lookup::Hit(clip.variant(modifier)),
            Lookup::Miss => Lookup::Miss,
        }
    }

    /// Whether a key is loaded
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_hit()
    }

    /// Number of loaded clips
    pub fn len(&self) -> usize {
        self.clips
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every clip and variant; later loads fetch again
    pub fn clear(&self) {
        let mut clips = self.clips.lock();
        debug!("clearing {} cached clip(s)", clips.len());
        clips.clear();
    }

    async fn fetch_clip(&self, key: &str) -> Result<Arc<SoundClip>> {
        let paths = self.search_paths();
        let mut tried = Vec::with_capacity(paths.len());

        for base in &paths {
            let location = format!("{}{}.wav", base, key);
            match self.source.fetch(&location).await {
                Ok(Some(bytes)) => {
                    let buffer = decode_wav(key, &bytes)?;
                    debug!(
                        "loaded {} from {} ({} frames @ {} Hz)",
                        key,
                        location,
                        buffer.len(),
                        buffer.sample_rate
                    );
                    return Ok(Arc::new(SoundClip::new(key, buffer)));
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
            tried.push(location);
        }

        warn!("couldn't load {}", key);
        Err(VoxError::SoundNotFound {
            key: key.to_string(),
            tried,
        })
    }
}

impl std::fmt::Debug for SoundCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundCache")
            .field("search_paths", &*self.search_paths.read())
            .field("clips", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
