//! Speaker
//!
//! The public face of the engine: parses sentences, loads their clips,
//! and either plays them live or renders them to a WAV export, reporting
//! progress through status events.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::SpeakerConfig;
use crate::engine::buffer::PcmBuffer;
use crate::engine::cache::{LoadReport, Lookup, SoundCache};
use crate::engine::io::{encode_wav, suggested_filename};
use crate::engine::scheduler::{
    render_offline, wait_for_end, LiveRun, PlaybackEnd, Schedule, ScheduledWord,
};
use crate::engine::sink::OutputSink;
use crate::engine::source::{FsSource, SoundSource};
use crate::engine::transport::{EngineEvent, EngineStatus, StatusMachine, SubscriptionId};
use crate::error::{Result, VoxError};
use crate::sentence::{tokenize, Modifier, SegmentKind, SentenceParser, WordToken};

// ============================================================================
// Results
// ============================================================================

/// Handle to a live playback started by [`Speaker::speak`]
#[derive(Debug)]
pub struct Playback {
    end: watch::Receiver<Option<PlaybackEnd>>,
    word_count: usize,
    duration_secs: f64,
    warnings: Vec<VoxError>,
}

impl Playback {
    /// Wait until playback completes or is stopped
    pub async fn finished(&self) -> PlaybackEnd {
        wait_for_end(self.end.clone()).await
    }

    /// Number of words being played
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Scheduled length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Per-word problems; the affected words were skipped
    pub fn warnings(&self) -> &[VoxError] {
        &self.warnings
    }
}

/// An offline render of a sentence
#[derive(Debug)]
pub struct Recording {
    /// Mono audio at the configured export sample rate
    pub buffer: PcmBuffer,
    pub warnings: Vec<VoxError>,
}

/// A rendered sentence encoded for download
#[derive(Debug)]
pub struct Export {
    /// 16-bit PCM WAV file
    pub bytes: Vec<u8>,
    /// Timestamped name, e.g. `sentences recording 2024-05-01_12-30-00.wav`
    pub filename: String,
    pub warnings: Vec<VoxError>,
}

// ============================================================================
// Speaker
// ============================================================================

/// Speaks line-notation sentences
///
/// Cheap to clone; clones share the cache, the output and the status.
///
/// # Example
/// ```no_run
/// # async fn demo() -> voxline::error::Result<()> {
/// use std::sync::Arc;
/// use voxline::config::SpeakerConfig;
/// use voxline::engine::{NullSink, Speaker};
///
/// let speaker = Speaker::from_config(SpeakerConfig::default(), Arc::new(NullSink::new(44100)));
/// let playback = speaker.speak("hello, . world(v50)").await?;
/// playback.finished().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Speaker {
    inner: Arc<Inner>,
}

struct Inner {
    cache: SoundCache,
    sink: Arc<dyn OutputSink>,
    status: StatusMachine,
    parser: SentenceParser,
    live: Mutex<Option<(u64, LiveRun)>>,
    generation: AtomicU64,
    volume: AtomicU32,
    export_sample_rate: u32,
    filename_prefix: String,
}

impl Speaker {
    /// Create a speaker reading clips through `source` and playing into `sink`
    pub fn new(
        config: SpeakerConfig,
        source: Arc<dyn SoundSource>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let inner = Inner {
            cache: SoundCache::new(source, config.sound_paths),
            sink,
            status: StatusMachine::new(),
            parser: SentenceParser::new().with_default_path(config.default_path),
            live: Mutex::new(None),
            generation: AtomicU64::new(0),
            volume: AtomicU32::new(config.volume.min(100)),
            export_sample_rate: config.export_sample_rate,
            filename_prefix: config.filename_prefix,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a speaker reading clips from `config.sound_root`
    pub fn from_config(config: SpeakerConfig, sink: Arc<dyn OutputSink>) -> Self {
        let source = Arc::new(FsSource::new(config.sound_root.clone()));
        Self::new(config, source, sink)
    }

    // ========================================================================
    // Sentences
    // ========================================================================

    /// Parse a sentence with this speaker's default path
    pub fn parse(&self, sentence: &str) -> Vec<WordToken> {
        self.inner.parser.parse(sentence)
    }

    /// Play a sentence live
    ///
    /// Stops whatever is playing first. Words whose clips cannot be loaded
    /// are skipped and listed in [`Playback::warnings`].
    ///
    /// # Errors
    /// * `NothingToPlay` - If the sentence contains no words
    /// * `MissingSounds` - If no word of the sentence could be loaded
    pub async fn speak(&self, sentence: &str) -> Result<Playback> {
        self.stop();
        let (words, warnings) = self.parse_with_warnings(sentence);
        info!("speak: {:?} ({} word(s))", sentence, words.len());
        self.play_words(words, warnings).await
    }

    /// Play a single clip unmodified
    pub async fn play_sound(&self, key: &str) -> Result<Playback> {
        self.stop();
        info!("play sound: {}", key);
        self.play_words(vec![WordToken::new(key, Modifier::DEFAULT)], Vec::new())
            .await
    }

    /// Render a sentence offline at the export sample rate
    ///
    /// # Errors
    /// Same as [`Speaker::speak`].
    pub async fn record(&self, sentence: &str) -> Result<Recording> {
        let (words, warnings) = self.parse_with_warnings(sentence);
        info!("record: {:?} ({} word(s))", sentence, words.len());

        let (schedule, warnings) = self.prepare(words, warnings).await?;
        self.inner.status.transition(EngineStatus::Rendering);
        let buffer = render_offline(schedule.into_nodes(), self.inner.export_sample_rate).await;
        self.inner.status.transition(EngineStatus::Ready);

        info!(
            "rendered {:.3}s at {} Hz",
            buffer.duration_secs(),
            buffer.sample_rate
        );
        Ok(Recording { buffer, warnings })
    }

    /// Render a sentence and encode it as a WAV file
    pub async fn record_and_export(&self, sentence: &str) -> Result<Export> {
        let recording = self.record(sentence).await?;
        Ok(Export {
            bytes: encode_wav(&recording.buffer),
            filename: suggested_filename(&self.inner.filename_prefix, Utc::now()),
            warnings: recording.warnings,
        })
    }

    /// Load every clip a sentence references without playing it
    pub async fn preload(&self, sentence: &str) -> LoadReport {
        let words = self.parse(sentence);
        self.inner
            .cache
            .load_all(words.iter().map(|w| w.sound_key.as_str()))
            .await
    }

    /// Stop live playback immediately
    ///
    /// Returns `true` if something was playing. Calling it again, or after
    /// playback ended on its own, does nothing.
    pub fn stop(&self) -> bool {
        let run = self.inner.live.lock().take();
        let Some((_, run)) = run else {
            return false;
        };

        let cancelled = run.stop();
        if cancelled {
            info!("playback stopped");
        }
        self.inner
            .status
            .transition_from(EngineStatus::Playing, EngineStatus::Ready);
        cancelled
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Master volume, 0-100
    pub fn volume(&self) -> u32 {
        self.inner.volume.load(Ordering::SeqCst)
    }

    /// Set the master volume for subsequent playback
    ///
    /// Values above 100 are clamped. Emits `VolumeChanged` when the value
    /// changes.
    pub fn set_volume(&self, volume: u32) {
        let volume = volume.min(100);
        if self.inner.volume.swap(volume, Ordering::SeqCst) != volume {
            self.inner
                .status
                .emit(&EngineEvent::VolumeChanged { volume });
        }
    }

    pub fn search_paths(&self) -> Vec<String> {
        self.inner.cache.search_paths()
    }

    /// Change where clips are looked up; cached clips stay cached
    pub fn set_search_paths(&self, paths: Vec<String>) {
        self.inner.cache.set_search_paths(paths);
    }

    /// Forget every loaded clip and variant
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache(&self) -> &SoundCache {
        &self.inner.cache
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        self.inner.status.status()
    }

    /// Receive every status change and volume change
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.status.unsubscribe(id)
    }

    /// Stop playback and detach all observers
    pub fn shutdown(&self) {
        self.stop();
        self.inner.status.dispose();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn parse_with_warnings(&self, sentence: &str) -> (Vec<WordToken>, Vec<VoxError>) {
        let segments = tokenize(sentence);
        let warnings = segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Unmatched)
            .map(|s| VoxError::ParseAmbiguous {
                start: s.range.start,
                end: s.range.end,
                text: sentence[s.range.clone()].to_string(),
            })
            .collect();
        (self.inner.parser.resolve(&segments), warnings)
    }

    async fn play_words(
        &self,
        words: Vec<WordToken>,
        warnings: Vec<VoxError>,
    ) -> Result<Playback> {
        let (schedule, warnings) = self.prepare(words, warnings).await?;
        let word_count = schedule.nodes().len();
        let duration_secs = schedule.total_duration();
        let gain = self.volume() as f32 / 100.0;

        // A run stored while this request was loading is stopped before the
        // new one starts, under the same lock, so only one run can play
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let end = {
            let mut live = self.inner.live.lock();
            if let Some((_, previous)) = live.take() {
                if previous.stop() {
                    debug!("superseded an overlapping playback");
                }
            }
            let run = LiveRun::start(schedule, self.inner.sink.clone(), gain);
            let end = run.end_signal();
            *live = Some((generation, run));
            end
        };
        self.inner.status.transition(EngineStatus::Playing);

        let inner = self.inner.clone();
        let on_end = end.clone();
        tokio::spawn(async move {
            if wait_for_end(on_end).await == PlaybackEnd::Completed {
                inner.finish_live(generation);
            }
        });

        Ok(Playback {
            end,
            word_count,
            duration_secs,
            warnings,
        })
    }

    /// Load clips and lay out the words that can be played
    async fn prepare(
        &self,
        words: Vec<WordToken>,
        mut warnings: Vec<VoxError>,
    ) -> Result<(Schedule, Vec<VoxError>)> {
        if words.is_empty() {
            return Err(VoxError::NothingToPlay);
        }

        let status = &self.inner.status;
        status.transition(EngineStatus::Loading);

        let report = self
            .inner
            .cache
            .load_all(words.iter().map(|w| w.sound_key.as_str()))
            .await;
        let missing = report.missing_keys();
        for failure in &report.failures {
            warn!("{}", failure);
        }
        warnings.extend(report.failures);

        let scheduled: Vec<ScheduledWord> = words
            .into_iter()
            .enumerate()
            .filter_map(|(index, word)| {
                match self.inner.cache.variant(&word.sound_key, &word.modifier) {
                    Lookup::Hit(buffer) => Some(ScheduledWord {
                        index,
                        key: word.sound_key,
                        buffer,
                        modifier: word.modifier,
                    }),
                    Lookup::Miss => None,
                }
            })
            .collect();

        if scheduled.is_empty() {
            let err = VoxError::MissingSounds { keys: missing };
            status.fail(err.to_string());
            return Err(err);
        }

        let mut schedule = Schedule::build(scheduled);
        warnings.extend(schedule.take_rejected());
        status.transition(EngineStatus::Loaded);
        Ok((schedule, warnings))
    }
}

impl Inner {
    /// Natural end of the live run tagged `generation`
    fn finish_live(&self, generation: u64) {
        let finished = {
            let mut live = self.live.lock();
            match live.as_ref() {
                Some((current, _)) if *current == generation => live.take().is_some(),
                _ => false,
            }
        };
        if finished {
            self.status
                .transition_from(EngineStatus::Playing, EngineStatus::Ready);
        }
    }
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker")
            .field("status", &self.status())
            .field("volume", &self.volume())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sink::MemorySink;
    use crate::engine::source::MemorySource;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::sleep;

    struct Fixture {
        speaker: Speaker,
        source: Arc<MemorySource>,
        sink: Arc<MemorySink>,
        events: Arc<Mutex<Vec<EngineEvent>>>,
    }

    /// Let spawned end-of-playback handlers run
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    /// Clips of `frames` samples at 8 kHz under `valve_sound/`
    fn fixture(clips: &[(&str, usize)]) -> Fixture {
        let source = Arc::new(MemorySource::new());
        for (key, frames) in clips {
            let bytes = encode_wav(&PcmBuffer::mono(vec![0.5; *frames], 8000));
            source.insert(format!("valve_sound/{}.wav", key), bytes);
        }
        let sink = Arc::new(MemorySink::new(8000));
        let speaker = Speaker::new(SpeakerConfig::default(), source.clone(), sink.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        speaker.subscribe(move |event| recorded.lock().push(event.clone()));

        Fixture {
            speaker,
            source,
            sink,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_plays_words_in_order() {
        let f = fixture(&[("vox/hello", 8000), ("vox/_comma", 800), ("vox/world", 4000)]);

        let playback = f.speaker.speak("hello, world").await.unwrap();
        assert_eq!(playback.word_count(), 3);
        assert!((playback.duration_secs() - 1.6).abs() < 1e-9);
        assert_eq!(f.speaker.status(), EngineStatus::Playing);

        assert_eq!(playback.finished().await, PlaybackEnd::Completed);
        settle().await;

        let lengths: Vec<usize> = f.sink.writes().iter().map(|w| w.samples.len()).collect();
        assert_eq!(lengths, vec![8000, 800, 4000]);
        assert_eq!(f.speaker.status(), EngineStatus::Ready);
        assert_eq!(
            *f.events.lock(),
            vec![
                EngineEvent::Loading,
                EngineEvent::Loaded,
                EngineEvent::PlayingStart,
                EngineEvent::PlayingEnd,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_words_become_warnings() {
        let f = fixture(&[("vox/hello", 800)]);

        let playback = f.speaker.speak("hello zzz").await.unwrap();
        assert_eq!(playback.word_count(), 1);
        assert_eq!(playback.warnings().len(), 1);
        assert_eq!(playback.warnings()[0].sound_key(), Some("vox/zzz"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_missing_fails_with_summary() {
        let f = fixture(&[]);

        let err = f.speaker.speak("zzz yyy").await.unwrap_err();
        assert_eq!(err.to_string(), "Couldn't load sounds: vox/zzz, vox/yyy");
        assert_eq!(f.speaker.status(), EngineStatus::Error);
        assert_eq!(
            f.events.lock().last(),
            Some(&EngineEvent::Error {
                message: "Couldn't load sounds: vox/zzz, vox/yyy".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sentence_is_nothing_to_play() {
        let f = fixture(&[]);
        assert!(matches!(
            f.speaker.speak("vox/ fvox/").await,
            Err(VoxError::NothingToPlay)
        ));
        assert!(f.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_is_noop() {
        let f = fixture(&[("vox/hello", 8000)]);
        let playback = f.speaker.speak("hello hello").await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(f.speaker.stop());
        assert!(!f.speaker.stop());
        assert_eq!(playback.finished().await, PlaybackEnd::Cancelled);

        assert_eq!(f.speaker.status(), EngineStatus::Ready);
        let ends = f
            .events
            .lock()
            .iter()
            .filter(|e| **e == EngineEvent::PlayingEnd)
            .count();
        assert_eq!(ends, 1);
        assert_eq!(f.sink.gain(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_end_is_noop() {
        let f = fixture(&[("vox/hello", 800)]);
        let playback = f.speaker.speak("hello").await.unwrap();
        playback.finished().await;
        settle().await;

        assert!(!f.speaker.stop());
        assert!(!f.speaker.stop());
        assert_eq!(f.sink.halt_count(), 0);
        assert_eq!(f.speaker.status(), EngineStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_interrupts_previous_playback() {
        let f = fixture(&[("vox/hello", 8000), ("vox/world", 800)]);
        let first = f.speaker.speak("hello").await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let second = f.speaker.speak("world").await.unwrap();
        assert_eq!(first.finished().await, PlaybackEnd::Cancelled);
        assert_eq!(second.finished().await, PlaybackEnd::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_speak_keeps_one_stoppable_run() {
        let f = fixture(&[("vox/hello", 8000), ("vox/world", 8000)]);
        let (first, second) = tokio::join!(
            f.speaker.speak("hello hello hello hello"),
            f.speaker.speak("world world")
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        sleep(Duration::from_millis(100)).await;
        assert!(f.speaker.stop());
        let writes_at_stop = f.sink.writes().len();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(f.sink.writes().len(), writes_at_stop);
        assert_eq!(first.finished().await, PlaybackEnd::Cancelled);
        assert_eq!(second.finished().await, PlaybackEnd::Cancelled);
        assert_eq!(f.speaker.status(), EngineStatus::Ready);
        assert_eq!(f.sink.gain(), 1.0);
    }

    #[tokio::test]
    async fn test_record_and_export() {
        let f = fixture(&[("vox/hello", 800), ("vox/world", 800)]);

        let export = f.speaker.record_and_export("hello world(p50)").await.unwrap();
        // 0.1s + 0.2s at 22050 Hz
        assert_eq!(export.bytes.len(), 44 + (2205 + 4410) * 2);
        assert!(export.filename.starts_with("sentences recording "));
        assert!(export.filename.ends_with(".wav"));
        assert!(export.warnings.is_empty());

        assert_eq!(
            *f.events.lock(),
            vec![
                EngineEvent::Loading,
                EngineEvent::Loaded,
                EngineEvent::RenderingStart,
                EngineEvent::RenderingEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_loads_are_cached_across_requests() {
        let f = fixture(&[("vox/hello", 800)]);
        f.speaker.record("hello hello").await.unwrap();
        f.speaker.record("hello").await.unwrap();
        assert_eq!(f.source.fetch_count(), 1);

        f.speaker.clear_cache();
        f.speaker.record("hello").await.unwrap();
        assert_eq!(f.source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_input_is_reported() {
        let f = fixture(&[("vox/hello", 800)]);
        let recording = f.speaker.record("hello ###").await.unwrap();
        assert_eq!(recording.warnings.len(), 1);
        assert_eq!(recording.warnings[0].error_code(), "PARSE_AMBIGUOUS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_scales_playback_and_emits() {
        let f = fixture(&[("vox/hello", 80)]);
        f.speaker.set_volume(50);
        f.speaker.set_volume(50);
        f.speaker.set_volume(500);

        assert_eq!(f.speaker.volume(), 100);
        assert_eq!(
            *f.events.lock(),
            vec![
                EngineEvent::VolumeChanged { volume: 50 },
                EngineEvent::VolumeChanged { volume: 100 },
            ]
        );

        f.speaker.set_volume(20);
        f.speaker.speak("hello").await.unwrap().finished().await;
        // 16-bit clip data, so only close to 0.5 * 0.2
        assert!(f.sink.samples().iter().all(|s| (s - 0.1).abs() < 1e-3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_sound_previews_one_clip() {
        let f = fixture(&[("fvox/beep", 400)]);
        let playback = f.speaker.play_sound("fvox/beep").await.unwrap();
        assert_eq!(playback.word_count(), 1);
        playback.finished().await;
        assert_eq!(f.sink.samples().len(), 400);
    }

    #[tokio::test]
    async fn test_preload_reports_missing() {
        let f = fixture(&[("vox/hello", 80)]);
        let report = f.speaker.preload("hello nope").await;
        assert_eq!(report.loaded, vec!["vox/hello"]);
        assert_eq!(report.missing_keys(), vec!["vox/nope"]);
        assert!(f.speaker.cache().contains("vox/hello"));
        assert!(f.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_search_paths_can_change() {
        let f = fixture(&[]);
        f.source.insert(
            "mod/vox/hello.wav",
            encode_wav(&PcmBuffer::mono(vec![0.1; 80], 8000)),
        );
        assert!(f.speaker.record("hello").await.is_err());

        f.speaker
            .set_search_paths(vec!["mod/".to_string(), "valve_sound/".to_string()]);
        assert_eq!(f.speaker.search_paths()[0], "mod/");
        assert!(f.speaker.record("hello").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_silences_observers() {
        let f = fixture(&[("vox/hello", 8000)]);
        f.speaker.speak("hello").await.unwrap();
        let before = f.events.lock().len();

        f.speaker.shutdown();
        f.speaker.set_volume(10);
        assert_eq!(f.events.lock().len(), before);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let f = fixture(&[]);
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let id = f.speaker.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        f.speaker.set_volume(10);
        assert!(f.speaker.unsubscribe(id));
        f.speaker.set_volume(20);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
