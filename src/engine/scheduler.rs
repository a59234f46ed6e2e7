//! Playback Scheduler
//!
//! Turns loaded buffer variants into back-to-back playback nodes and plays
//! them either live (timed writes into an [`OutputSink`]) or offline
//! (concatenated into one buffer for export). Both modes share
//! [`PlaybackNode::render`], so they produce identical audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::engine::buffer::PcmBuffer;
use crate::engine::sink::OutputSink;
use crate::error::{Result, VoxError};
use crate::sentence::Modifier;

// ============================================================================
// Playback Node
// ============================================================================

/// One word, ready to play
#[derive(Debug, Clone)]
pub struct PlaybackNode {
    /// Position of the word in its sentence
    pub index: usize,
    /// Sound key the buffer came from
    pub key: String,
    pub buffer: Arc<PcmBuffer>,
    /// Speed multiplier; shifts pitch and duration together
    pub playback_rate: f64,
    /// Linear gain
    pub gain_level: f32,
    /// When the node starts, relative to the first node
    pub start_offset_secs: f64,
}

impl PlaybackNode {
    /// Build a node for `buffer` played with `modifier`'s pitch and volume
    pub fn build(
        index: usize,
        key: impl Into<String>,
        buffer: Arc<PcmBuffer>,
        modifier: &Modifier,
        start_offset_secs: f64,
    ) -> Self {
        Self {
            index,
            key: key.into(),
            buffer,
            playback_rate: modifier.playback_rate(),
            gain_level: modifier.gain_level(),
            start_offset_secs,
        }
    }

    /// Whether the node would ever finish playing
    pub fn has_playable_rate(&self) -> bool {
        self.playback_rate.is_finite() && self.playback_rate > 0.0
    }

    /// Wall-clock duration at the node's playback rate
    pub fn duration_secs(&self) -> f64 {
        if !self.has_playable_rate() {
            return 0.0;
        }
        self.buffer.duration_secs() / self.playback_rate
    }

    /// When the node stops, relative to the first node
    pub fn end_offset_secs(&self) -> f64 {
        self.start_offset_secs + self.duration_secs()
    }

    /// Render to mono samples at `target_rate`
    ///
    /// Produces `ceil(duration / rate * target_rate)` samples, reading the
    /// buffer at the playback rate with linear interpolation and scaling by
    /// the node gain.
    ///
    /// # Errors
    /// * `RenderFailure` - If the playback rate or target rate is unusable
    pub fn render(&self, target_rate: u32) -> Result<Vec<f32>> {
        if !self.has_playable_rate() {
            return Err(self.failure(format!(
                "playback rate {} is not positive",
                self.playback_rate
            )));
        }
        if target_rate == 0 || self.buffer.sample_rate == 0 {
            return Err(self.failure("sample rate is zero".to_string()));
        }

        let out_len = (self.duration_secs() * target_rate as f64).ceil() as usize;
        let step = self.playback_rate * self.buffer.sample_rate as f64 / target_rate as f64;

        Ok((0..out_len)
            .map(|i| self.buffer.read_mono_interpolated(i as f64 * step) * self.gain_level)
            .collect())
    }

    fn failure(&self, reason: String) -> VoxError {
        VoxError::RenderFailure {
            index: self.index,
            key: self.key.clone(),
            reason,
        }
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Input to [`Schedule::build`]: one loaded word
#[derive(Debug, Clone)]
pub struct ScheduledWord {
    pub index: usize,
    pub key: String,
    pub buffer: Arc<PcmBuffer>,
    pub modifier: Modifier,
}

/// Nodes laid end to end in word order
#[derive(Debug, Default)]
pub struct Schedule {
    nodes: Vec<PlaybackNode>,
    rejected: Vec<VoxError>,
}

impl Schedule {
    /// Place each word right after the previous one
    ///
    /// `offset_i` is the sum of `duration_j / rate_j` for all earlier words.
    /// Words whose playback rate is not finite and positive would never end;
    /// they are left out and reported through [`Schedule::rejected`].
    pub fn build(words: impl IntoIterator<Item = ScheduledWord>) -> Self {
        let mut schedule = Schedule::default();
        let mut offset = 0.0;

        for word in words {
            let node = PlaybackNode::build(word.index, word.key, word.buffer, &word.modifier, offset);
            if !node.has_playable_rate() {
                warn!("skipping {}: pitch {}", node.key, word.modifier.pitch);
                schedule.rejected.push(node.failure(format!(
                    "playback rate {} is not positive",
                    node.playback_rate
                )));
                continue;
            }
            offset = node.end_offset_secs();
            schedule.nodes.push(node);
        }

        schedule
    }

    pub fn nodes(&self) -> &[PlaybackNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<PlaybackNode> {
        self.nodes
    }

    /// Words left out of the schedule
    pub fn rejected(&self) -> &[VoxError] {
        &self.rejected
    }

    pub fn take_rejected(&mut self) -> Vec<VoxError> {
        std::mem::take(&mut self.rejected)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Seconds from the first node's start to the last node's end
    pub fn total_duration(&self) -> f64 {
        self.nodes.last().map(|n| n.end_offset_secs()).unwrap_or(0.0)
    }
}

/// Slack past the schedule's end before the backup timer cuts a run off
pub const BACKUP_GRACE: Duration = Duration::from_millis(250);

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

// ============================================================================
// Live Playback
// ============================================================================

/// How a live run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The last word finished
    Completed,
    /// `stop()` was called first
    Cancelled,
}

/// A live playback in progress
///
/// Dropping the handle does not stop playback; call [`LiveRun::stop`].
pub struct LiveRun {
    sink: Arc<dyn OutputSink>,
    end_tx: Arc<watch::Sender<Option<PlaybackEnd>>>,
    end_rx: watch::Receiver<Option<PlaybackEnd>>,
    /// Write gate; writes happen only while it holds `true`
    gate: Arc<Mutex<bool>>,
    stopped: AtomicBool,
    task: JoinHandle<()>,
    total_duration: f64,
}

impl LiveRun {
    /// Start playing `schedule` into `sink`
    ///
    /// Must be called within a tokio runtime. Each node is rendered at the
    /// sink's sample rate on a blocking task, then written when its offset
    /// comes due, scaled by `master_gain`. The run ends when the last node
    /// has finished, with a backup timer of the schedule's total duration
    /// plus [`BACKUP_GRACE`].
    pub fn start(schedule: Schedule, sink: Arc<dyn OutputSink>, master_gain: f32) -> Self {
        let (end_tx, end_rx) = watch::channel(None);
        let end_tx = Arc::new(end_tx);
        let gate = Arc::new(Mutex::new(true));
        let total_duration = schedule.total_duration();
        let nodes = schedule.into_nodes();
        let origin = Instant::now();

        debug!(
            "live run: {} node(s), {:.3}s",
            nodes.len(),
            total_duration
        );

        let task = tokio::spawn({
            let sink = sink.clone();
            let end_tx = end_tx.clone();
            let gate = gate.clone();
            async move {
                let target_rate = sink.sample_rate();
                let last_end = nodes.last().map(|n| n.end_offset_secs());

                let playback = async {
                    for node in nodes {
                        let due = origin + secs(node.start_offset_secs);
                        let Some(samples) = render_live(node, target_rate, master_gain).await else {
                            continue;
                        };
                        sleep_until(due).await;

                        // stop() closes the gate under this lock, so no write
                        // can land once it has returned
                        let open = gate.lock();
                        if !*open {
                            return;
                        }
                        if let Err(e) = sink.write(&samples) {
                            warn!("{}", e);
                        }
                        drop(open);
                    }
                    if let Some(last_end) = last_end {
                        sleep_until(origin + secs(last_end)).await;
                    }
                };

                tokio::select! {
                    biased;
                    _ = playback => {}
                    _ = sleep_until(origin + secs(total_duration) + BACKUP_GRACE) => {
                        debug!("live run ended by backup timer")
                    }
                }

                end_tx.send_if_modified(|end| settle(end, PlaybackEnd::Completed));
            }
        });

        Self {
            sink,
            end_tx,
            end_rx,
            gate,
            stopped: AtomicBool::new(false),
            task,
            total_duration,
        }
    }

    /// Stop playback immediately
    ///
    /// Closes the write gate, mutes and halts the sink, then restores the
    /// sink gain to 1. A write already in progress finishes before the halt,
    /// and nothing is written afterwards. Returns `true` if this call
    /// cancelled a run still in progress; repeated calls and calls after
    /// natural completion change nothing.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.end_rx.borrow().is_some() {
            return false;
        }

        *self.gate.lock() = false;
        self.sink.set_gain(0.0);
        self.sink.halt();
        self.task.abort();
        self.sink.set_gain(1.0);

        self.end_tx
            .send_if_modified(|end| settle(end, PlaybackEnd::Cancelled))
    }

    /// How the run ended, or `None` while it is still playing
    pub fn outcome(&self) -> Option<PlaybackEnd> {
        *self.end_rx.borrow()
    }

    /// Receiver that observes the end of the run
    pub fn end_signal(&self) -> watch::Receiver<Option<PlaybackEnd>> {
        self.end_rx.clone()
    }

    /// Wait until the run completes or is cancelled
    pub async fn finished(&self) -> PlaybackEnd {
        wait_for_end(self.end_signal()).await
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }
}

impl std::fmt::Debug for LiveRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRun")
            .field("outcome", &self.outcome())
            .field("total_duration", &self.total_duration)
            .finish()
    }
}

/// Wait on an end signal from [`LiveRun::end_signal`]
pub async fn wait_for_end(mut end: watch::Receiver<Option<PlaybackEnd>>) -> PlaybackEnd {
    match end.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).unwrap_or(PlaybackEnd::Cancelled),
        Err(_) => PlaybackEnd::Cancelled,
    }
}

/// Render one node off the async workers, scaled by the master gain
async fn render_live(node: PlaybackNode, target_rate: u32, master_gain: f32) -> Option<Vec<f32>> {
    let rendered = tokio::task::spawn_blocking(move || node.render(target_rate)).await;
    match rendered {
        Ok(Ok(mut samples)) => {
            if master_gain != 1.0 {
                samples.iter_mut().for_each(|s| *s *= master_gain);
            }
            Some(samples)
        }
        Ok(Err(e)) => {
            warn!("{}", e);
            None
        }
        Err(e) => {
            warn!("render task failed: {}", e);
            None
        }
    }
}

fn settle(end: &mut Option<PlaybackEnd>, outcome: PlaybackEnd) -> bool {
    if end.is_some() {
        return false;
    }
    *end = Some(outcome);
    true
}

// ============================================================================
// Offline Render
// ============================================================================

/// Render nodes concurrently and concatenate them in word order
///
/// Each node renders on a blocking task. A node that fails (or whose task
/// panics) contributes no samples and is logged. The result is one mono
/// buffer at `target_rate`.
pub async fn render_offline(nodes: Vec<PlaybackNode>, target_rate: u32) -> PcmBuffer {
    let renders = join_all(nodes.into_iter().map(|node| {
        tokio::task::spawn_blocking(move || {
            let rendered = node.render(target_rate);
            (node.index, node.key, rendered)
        })
    }))
    .await;

    let mut samples = Vec::new();
    for render in renders {
        match render {
            Ok((_, _, Ok(rendered))) => samples.extend_from_slice(&rendered),
            Ok((index, key, Err(e))) => warn!("word {} ({}) rendered silent: {}", index, key, e),
            Err(e) => warn!("render task failed: {}", e),
        }
    }

    PcmBuffer::mono(samples, target_rate)
}

// ============================================================================
// Tests
// ============================================================================
