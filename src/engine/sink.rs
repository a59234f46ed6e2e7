//! Output Sinks
//!
//! Where live playback writes rendered mono audio. The scheduler decides
//! *when* each word starts; a sink only has to play what it receives in
//! order, at its own sample rate.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Destination for live playback
pub trait OutputSink: Send + Sync {
    /// Sample rate the sink expects writes to be rendered at
    fn sample_rate(&self) -> u32;

    /// Queue mono samples for playback
    fn write(&self, samples: &[f32]) -> Result<()>;

    /// Drop everything queued and go silent
    fn halt(&self);

    /// Set the output gain applied to queued audio
    fn set_gain(&self, gain: f32);

    fn gain(&self) -> f32;
}

/// Gain stored as f32 bits so sinks stay lock-free on the hot path
#[derive(Debug)]
struct AtomicGain(AtomicU32);

impl AtomicGain {
    fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.to_bits()))
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }
}

// ============================================================================
// Null Sink
// ============================================================================

/// Discards all audio; live runs still keep their timing
#[derive(Debug)]
pub struct NullSink {
    sample_rate: u32,
    gain: AtomicGain,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            gain: AtomicGain::new(1.0),
        }
    }
}

impl OutputSink for NullSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    fn halt(&self) {}

    fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    fn gain(&self) -> f32 {
        self.gain.get()
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// One write received by a [`MemorySink`]
#[derive(Debug, Clone)]
pub struct SinkWrite {
    /// When the write arrived
    pub at: Instant,
    /// Samples with the sink gain applied
    pub samples: Vec<f32>,
}

/// Captures every write with its arrival time
#[derive(Debug)]
pub struct MemorySink {
    sample_rate: u32,
    gain: AtomicGain,
    writes: Mutex<Vec<SinkWrite>>,
    gain_changes: Mutex<Vec<f32>>,
    halts: AtomicUsize,
}

impl MemorySink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            gain: AtomicGain::new(1.0),
            writes: Mutex::new(Vec::new()),
            gain_changes: Mutex::new(Vec::new()),
            halts: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> Vec<SinkWrite> {
        self.writes.lock().clone()
    }

    /// All captured samples back to back
    pub fn samples(&self) -> Vec<f32> {
        self.writes
            .lock()
            .iter()
            .flat_map(|w| w.samples.iter().copied())
            .collect()
    }

    /// Every value passed to `set_gain`, in order
    pub fn gain_changes(&self) -> Vec<f32> {
        self.gain_changes.lock().clone()
    }

    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

impl OutputSink for MemorySink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&self, samples: &[f32]) -> Result<()> {
        let gain = self.gain.get();
        self.writes.lock().push(SinkWrite {
            at: Instant::now(),
            samples: samples.iter().map(|s| s * gain).collect(),
        });
        Ok(())
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
        self.gain_changes.lock().push(gain);
    }

    fn gain(&self) -> f32 {
        self.gain.get()
    }
}

// ============================================================================
// Device Sink
// ============================================================================

#[cfg(feature = "device")]
pub use device::DeviceSink;

#[cfg(feature = "device")]
mod device {
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::{error, info};
    use parking_lot::Mutex;

    use super::{AtomicGain, OutputSink};
    use crate::error::{Result, VoxError};

    /// Plays on the default output device through cpal
    ///
    /// The stream lives on its own thread (cpal streams are not `Send` on
    /// every platform) and pulls from a shared sample queue. Dropping the
    /// sink ends the thread.
    pub struct DeviceSink {
        sample_rate: u32,
        queue: Arc<Mutex<VecDeque<f32>>>,
        gain: Arc<AtomicGain>,
        _end_on_drop: mpsc::Sender<()>,
    }

    impl DeviceSink {
        /// Open the default output device
        ///
        /// # Errors
        /// * `Output` - If no device is available or the stream fails to start
        pub fn open() -> Result<Self> {
            let output_err = |reason: String| VoxError::Output { reason };

            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| output_err("no audio output device available".to_string()))?;
            let config = device
                .default_output_config()
                .map_err(|e| output_err(format!("failed to get default output config: {e}")))?;

            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
            let gain = Arc::new(AtomicGain::new(1.0));

            let (end_on_drop_tx, end_on_drop_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
            let stream_queue = queue.clone();
            let stream_gain = gain.clone();

            thread::spawn(move || {
                let stream = device.build_output_stream(
                    &config.config(),
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        let gain = stream_gain.get();
                        let mut queue = stream_queue.lock();
                        for frame in data.chunks_mut(channels) {
                            let sample = queue.pop_front().unwrap_or(0.0) * gain;
                            frame.fill(sample);
                        }
                    },
                    |e| error!("error playing audio: {e:?}"),
                    Some(Duration::from_millis(100)),
                );

                let stream = match stream.map_err(|e| e.to_string()).and_then(|s| {
                    s.play().map_err(|e| e.to_string())?;
                    Ok(s)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(reason) => {
                        let _ = ready_tx.send(Err(VoxError::Output { reason }));
                        return;
                    }
                };

                // keep the stream alive until the sink is dropped
                end_on_drop_rx.recv().ok();
                drop(stream);
            });

            ready_rx
                .recv()
                .map_err(|e| output_err(format!("output thread exited: {e}")))??;

            info!("audio output: {} Hz, {} channel(s)", sample_rate, channels);
            Ok(Self {
                sample_rate,
                queue,
                gain,
                _end_on_drop: end_on_drop_tx,
            })
        }
    }

    impl OutputSink for DeviceSink {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn write(&self, samples: &[f32]) -> Result<()> {
            self.queue.lock().extend(samples.iter().copied());
            Ok(())
        }

        fn halt(&self) {
            self.queue.lock().clear();
        }

        fn set_gain(&self, gain: f32) {
            self.gain.set(gain);
        }

        fn gain(&self) -> f32 {
            self.gain.get()
        }
    }
}
