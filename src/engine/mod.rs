//! Audio Engine Module
//!
//! Everything between a parsed word list and sound:
//! - PCM buffers and the time-compression transform
//! - WAV decode/encode
//! - Clip sources and the shared clip cache
//! - Live and offline scheduling, output sinks
//! - The status state machine and the `Speaker` facade

pub mod buffer;
pub mod cache;
pub mod io;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod speaker;
pub mod transport;

pub use buffer::{PcmBuffer, COMPRESSION_CHUNKS};
pub use cache::{LoadReport, Lookup, SoundCache, SoundClip};
pub use io::{decode_wav, encode_wav, suggested_filename, WAV_HEADER_LEN};
pub use scheduler::{render_offline, LiveRun, PlaybackEnd, PlaybackNode, Schedule, ScheduledWord};
#[cfg(feature = "device")]
pub use sink::DeviceSink;
pub use sink::{MemorySink, NullSink, OutputSink, SinkWrite};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{FsSource, MemorySource, SoundSource};
pub use speaker::{Export, Playback, Recording, Speaker};
pub use transport::{EngineEvent, EngineStatus, Observer, StatusMachine, SubscriptionId};
