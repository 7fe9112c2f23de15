//! The voice capability the scheduler drives
//!
//! A host owns the audio clock and the actual sound sources. The scheduler
//! only ever sees opaque [`SourceHandle`]s.

use thiserror::Error;
use threebeat_core::Sound;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Audio clock could not be resumed: {0}")]
    Resume(String),
    #[error("Unknown source handle {0:?}")]
    UnknownSource(SourceHandle),
    #[error("Trigger rejected: {0}")]
    Rejected(String),
    #[error("Host is closed")]
    Closed,
}

/// Opaque reference to a configured sound source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceHandle(pub u64);

/// State of the host audio clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Suspended,
    Running,
    Closed,
}

/// One note for a source. Times are in host clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub start: f64,
    pub duration: f64,
    /// 0-1
    pub velocity: f64,
    /// None for pitchless (noise) sources
    pub pitch_hz: Option<f64>,
}

#[allow(async_fn_in_trait)]
pub trait VoiceHost {
    fn clock_state(&self) -> ClockState;

    /// Bring a suspended clock to running. Completes once audio is flowing.
    async fn resume(&mut self) -> Result<(), HostError>;

    /// Current audio clock time in seconds
    fn now(&self) -> f64;

    /// Build a source for `sound`, routed to the output of `voice_index`
    fn configure(&mut self, voice_index: usize, sound: Sound) -> Result<SourceHandle, HostError>;

    fn trigger(&mut self, handle: SourceHandle, trigger: Trigger) -> Result<(), HostError>;

    fn dispose(&mut self, handle: SourceHandle);

    /// Linear gain 0-1 for a voice output
    fn set_volume(&mut self, voice_index: usize, gain: f32);
}
