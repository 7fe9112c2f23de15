//! threebeat-services: Playback engine, audio hosts and file persistence

pub mod audio_io;
pub mod host;
pub mod mixer;
pub mod persistence;
pub mod render;
pub mod scheduler;
pub mod software_host;
pub mod synth;
pub mod transport;

pub use audio_io::{AudioOutputError, RealtimeHost};
pub use host::{ClockState, HostError, SourceHandle, Trigger, VoiceHost};
pub use persistence::JsonFileStore;
pub use render::{render_pattern, render_to_wav, RenderError};
pub use scheduler::{BarMultiplierPolicy, PlaybackParams, SequencerEngine, StepObserver, VoicePhase, VoiceRuntime};
pub use software_host::SoftwareHost;
pub use transport::{ScheduleId, Transport, TransportState};
