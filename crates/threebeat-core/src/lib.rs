//! threebeat-core: Pattern model, timing math and MIDI export for threebeat

pub mod action;
mod error;
pub mod events;
pub mod midi_export;
pub mod model;
pub mod pattern;
pub mod pitch;
pub mod store;
pub mod timing;

pub use action::Action;
pub use error::ThreebeatError;
pub use events::{EventBus, EventKind, ModelEvent, SubscriptionId};
pub use midi_export::{export_midi, export_to_path, ExportError, ExportOutcome, MidiTrack, TrackEvent};
pub use model::PatternModel;
pub use pattern::{NoiseColor, NoiseFilter, OscillatorType, PartialState, SequencerState, Sound, Voice};
pub use store::{MemoryStore, SnapshotStore, StoreError};
