//! The pattern model: single source of truth for the sequencer state
//!
//! State is changed only through the named operations below. Each operation
//! clamps its input, mutates, publishes a scoped [`ModelEvent`], and writes
//! the full state through the attached [`SnapshotStore`]. Operations never
//! fail: rejected input is logged and leaves the state untouched.

use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::events::{EventBus, EventKind, Listener, ModelEvent, SubscriptionId};
use crate::pattern::{
    clamp_bar_multiplier, clamp_bpm, clamp_divisions, clamp_percent, PartialState,
    SequencerState, Sound, DEFAULT_NOTE,
};
use crate::store::SnapshotStore;

pub struct PatternModel {
    state: SequencerState,
    bus: EventBus,
    store: Option<Box<dyn SnapshotStore>>,
}

impl Default for PatternModel {
    fn default() -> Self {
        Self::new(SequencerState::default())
    }
}

impl PatternModel {
    pub fn new(state: SequencerState) -> Self {
        Self {
            state,
            bus: EventBus::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read-only view of the live state
    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    /// Deep, independent copy of the current state
    pub fn snapshot(&self) -> SequencerState {
        self.state.clone()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.bus.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Apply whatever the store holds. A missing snapshot keeps the defaults;
    /// a read failure is logged and also keeps the defaults.
    pub fn load_from_store(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.load() {
            Ok(Some(stored)) => {
                self.apply_snapshot(PartialState::from(stored));
                info!("State loaded from store");
            }
            Ok(None) => info!("No stored state found, using defaults"),
            Err(e) => error!("Failed to load stored state: {}", e),
        }
    }

    fn persist(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if let Err(e) = store.save(&self.state) {
            error!("Failed to persist state: {}", e);
        }
    }

    fn publish(&mut self, event: ModelEvent) {
        debug!(event = event.kind().name(), "Publishing model change");
        self.bus.publish(&event);
    }

    fn find_voice(&self, voice_id: &str) -> Option<usize> {
        let index = self.state.voice_index(voice_id);
        if index.is_none() {
            warn!("Sequencer with id {} not found", voice_id);
        }
        index
    }

    pub fn dispatch(&mut self, action: Action) {
        debug!(action = action.name(), "Dispatch");
        match action {
            Action::SetIsPlaying(playing) => self.apply_playing(playing),
            Action::SetBpm(bpm) => self.apply_tempo(bpm),
            Action::SetBarMultiplier(multiplier) => self.apply_bar_multiplier(multiplier),
            Action::SetVelocityRandomization(value) => self.apply_velocity_randomization(value),
            Action::SetNoteDuration(value) => self.apply_note_duration(value),
            Action::ToggleDot { voice_id, step } => match usize::try_from(step) {
                Ok(step) => self.apply_toggle_step(&voice_id, step),
                Err(_) => warn!("Invalid dot index {} for sequencer {}", step, voice_id),
            },
            Action::SetSound { voice_id, sound } => self.apply_sound(&voice_id, sound),
            Action::SetNote { voice_id, note } => self.apply_note(&voice_id, note),
            Action::SetDivisions { voice_id, divisions } => self.apply_divisions(&voice_id, divisions),
            Action::SetVolume { voice_id, volume } => self.apply_volume(&voice_id, volume),
            Action::SaveNoteForSequencer { voice_index, note } => {
                self.apply_saved_note(voice_index, &note)
            }
            Action::LoadState(partial) => self.apply_snapshot(partial),
        }
        self.persist();
    }

    /// Parse and dispatch a serialized action. Unknown operation names and
    /// malformed payloads are logged and ignored.
    pub fn dispatch_json(&mut self, json: &str) {
        match serde_json::from_str::<Action>(json) {
            Ok(action) => self.dispatch(action),
            Err(e) => warn!("Unknown or malformed action ignored: {}", e),
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.dispatch(Action::SetIsPlaying(playing));
    }

    pub fn set_tempo(&mut self, bpm: i32) {
        self.dispatch(Action::SetBpm(bpm));
    }

    pub fn set_bar_multiplier(&mut self, multiplier: i32) {
        self.dispatch(Action::SetBarMultiplier(multiplier));
    }

    pub fn set_velocity_randomization(&mut self, value: i32) {
        self.dispatch(Action::SetVelocityRandomization(value));
    }

    pub fn set_note_duration(&mut self, value: i32) {
        self.dispatch(Action::SetNoteDuration(value));
    }

    pub fn toggle_step(&mut self, voice_id: &str, step: usize) {
        let step = i64::try_from(step).unwrap_or(i64::MAX);
        self.dispatch(Action::ToggleDot { voice_id: voice_id.to_string(), step });
    }

    pub fn set_sound(&mut self, voice_id: &str, sound: Sound) {
        self.dispatch(Action::SetSound { voice_id: voice_id.to_string(), sound });
    }

    pub fn set_note(&mut self, voice_id: &str, note: impl Into<String>) {
        self.dispatch(Action::SetNote { voice_id: voice_id.to_string(), note: note.into() });
    }

    pub fn set_divisions(&mut self, voice_id: &str, divisions: i32) {
        self.dispatch(Action::SetDivisions { voice_id: voice_id.to_string(), divisions });
    }

    pub fn set_volume(&mut self, voice_id: &str, volume: i32) {
        self.dispatch(Action::SetVolume { voice_id: voice_id.to_string(), volume });
    }

    pub fn save_note_for_voice(&mut self, voice_index: usize, note: &str) {
        let voice_index = i64::try_from(voice_index).unwrap_or(i64::MAX);
        self.dispatch(Action::SaveNoteForSequencer { voice_index, note: note.to_string() });
    }

    /// Merge a (partial) snapshot over the current state. Publishes nothing;
    /// call [`PatternModel::resync`] to push the loaded values to subscribers.
    pub fn load_snapshot(&mut self, partial: PartialState) {
        self.dispatch(Action::LoadState(partial));
    }

    /// Re-publish every field so subscribers can rebuild from scratch
    pub fn resync(&mut self) {
        let state = self.state.clone();
        self.publish(ModelEvent::BpmChange(state.bpm));
        self.publish(ModelEvent::BarMultiplierChange(state.bar_multiplier));
        self.publish(ModelEvent::VelocityRandomizationChange(state.velocity_randomization));
        self.publish(ModelEvent::NoteDurationChange(state.note_duration));
        for (voice_index, voice) in state.voices.into_iter().enumerate() {
            self.publish(ModelEvent::SequencerSoundChange { voice_index, sound: voice.sound });
            self.publish(ModelEvent::SequencerNoteChange { voice_index, note: voice.note });
            self.publish(ModelEvent::SequencerDivisionsChange {
                voice_index,
                divisions: voice.divisions,
                pattern: voice.pattern,
            });
            self.publish(ModelEvent::SequencerVolumeChange { voice_index, volume: voice.volume });
        }
        self.publish(ModelEvent::IsPlayingChange(state.is_playing));
    }

    fn apply_playing(&mut self, playing: bool) {
        self.state.is_playing = playing;
        self.publish(ModelEvent::IsPlayingChange(playing));
    }

    fn apply_tempo(&mut self, bpm: i32) {
        let bpm = clamp_bpm(bpm);
        if bpm == self.state.bpm {
            return;
        }
        self.state.bpm = bpm;
        self.publish(ModelEvent::BpmChange(bpm));
    }

    fn apply_bar_multiplier(&mut self, multiplier: i32) {
        let multiplier = clamp_bar_multiplier(multiplier);
        if multiplier == self.state.bar_multiplier {
            return;
        }
        self.state.bar_multiplier = multiplier;
        self.publish(ModelEvent::BarMultiplierChange(multiplier));
    }

    // Always publishes, even when the clamped value is unchanged.
    fn apply_velocity_randomization(&mut self, value: i32) {
        let value = clamp_percent(value);
        self.state.velocity_randomization = value;
        self.publish(ModelEvent::VelocityRandomizationChange(value));
    }

    // Always publishes, even when the clamped value is unchanged.
    fn apply_note_duration(&mut self, value: i32) {
        let value = clamp_percent(value);
        self.state.note_duration = value;
        self.publish(ModelEvent::NoteDurationChange(value));
    }

    fn apply_toggle_step(&mut self, voice_id: &str, step: usize) {
        let Some(voice_index) = self.find_voice(voice_id) else {
            return;
        };
        let pattern = &mut self.state.voices[voice_index].pattern;
        let Some(slot) = pattern.get_mut(step) else {
            warn!("Invalid dot index {} for sequencer {}", step, voice_id);
            return;
        };
        *slot = !*slot;
        let pattern = pattern.clone();
        self.publish(ModelEvent::SequencerPatternChange { voice_index, pattern });
    }

    fn apply_sound(&mut self, voice_id: &str, sound: Sound) {
        let Some(voice_index) = self.find_voice(voice_id) else {
            return;
        };
        let previous = self.state.voices[voice_index].sound;
        let current_note = self.state.voices[voice_index].note.clone();

        let note = if sound.is_noise() && !previous.is_noise() {
            self.state.archive_note(voice_index, &current_note);
            Some(DEFAULT_NOTE.to_string())
        } else if !sound.is_noise() && previous.is_noise() {
            let restored = self.state.saved_note(voice_index).unwrap_or(DEFAULT_NOTE);
            Some(restored.to_string())
        } else {
            None
        };

        if let Some(note) = note.filter(|n| *n != current_note) {
            self.state.voices[voice_index].note = note.clone();
            self.publish(ModelEvent::SequencerNoteChange { voice_index, note });
        }

        self.state.voices[voice_index].sound = sound;
        self.publish(ModelEvent::SequencerSoundChange { voice_index, sound });
    }

    fn apply_note(&mut self, voice_id: &str, note: String) {
        let Some(voice_index) = self.find_voice(voice_id) else {
            return;
        };
        self.state.voices[voice_index].note = note.clone();
        self.publish(ModelEvent::SequencerNoteChange { voice_index, note });
    }

    fn apply_divisions(&mut self, voice_id: &str, divisions: i32) {
        let Some(voice_index) = self.find_voice(voice_id) else {
            return;
        };
        let divisions = clamp_divisions(divisions);
        let voice = &mut self.state.voices[voice_index];
        if voice.divisions == divisions {
            return;
        }
        voice.resize_pattern(divisions);
        let pattern = voice.pattern.clone();
        self.publish(ModelEvent::SequencerDivisionsChange { voice_index, divisions, pattern });
    }

    fn apply_volume(&mut self, voice_id: &str, volume: i32) {
        let Some(voice_index) = self.find_voice(voice_id) else {
            return;
        };
        let volume = clamp_percent(volume);
        self.state.voices[voice_index].volume = volume;
        self.publish(ModelEvent::SequencerVolumeChange { voice_index, volume });
    }

    fn apply_saved_note(&mut self, voice_index: i64, note: &str) {
        let valid = usize::try_from(voice_index)
            .ok()
            .filter(|&i| i < self.state.voices.len());
        let Some(index) = valid else {
            warn!("Invalid sequencer index {} for saving note", voice_index);
            return;
        };
        self.state.archive_note(index, note);
    }

    fn apply_snapshot(&mut self, partial: PartialState) {
        partial.merge_into(&mut self.state);
        self.state.normalize();
    }
}
