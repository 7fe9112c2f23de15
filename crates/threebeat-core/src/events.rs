//! Change notifications published by the pattern model
//!
//! Delivery is synchronous and follows subscription order. A panicking
//! listener is logged and skipped; the remaining listeners still run.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::error;

use crate::pattern::Sound;

/// A single change notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ModelEvent {
    IsPlayingChange(bool),
    BpmChange(i32),
    BarMultiplierChange(i32),
    VelocityRandomizationChange(i32),
    NoteDurationChange(i32),
    SequencerPatternChange { voice_index: usize, pattern: Vec<bool> },
    SequencerSoundChange { voice_index: usize, sound: Sound },
    SequencerNoteChange { voice_index: usize, note: String },
    SequencerDivisionsChange { voice_index: usize, divisions: u8, pattern: Vec<bool> },
    SequencerVolumeChange { voice_index: usize, volume: i32 },
}

/// Subscription key, one per event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    IsPlayingChange,
    BpmChange,
    BarMultiplierChange,
    VelocityRandomizationChange,
    NoteDurationChange,
    SequencerPatternChange,
    SequencerSoundChange,
    SequencerNoteChange,
    SequencerDivisionsChange,
    SequencerVolumeChange,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::IsPlayingChange,
        Self::BpmChange,
        Self::BarMultiplierChange,
        Self::VelocityRandomizationChange,
        Self::NoteDurationChange,
        Self::SequencerPatternChange,
        Self::SequencerSoundChange,
        Self::SequencerNoteChange,
        Self::SequencerDivisionsChange,
        Self::SequencerVolumeChange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::IsPlayingChange => "isPlayingChange",
            Self::BpmChange => "bpmChange",
            Self::BarMultiplierChange => "barMultiplierChange",
            Self::VelocityRandomizationChange => "velocityRandomizationChange",
            Self::NoteDurationChange => "noteDurationChange",
            Self::SequencerPatternChange => "sequencerPatternChange",
            Self::SequencerSoundChange => "sequencerSoundChange",
            Self::SequencerNoteChange => "sequencerNoteChange",
            Self::SequencerDivisionsChange => "sequencerDivisionsChange",
            Self::SequencerVolumeChange => "sequencerVolumeChange",
        }
    }
}

impl ModelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::IsPlayingChange(_) => EventKind::IsPlayingChange,
            Self::BpmChange(_) => EventKind::BpmChange,
            Self::BarMultiplierChange(_) => EventKind::BarMultiplierChange,
            Self::VelocityRandomizationChange(_) => EventKind::VelocityRandomizationChange,
            Self::NoteDurationChange(_) => EventKind::NoteDurationChange,
            Self::SequencerPatternChange { .. } => EventKind::SequencerPatternChange,
            Self::SequencerSoundChange { .. } => EventKind::SequencerSoundChange,
            Self::SequencerNoteChange { .. } => EventKind::SequencerNoteChange,
            Self::SequencerDivisionsChange { .. } => EventKind::SequencerDivisionsChange,
            Self::SequencerVolumeChange { .. } => EventKind::SequencerVolumeChange,
        }
    }
}

pub type Listener = Box<dyn FnMut(&ModelEvent)>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered listener lists keyed by event kind
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns false if the subscription was not found
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn publish(&mut self, event: &ModelEvent) {
        let kind = event.kind();
        let Some(list) = self.listeners.get_mut(&kind) else {
            return;
        };
        for (_, listener) in list.iter_mut() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                error!(event = kind.name(), "Subscriber panicked, continuing delivery");
            }
        }
    }
}
