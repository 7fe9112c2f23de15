//! Named model operations in their serialized form
//!
//! `{"type": "SET_BPM", "payload": 140}` style, so a controller can drive the
//! model from text (CLI, scripts, a remote UI).

use serde::{Deserialize, Serialize};

use crate::pattern::{PartialState, Sound};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    SetIsPlaying(bool),
    SetBpm(i32),
    SetBarMultiplier(i32),
    SetVelocityRandomization(i32),
    SetNoteDuration(i32),
    ToggleDot {
        #[serde(rename = "sequencerId")]
        voice_id: String,
        #[serde(rename = "dotIndex")]
        step: i64,
    },
    SetSound {
        #[serde(rename = "sequencerId")]
        voice_id: String,
        sound: Sound,
    },
    SetNote {
        #[serde(rename = "sequencerId")]
        voice_id: String,
        note: String,
    },
    SetDivisions {
        #[serde(rename = "sequencerId")]
        voice_id: String,
        divisions: i32,
    },
    SetVolume {
        #[serde(rename = "sequencerId")]
        voice_id: String,
        volume: i32,
    },
    SaveNoteForSequencer {
        #[serde(rename = "sequencerIndex")]
        voice_index: i64,
        note: String,
    },
    LoadState(PartialState),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetIsPlaying(_) => "SET_IS_PLAYING",
            Self::SetBpm(_) => "SET_BPM",
            Self::SetBarMultiplier(_) => "SET_BAR_MULTIPLIER",
            Self::SetVelocityRandomization(_) => "SET_VELOCITY_RANDOMIZATION",
            Self::SetNoteDuration(_) => "SET_NOTE_DURATION",
            Self::ToggleDot { .. } => "TOGGLE_DOT",
            Self::SetSound { .. } => "SET_SOUND",
            Self::SetNote { .. } => "SET_NOTE",
            Self::SetDivisions { .. } => "SET_DIVISIONS",
            Self::SetVolume { .. } => "SET_VOLUME",
            Self::SaveNoteForSequencer { .. } => "SAVE_NOTE_FOR_SEQUENCER",
            Self::LoadState(_) => "LOAD_STATE",
        }
    }
}
