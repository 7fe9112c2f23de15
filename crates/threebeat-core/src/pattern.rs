//! Pattern data: voices, sounds and the full sequencer state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ThreebeatError;

pub const MIN_BPM: i32 = 60;
pub const MAX_BPM: i32 = 300;
pub const MIN_DIVISIONS: i32 = 1;
pub const MAX_DIVISIONS: i32 = 16;
pub const MAX_PERCENT: i32 = 100;

/// Pitch a voice falls back to when no saved note exists, and the pitch
/// forced onto voices playing a noise color.
pub const DEFAULT_NOTE: &str = "C4";

/// Oscillator waveforms, ordered by harmonic content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OscillatorType {
    Sine,
    Triangle,
    Square,
    Sawtooth,
    FatSine,
    FatTriangle,
    FatSquare,
    FatSawtooth,
    AmSine,
}

impl OscillatorType {
    pub const ALL: [OscillatorType; 9] = [
        Self::Sine,
        Self::Triangle,
        Self::Square,
        Self::Sawtooth,
        Self::FatSine,
        Self::FatTriangle,
        Self::FatSquare,
        Self::FatSawtooth,
        Self::AmSine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Triangle => "triangle",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::FatSine => "fatsine",
            Self::FatTriangle => "fattriangle",
            Self::FatSquare => "fatsquare",
            Self::FatSawtooth => "fatsawtooth",
            Self::AmSine => "amsine",
        }
    }
}

/// Noise colors. The first three are generated directly, the rest are
/// white noise shaped by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
    Grey,
    Red,
    Orange,
    Blue,
    Violet,
    Purple,
}

/// Filter shape applied to white noise for the derived colors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseFilter {
    Highpass { cutoff_hz: f32 },
    Lowpass { cutoff_hz: f32 },
    Bandpass { center_hz: f32 },
}

impl NoiseColor {
    pub const ALL: [NoiseColor; 9] = [
        Self::White,
        Self::Pink,
        Self::Brown,
        Self::Grey,
        Self::Red,
        Self::Orange,
        Self::Blue,
        Self::Violet,
        Self::Purple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Pink => "pink",
            Self::Brown => "brown",
            Self::Grey => "grey",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Blue => "blue",
            Self::Violet => "violet",
            Self::Purple => "purple",
        }
    }

    /// Filter chain for colors derived from white noise (all -12 dB/oct)
    pub fn filter(&self) -> Option<NoiseFilter> {
        match self {
            Self::Violet => Some(NoiseFilter::Highpass { cutoff_hz: 2000.0 }),
            Self::Blue => Some(NoiseFilter::Highpass { cutoff_hz: 500.0 }),
            Self::Red => Some(NoiseFilter::Lowpass { cutoff_hz: 200.0 }),
            Self::Grey => Some(NoiseFilter::Bandpass { center_hz: 1000.0 }),
            Self::Purple => Some(NoiseFilter::Highpass { cutoff_hz: 4000.0 }),
            Self::Orange => Some(NoiseFilter::Lowpass { cutoff_hz: 5000.0 }),
            Self::White | Self::Pink | Self::Brown => None,
        }
    }
}

/// Sound of a voice: a pitched oscillator or a pitchless noise color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Sound {
    Oscillator(OscillatorType),
    Noise(NoiseColor),
}

impl Sound {
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Noise(_))
    }

    /// Whether a source built for `self` can keep playing `other`
    pub fn same_family(&self, other: &Sound) -> bool {
        self.is_noise() == other.is_noise()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oscillator(osc) => osc.as_str(),
            Self::Noise(color) => color.as_str(),
        }
    }

    /// Every selectable sound, oscillators first
    pub fn all() -> impl Iterator<Item = Sound> {
        OscillatorType::ALL
            .into_iter()
            .map(Sound::Oscillator)
            .chain(NoiseColor::ALL.into_iter().map(Sound::Noise))
    }
}

impl Default for Sound {
    fn default() -> Self {
        Self::Oscillator(OscillatorType::Sine)
    }
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sound {
    type Err = ThreebeatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sound::all()
            .find(|sound| sound.as_str() == s)
            .ok_or_else(|| ThreebeatError::UnknownSound(s.to_string()))
    }
}

impl From<Sound> for String {
    fn from(sound: Sound) -> Self {
        sound.as_str().to_string()
    }
}

impl TryFrom<String> for Sound {
    type Error = ThreebeatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One independently sequenced rhythmic part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    /// Steps per bar (1-16)
    pub divisions: u8,
    /// Pitch name such as "C4"; only meaningful for oscillator sounds
    pub note: String,
    pub sound: Sound,
    /// 0-100
    pub volume: i32,
    /// Active steps, always `divisions` long
    pub pattern: Vec<bool>,
}

impl Voice {
    pub fn new(id: impl Into<String>, divisions: u8, note: impl Into<String>) -> Self {
        let divisions = clamp_divisions(divisions as i32);
        Self {
            id: id.into(),
            divisions,
            note: note.into(),
            sound: Sound::default(),
            volume: 70,
            pattern: vec![false; divisions as usize],
        }
    }

    /// Truncate or zero-pad the pattern to `divisions`
    pub fn resize_pattern(&mut self, divisions: u8) {
        self.divisions = divisions;
        self.pattern.resize(divisions as usize, false);
    }

    /// Restore the voice invariants after an unchecked write
    fn normalize(&mut self) {
        let divisions = clamp_divisions(self.divisions as i32);
        self.resize_pattern(divisions);
        self.volume = clamp_percent(self.volume);
    }
}

/// The canonical musical state. Serialized field names match the persisted
/// snapshot format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerState {
    pub is_playing: bool,
    pub bpm: i32,
    pub bar_multiplier: i32,
    pub velocity_randomization: i32,
    /// Slider value 0-100, mapped to a duration factor at playback/export
    pub note_duration: i32,
    #[serde(rename = "sequencers")]
    pub voices: Vec<Voice>,
    /// Pitch each voice had before it switched to a noise sound
    pub saved_notes: Vec<String>,
}

impl Default for SequencerState {
    fn default() -> Self {
        let voices = vec![
            Voice::new("sequencer1", 4, "C3"),
            Voice::new("sequencer2", 3, "E4"),
            Voice::new("sequencer3", 5, "G5"),
        ];
        let saved_notes = voices.iter().map(|v| v.note.clone()).collect();
        Self {
            is_playing: false,
            bpm: 120,
            bar_multiplier: 1,
            velocity_randomization: 0,
            note_duration: 50,
            voices,
            saved_notes,
        }
    }
}

impl SequencerState {
    pub fn voice_index(&self, voice_id: &str) -> Option<usize> {
        self.voices.iter().position(|v| v.id == voice_id)
    }

    pub fn voice(&self, voice_id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == voice_id)
    }

    /// Saved pitch for a voice, if any was archived
    pub fn saved_note(&self, index: usize) -> Option<&str> {
        self.saved_notes
            .get(index)
            .map(String::as_str)
            .filter(|note| !note.is_empty())
    }

    /// Store a pitch for a voice index, growing the table as needed
    pub fn archive_note(&mut self, index: usize, note: &str) {
        if self.saved_notes.len() <= index {
            self.saved_notes.resize(index + 1, String::new());
        }
        self.saved_notes[index] = note.to_string();
    }

    /// Clamp every ranged field and fix pattern lengths
    pub fn normalize(&mut self) {
        self.bpm = clamp_bpm(self.bpm);
        self.bar_multiplier = clamp_bar_multiplier(self.bar_multiplier);
        self.velocity_randomization = clamp_percent(self.velocity_randomization);
        self.note_duration = clamp_percent(self.note_duration);
        for voice in &mut self.voices {
            voice.normalize();
        }
    }
}

/// Subset of the state used to merge a stored snapshot over the current one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialState {
    pub is_playing: Option<bool>,
    pub bpm: Option<i32>,
    pub bar_multiplier: Option<i32>,
    pub velocity_randomization: Option<i32>,
    pub note_duration: Option<i32>,
    #[serde(rename = "sequencers")]
    pub voices: Option<Vec<Voice>>,
    pub saved_notes: Option<Vec<String>>,
}

impl PartialState {
    /// Shallow merge: every present field replaces the current one wholesale
    pub fn merge_into(self, state: &mut SequencerState) {
        if let Some(v) = self.is_playing {
            state.is_playing = v;
        }
        if let Some(v) = self.bpm {
            state.bpm = v;
        }
        if let Some(v) = self.bar_multiplier {
            state.bar_multiplier = v;
        }
        if let Some(v) = self.velocity_randomization {
            state.velocity_randomization = v;
        }
        if let Some(v) = self.note_duration {
            state.note_duration = v;
        }
        if let Some(v) = self.voices {
            state.voices = v;
        }
        if let Some(v) = self.saved_notes {
            state.saved_notes = v;
        }
    }
}

impl From<SequencerState> for PartialState {
    fn from(state: SequencerState) -> Self {
        Self {
            is_playing: Some(state.is_playing),
            bpm: Some(state.bpm),
            bar_multiplier: Some(state.bar_multiplier),
            velocity_randomization: Some(state.velocity_randomization),
            note_duration: Some(state.note_duration),
            voices: Some(state.voices),
            saved_notes: Some(state.saved_notes),
        }
    }
}

pub fn clamp_bpm(bpm: i32) -> i32 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

pub fn clamp_bar_multiplier(multiplier: i32) -> i32 {
    multiplier.max(1)
}

pub fn clamp_percent(value: i32) -> i32 {
    value.clamp(0, MAX_PERCENT)
}

pub fn clamp_divisions(divisions: i32) -> u8 {
    divisions.clamp(MIN_DIVISIONS, MAX_DIVISIONS) as u8
}
