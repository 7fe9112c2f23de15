//! Standard MIDI File export of the current pattern
//!
//! Walks a frozen [`SequencerState`] once and produces a format 0, single
//! track file at 480 ticks per beat. Only four event types are written:
//! set-tempo, note-on, note-off and end-of-track.

use std::fs;
use std::io::Write;
use std::path::Path;

use fastrand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::pattern::SequencerState;
use crate::pitch::note_to_midi;
use crate::timing::{export_duration_ticks, export_velocity, extended_step_count};

pub const TICKS_PER_BEAT: u16 = 480;
pub const DEFAULT_FILE_NAME: &str = "3beat-pattern.mid";

const MAX_CHANNELS: usize = 16;
const MAX_VLQ: u32 = 0x0FFF_FFFF;
const MAX_TEMPO: u32 = 0xFF_FFFF;
/// Longest repeated pattern one voice may export
pub const MAX_EXPORT_STEPS: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Tempo must be positive, got {0}")]
    InvalidTempo(i32),
    #[error("Tempo of {0} microseconds per beat does not fit in 24 bits")]
    TempoOutOfRange(u32),
    #[error("{0} voices exceed the 16 available MIDI channels")]
    TooManyVoices(usize),
    #[error("Pattern of {0} steps exceeds the export limit of {max} steps", max = MAX_EXPORT_STEPS)]
    PatternTooLong(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One track event with its delta time in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    SetTempo { delta: u32, micros_per_beat: u32 },
    NoteOn { delta: u32, channel: u8, note: u8, velocity: u8 },
    NoteOff { delta: u32, channel: u8, note: u8 },
    EndOfTrack { delta: u32 },
}

impl TrackEvent {
    pub fn delta(&self) -> u32 {
        match *self {
            Self::SetTempo { delta, .. }
            | Self::NoteOn { delta, .. }
            | Self::NoteOff { delta, .. }
            | Self::EndOfTrack { delta } => delta,
        }
    }

    fn with_delta(self, delta: u32) -> Self {
        match self {
            Self::SetTempo { micros_per_beat, .. } => Self::SetTempo { delta, micros_per_beat },
            Self::NoteOn { channel, note, velocity, .. } => {
                Self::NoteOn { delta, channel, note, velocity }
            }
            Self::NoteOff { channel, note, .. } => Self::NoteOff { delta, channel, note },
            Self::EndOfTrack { .. } => Self::EndOfTrack { delta },
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        write_var_len(out, self.delta());
        match *self {
            Self::SetTempo { micros_per_beat, .. } => {
                out.extend_from_slice(&[0xFF, 0x51, 0x03]);
                out.extend_from_slice(&micros_per_beat.to_be_bytes()[1..]);
            }
            Self::NoteOn { channel, note, velocity, .. } => {
                out.extend_from_slice(&[0x90 | channel, note & 0x7F, velocity & 0x7F]);
            }
            Self::NoteOff { channel, note, .. } => {
                out.extend_from_slice(&[0x80 | channel, note & 0x7F, 0]);
            }
            Self::EndOfTrack { .. } => out.extend_from_slice(&[0xFF, 0x2F, 0x00]),
        }
    }
}

/// The single track of an exported file, deltas already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiTrack {
    pub ticks_per_beat: u16,
    pub events: Vec<TrackEvent>,
}

impl MidiTrack {
    /// Serialize header chunk and track chunk
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.events.len() * 4);
        for event in &self.events {
            event.write_to(&mut body);
        }

        let mut out = Vec::with_capacity(22 + body.len());
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&self.ticks_per_beat.to_be_bytes());
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// Variable-length quantity, most significant group first. Values above
/// 28 bits are capped.
pub fn write_var_len(out: &mut Vec<u8>, value: u32) {
    let mut v = value.min(MAX_VLQ);
    let mut groups = [0u8; 4];
    let mut count = 0;
    loop {
        groups[count] = (v & 0x7F) as u8;
        count += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | continuation);
    }
}

/// Build the event list: tempo at tick 0, every active step of every voice as
/// a note-on/note-off pair, stably sorted by time, delta encoded, then an
/// end-of-track marker.
pub fn build_track(state: &SequencerState, rng: &mut Rng) -> Result<MidiTrack, ExportError> {
    if state.bpm <= 0 {
        return Err(ExportError::InvalidTempo(state.bpm));
    }
    if state.voices.len() > MAX_CHANNELS {
        return Err(ExportError::TooManyVoices(state.voices.len()));
    }
    let micros_per_beat = 60_000_000 / state.bpm as u32;
    if micros_per_beat > MAX_TEMPO {
        return Err(ExportError::TempoOutOfRange(micros_per_beat));
    }
    let longest = state
        .voices
        .iter()
        .map(|voice| extended_step_count(voice.divisions, state.bar_multiplier))
        .max()
        .unwrap_or(0);
    if longest > MAX_EXPORT_STEPS {
        return Err(ExportError::PatternTooLong(longest));
    }

    let mut timed: Vec<(u64, TrackEvent)> = vec![(0, TrackEvent::SetTempo { delta: 0, micros_per_beat })];

    for (index, voice) in state.voices.iter().enumerate() {
        if voice.divisions == 0 {
            continue;
        }
        let channel = index as u8;
        let ticks_per_division = TICKS_PER_BEAT as u32 * 4 / voice.divisions as u32;
        let total_steps = extended_step_count(voice.divisions, state.bar_multiplier);
        let note = note_to_midi(Some(voice.note.as_str()));

        for step in 0..total_steps {
            let active = voice
                .pattern
                .get(step % voice.divisions as usize)
                .copied()
                .unwrap_or(false);
            if !active {
                continue;
            }
            let velocity = export_velocity(rng, state.velocity_randomization);
            let start = step as u64 * ticks_per_division as u64;
            let duration = export_duration_ticks(ticks_per_division, state.note_duration) as u64;

            timed.push((start, TrackEvent::NoteOn { delta: 0, channel, note, velocity }));
            timed.push((start + duration, TrackEvent::NoteOff { delta: 0, channel, note }));
        }
    }

    // Stable: events sharing a tick keep their emission order
    timed.sort_by_key(|(tick, _)| *tick);

    let mut last = 0u64;
    let mut events: Vec<TrackEvent> = timed
        .into_iter()
        .map(|(tick, event)| {
            let delta = tick.saturating_sub(last).min(u32::MAX as u64) as u32;
            last = tick;
            event.with_delta(delta)
        })
        .collect();
    events.push(TrackEvent::EndOfTrack { delta: 0 });

    Ok(MidiTrack { ticks_per_beat: TICKS_PER_BEAT, events })
}

/// Build and serialize in one step
pub fn export_midi(state: &SequencerState, rng: &mut Rng) -> Result<Vec<u8>, ExportError> {
    Ok(build_track(state, rng)?.to_bytes())
}

/// Caller-facing result of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub success: bool,
    pub message: String,
}

impl ExportOutcome {
    fn ok() -> Self {
        Self { success: true, message: "MIDI file exported successfully".into() }
    }

    fn failed() -> Self {
        Self { success: false, message: "Failed to export MIDI file".into() }
    }
}

/// Export to `path`. The bytes go to a temporary sibling first and are
/// renamed into place, so a failed export never leaves a partial file.
pub fn export_to_path(state: &SequencerState, rng: &mut Rng, path: &Path) -> ExportOutcome {
    match write_atomically(state, rng, path) {
        Ok(len) => {
            info!(path = %path.display(), bytes = len, "MIDI export written");
            ExportOutcome::ok()
        }
        Err(e) => {
            error!("Error exporting MIDI: {}", e);
            ExportOutcome::failed()
        }
    }
}

fn write_atomically(state: &SequencerState, rng: &mut Rng, path: &Path) -> Result<usize, ExportError> {
    let bytes = export_midi(state, rng)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = Path::new(&tmp);

    let written = fs::File::create(tmp)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(tmp);
        return Err(e.into());
    }
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Voice;

    fn single_voice_state() -> SequencerState {
        let mut voice = Voice::new("sequencer1", 4, "C4");
        voice.pattern = vec![true, false, false, false];
        SequencerState {
            voices: vec![voice],
            saved_notes: vec!["C4".into()],
            ..SequencerState::default()
        }
    }

    fn encode(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        write_var_len(&mut out, value);
        out
    }

    #[test]
    fn test_var_len_encoding() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(0x7F), vec![0x7F]);
        assert_eq!(encode(0x80), vec![0x81, 0x00]);
        assert_eq!(encode(0x2000), vec![0xC0, 0x00]);
        assert_eq!(encode(0x0FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(encode(u32::MAX), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_tempo_event() {
        let mut rng = Rng::with_seed(1);
        let track = build_track(&single_voice_state(), &mut rng).unwrap();
        assert_eq!(track.events[0], TrackEvent::SetTempo { delta: 0, micros_per_beat: 500_000 });
    }

    #[test]
    fn test_bar_multiplier_repeats_pattern() {
        let mut state = single_voice_state();
        state.bar_multiplier = 3;
        let mut rng = Rng::with_seed(1);
        let track = build_track(&state, &mut rng).unwrap();
        let note_ons = track
            .events
            .iter()
            .filter(|e| matches!(e, TrackEvent::NoteOn { .. }))
            .count();
        assert_eq!(note_ons, 3);
    }

    #[test]
    fn test_ties_keep_emission_order() {
        // Two voices both hitting tick 0: voice 0's note-on precedes voice 1's
        let mut state = SequencerState::default();
        state.voices[0].pattern[0] = true;
        state.voices[1].pattern[0] = true;
        let mut rng = Rng::with_seed(5);
        let track = build_track(&state, &mut rng).unwrap();
        let channels: Vec<u8> = track
            .events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::NoteOn { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![0, 1]);
        assert_eq!(track.events[1].delta(), 0);
        assert_eq!(track.events[2].delta(), 0);
    }

    #[test]
    fn test_deltas_accumulate_to_absolute_times() {
        let mut state = SequencerState::default();
        for voice in &mut state.voices {
            voice.pattern.iter_mut().for_each(|s| *s = true);
        }
        state.bar_multiplier = 2;
        let mut rng = Rng::with_seed(9);
        let track = build_track(&state, &mut rng).unwrap();
        let total: u64 = track.events.iter().map(|e| e.delta() as u64).sum();
        // last note-off: voice 3 (5 div, 384 ticks each) step 9 at 3456 + 211
        assert_eq!(total, 3456 + 211);
        assert_eq!(track.events.last(), Some(&TrackEvent::EndOfTrack { delta: 0 }));
    }

    #[test]
    fn test_too_many_voices_fails() {
        let mut state = SequencerState::default();
        state.voices = (0..17).map(|i| Voice::new(format!("v{}", i), 4, "C4")).collect();
        let mut rng = Rng::with_seed(1);
        assert!(matches!(build_track(&state, &mut rng), Err(ExportError::TooManyVoices(17))));
    }

    #[test]
    fn test_seeded_exports_are_identical() {
        let mut state = single_voice_state();
        state.velocity_randomization = 40;
        let a = export_midi(&state, &mut Rng::with_seed(77)).unwrap();
        let b = export_midi(&state, &mut Rng::with_seed(77)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_and_track_lengths() {
        let bytes = export_midi(&single_voice_state(), &mut Rng::with_seed(2)).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
        assert_eq!(&bytes[8..14], &[0, 0, 0, 1, 0x01, 0xE0]);
        assert_eq!(&bytes[14..18], b"MTrk");
        let len = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]) as usize;
        assert_eq!(bytes.len(), 22 + len);
    }

    #[test]
    fn test_pattern_longer_than_limit_is_rejected() {
        let mut state = single_voice_state();
        state.bar_multiplier = (MAX_EXPORT_STEPS / 4) as i32;
        let track = build_track(&state, &mut Rng::with_seed(4)).unwrap();
        let note_ons = track.events.iter().filter(|e| matches!(e, TrackEvent::NoteOn { .. })).count();
        assert_eq!(note_ons, MAX_EXPORT_STEPS / 4);

        state.bar_multiplier += 1;
        let err = build_track(&state, &mut Rng::with_seed(4)).unwrap_err();
        assert!(matches!(err, ExportError::PatternTooLong(steps) if steps == MAX_EXPORT_STEPS + 4));
    }

    #[test]
    fn test_maximum_bar_multiplier_fails_export_cleanly() {
        let mut state = single_voice_state();
        state.voices[0].resize_pattern(16);
        state.bar_multiplier = i32::MAX;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        let outcome = export_to_path(&state, &mut Rng::with_seed(5), &path);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to export MIDI file");
        assert!(!path.exists());
    }

    #[test]
    fn test_export_to_path_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        let outcome = export_to_path(&single_voice_state(), &mut Rng::with_seed(3), &path);
        assert!(outcome.success);
        assert!(path.exists());

        let missing = dir.path().join("no-such-dir").join("out.mid");
        let outcome = export_to_path(&single_voice_state(), &mut Rng::with_seed(3), &missing);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Failed to export MIDI file");
        assert!(!missing.exists());
    }
}
